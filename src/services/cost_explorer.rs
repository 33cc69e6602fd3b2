//! Cost Explorer access
//!
//! The `CostExplorer` trait is the seam between the report pipeline and AWS.
//! `AwsCliClient` drives the `aws` command line tool, which resolves
//! credentials through the standard AWS chain (environment variables, shared
//! profiles, SSO, instance roles). Tests substitute a fake that returns
//! canned pages.
//!
//! The `aws` executable must be on `PATH`. Credential failures are recognised
//! by a short list of markers in its stderr; an SDK-backed implementation of
//! `CostExplorer` would get typed credential errors instead.

use crate::types::{BillingWindow, CallerIdentity, ReportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Metric requested from Cost Explorer
pub const UNBLENDED_COST: &str = "UnblendedCost";

/// Attempts per page before a throttling error becomes fatal
const MAX_ATTEMPTS: u32 = 4;

/// First retry delay, doubled on every further attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// `GetCostAndUsage` response page (only the fields the report reads)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostAndUsagePage {
    #[serde(default)]
    pub results_by_time: Vec<ResultByTime>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResultByTime {
    pub time_period: DateInterval,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub estimated: bool,
}

/// `YYYY-MM-DD` bounds, end exclusive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub struct DateInterval {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MetricValue {
    pub amount: String,
    pub unit: String,
}

/// `sts get-caller-identity` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentityResponse {
    account: String,
    arn: String,
}

/// Billing API used by the report
pub trait CostExplorer {
    /// Resolve the account and principal behind the ambient credentials
    fn caller_identity(&self) -> Result<CallerIdentity>;

    /// Fetch one page of monthly unblended cost grouped by service
    fn cost_and_usage_page(
        &self,
        window: &BillingWindow,
        next_page_token: Option<&str>,
    ) -> Result<CostAndUsagePage>;

    /// Fetch every page for the window, retrying throttled requests.
    /// Results for the same period split across pages are merged.
    fn fetch_cost_and_usage(&self, window: &BillingWindow) -> Result<Vec<ResultByTime>> {
        let mut results: Vec<ResultByTime> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = with_retry(MAX_ATTEMPTS, RETRY_BASE_DELAY, || {
                self.cost_and_usage_page(window, token.as_deref())
            })?;
            pages += 1;
            merge_results(&mut results, page.results_by_time);

            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        debug!(pages, periods = results.len(), "Fetched cost and usage pages");
        Ok(results)
    }
}

/// Append `page` to `results`, folding groups of an already seen period into it
fn merge_results(results: &mut Vec<ResultByTime>, page: Vec<ResultByTime>) {
    for result in page {
        match results
            .iter_mut()
            .find(|r| r.time_period == result.time_period)
        {
            Some(existing) => {
                existing.groups.extend(result.groups);
                existing.estimated |= result.estimated;
            }
            None => results.push(result),
        }
    }
}

/// Run `op` up to `max_attempts` times while it fails with a throttling error
pub fn with_retry<T, F>(max_attempts: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_throttling() && attempt < max_attempts => {
                let delay = base_delay * 2u32.pow(attempt - 1);
                warn!(attempt, ?delay, "Cost Explorer throttled the request, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Messages the AWS CLI prints when it has no usable credentials
const AUTH_FAILURE_MARKERS: [&str; 9] = [
    "Unable to locate credentials",
    "ExpiredToken",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
    "The config profile",
    "Token has expired",
    "Error loading SSO Token",
    "Error when retrieving token from sso",
];

/// Map AWS CLI stderr to an error kind
pub fn classify_failure(stderr: &str) -> ReportError {
    let message = stderr.trim().to_string();
    if AUTH_FAILURE_MARKERS.iter().any(|m| message.contains(m)) {
        ReportError::Authentication(message)
    } else if message.is_empty() {
        ReportError::Api("aws command failed without output".into())
    } else {
        ReportError::Api(message)
    }
}

/// `CostExplorer` backed by the `aws` command line tool
pub struct AwsCliClient {
    program: String,
}

impl AwsCliClient {
    pub fn new() -> Self {
        Self::with_program("aws")
    }

    /// Use a specific executable (tests, non-standard installs)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run an `aws` subcommand and decode its JSON output
    fn run_json<T: serde::de::DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        debug!(program = %self.program, ?args, "Running aws command");

        let output = Command::new(&self.program)
            .args(args)
            .args(["--output", "json"])
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ReportError::Api(format!(
                    "'{}' not found on PATH; install the AWS CLI",
                    self.program
                )),
                _ => ReportError::Api(format!("failed to run '{}': {}", self.program, e)),
            })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ReportError::Api(format!("unexpected response from aws: {}", e)))
    }
}

impl Default for AwsCliClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments for one `ce get-cost-and-usage` page
pub fn cost_and_usage_args(window: &BillingWindow, next_page_token: Option<&str>) -> Result<Vec<String>> {
    let (start, end) = match (window.start(), window.end()) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(ReportError::Api("empty billing window".into())),
    };

    let mut args: Vec<String> = vec![
        "ce".into(),
        "get-cost-and-usage".into(),
        "--time-period".into(),
        format!("Start={},End={}", start, end),
        "--granularity".into(),
        "MONTHLY".into(),
        "--metrics".into(),
        UNBLENDED_COST.into(),
        "--group-by".into(),
        "Type=DIMENSION,Key=SERVICE".into(),
    ];
    if let Some(token) = next_page_token {
        args.push("--next-page-token".into());
        args.push(token.to_string());
    }
    Ok(args)
}

impl CostExplorer for AwsCliClient {
    fn caller_identity(&self) -> Result<CallerIdentity> {
        let response: CallerIdentityResponse =
            self.run_json(&["sts".to_string(), "get-caller-identity".to_string()])?;
        Ok(CallerIdentity {
            account_id: response.account,
            arn: response.arn,
        })
    }

    fn cost_and_usage_page(
        &self,
        window: &BillingWindow,
        next_page_token: Option<&str>,
    ) -> Result<CostAndUsagePage> {
        self.run_json(&cost_and_usage_args(window, next_page_token)?)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Canned responses, consumed in order
    pub struct FakeCostExplorer {
        pub identity: std::result::Result<CallerIdentity, String>,
        pub pages: RefCell<VecDeque<Result<CostAndUsagePage>>>,
        pub tokens_seen: RefCell<Vec<Option<String>>>,
    }

    impl FakeCostExplorer {
        pub fn with_pages(pages: Vec<Result<CostAndUsagePage>>) -> Self {
            Self {
                identity: Ok(CallerIdentity {
                    account_id: "123456789012".into(),
                    arn: "arn:aws:iam::123456789012:user/report-bot".into(),
                }),
                pages: RefCell::new(pages.into()),
                tokens_seen: RefCell::new(Vec::new()),
            }
        }

        pub fn without_credentials() -> Self {
            Self {
                identity: Err("Unable to locate credentials".into()),
                pages: RefCell::new(VecDeque::new()),
                tokens_seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CostExplorer for FakeCostExplorer {
        fn caller_identity(&self) -> Result<CallerIdentity> {
            self.identity.clone().map_err(|e| classify_failure(&e))
        }

        fn cost_and_usage_page(
            &self,
            _window: &BillingWindow,
            next_page_token: Option<&str>,
        ) -> Result<CostAndUsagePage> {
            self.tokens_seen
                .borrow_mut()
                .push(next_page_token.map(String::from));
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ReportError::Api("no more canned pages".into())))
        }
    }

    pub fn group(service: &str, amount: &str) -> Group {
        let mut metrics = HashMap::new();
        metrics.insert(
            UNBLENDED_COST.to_string(),
            MetricValue {
                amount: amount.to_string(),
                unit: "USD".to_string(),
            },
        );
        Group {
            keys: vec![service.to_string()],
            metrics,
        }
    }

    pub fn result(start: &str, end: &str, groups: Vec<Group>) -> ResultByTime {
        ResultByTime {
            time_period: DateInterval {
                start: start.to_string(),
                end: end.to_string(),
            },
            groups,
            estimated: false,
        }
    }
}
