//! End-to-end report generation: resolve → fetch → aggregate → classify → write

use crate::services::classifier::{classify, classify_totals};
use crate::services::cost_explorer::CostExplorer;
use crate::services::report_writer::{ReportContext, ReportSheet, TOTAL_LABEL};
use crate::services::{Aggregator, Clock};
use crate::types::{BillingWindow, ReportConfig, ReportError, Result, REPORT_MONTHS};
use std::path::PathBuf;
use tracing::{debug, info};

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub out: PathBuf,
    pub window: BillingWindow,
    pub services: usize,
    pub flagged: usize,
}

/// Generate the report. Any stage failure aborts the remaining stages and
/// leaves nothing at `config.out`.
pub fn generate(
    client: &dyn CostExplorer,
    clock: &dyn Clock,
    config: &ReportConfig,
) -> Result<ReportSummary> {
    let today = clock.today();
    let window = BillingWindow::preceding(today, REPORT_MONTHS).ok_or_else(|| {
        ReportError::Argument(format!("cannot compute a billing window for {}", today))
    })?;
    let (start, end) = match (window.start(), window.end()) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(ReportError::Argument("empty billing window".into())),
    };

    let identity = client.caller_identity()?;
    info!(
        account = %identity.account_id,
        principal = %identity.user_id(),
        "Resolved AWS caller identity"
    );

    info!("Getting monthly cost and usage report from {} to {}", start, end);
    info!("Cost change sensitivity is set to {}", config.sensitivity);
    let results = client.fetch_cost_and_usage(&window)?;
    if config.debug {
        let raw = serde_json::to_string_pretty(&results).unwrap_or_default();
        debug!("Response:\n{}", raw);
    }

    info!("Parsing report");
    let entries = Aggregator::entries(&results)?;
    let currency = Aggregator::currency(&entries).unwrap_or_else(|| "USD".to_string());

    info!("Calculating total cost per month");
    info!("Calculating normalized cost per month");
    let months = Aggregator::monthly(&entries, &window);
    if config.debug {
        for month in &months {
            debug!(
                period = %month.period,
                total = %month.total_cost.round_dp(2),
                per_day = %month.normalized_daily_cost.round_dp(2),
                services = month.per_service.len(),
                "Monthly aggregate"
            );
        }
    }

    let flags = classify(&months, config.sensitivity);
    let total_flags = classify_totals(&months, config.sensitivity, TOTAL_LABEL);
    let flagged = flags.iter().filter(|f| f.exceeds_threshold).count();
    if config.debug {
        for flag in flags.iter().filter(|f| f.exceeds_threshold) {
            debug!(
                service = %flag.service_name,
                from = %flag.from_period.label(),
                to = %flag.to_period.label(),
                change = %flag.relative_change,
                "Cost change above sensitivity"
            );
        }
    }
    info!(flagged, "Classified month-over-month changes");

    let sheet = ReportSheet::build(&months, &flags, &total_flags);
    let context = ReportContext {
        identity,
        generated_on: today,
        sensitivity: config.sensitivity,
        currency,
    };

    info!("Writing report to {}", config.out.display());
    sheet.save(&context, &config.out)?;
    info!("Done");

    Ok(ReportSummary {
        out: config.out.clone(),
        window,
        services: sheet.rows.len().saturating_sub(1),
        flagged,
    })
}
