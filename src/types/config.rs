use super::{ReportError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

/// Default relative-change threshold (10%)
pub const DEFAULT_SENSITIVITY: &str = "0.1";

/// Number of full calendar months covered by a report
pub const REPORT_MONTHS: u32 = 3;

/// Run configuration, built from the command line and passed to every stage
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    /// Relative change (fraction) above which a month is flagged
    pub sensitivity: Decimal,
    /// Workbook destination
    pub out: PathBuf,
    /// Debug-level logging
    pub debug: bool,
}

impl ReportConfig {
    pub fn new(sensitivity: Decimal, out: Option<PathBuf>, debug: bool, today: NaiveDate) -> Self {
        Self {
            sensitivity,
            out: out.unwrap_or_else(|| default_out(today)),
            debug,
        }
    }

    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// `cost-and-usage-report-<today>.xlsx`
pub fn default_out(today: NaiveDate) -> PathBuf {
    PathBuf::from(format!("cost-and-usage-report-{}.xlsx", today.format("%Y-%m-%d")))
}

/// Parse a non-negative decimal fraction such as `0.1`
pub fn parse_sensitivity(raw: &str) -> Result<Decimal> {
    let value = Decimal::from_str(raw.trim()).map_err(|e| {
        ReportError::Argument(format!("invalid sensitivity '{}': {}", raw, e))
    })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ReportError::Argument(format!(
            "sensitivity must not be negative, got {}",
            raw
        )));
    }
    Ok(value)
}
