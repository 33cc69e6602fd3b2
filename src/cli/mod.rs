use crate::services::{generate, AwsCliClient, Clock, SystemClock};
use crate::types::{parse_sensitivity, ReportConfig, DEFAULT_SENSITIVITY};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Generate a cost and usage report for the last 3 months grouped by service
#[derive(Parser, Debug)]
#[command(name = "aws-cost-report")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Relative cost change (0.1 = 10%) above which a month is highlighted
    #[arg(
        long = "sensetivity",
        visible_alias = "sensitivity",
        value_name = "FLOAT",
        default_value = DEFAULT_SENSITIVITY,
        value_parser = parse_sensitivity
    )]
    sensitivity: Decimal,

    /// Output file name [default: cost-and-usage-report-<today>.xlsx]
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Print debug info
    #[arg(long)]
    debug: bool,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let clock = SystemClock;
        let config = self.into_config(&clock);
        init_logging(&config);

        let client = AwsCliClient::new();
        generate(&client, &clock, &config)?;
        Ok(())
    }

    pub fn into_config(self, clock: &dyn Clock) -> ReportConfig {
        ReportConfig::new(self.sensitivity, self.out, self.debug, clock.today())
    }
}

/// Log to stderr
fn init_logging(config: &ReportConfig) {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), config);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `RUST_LOG` directives when set, else the level for `--debug`.
/// `--debug` always enables debug output for this crate.
fn log_filter(env: Option<String>, config: &ReportConfig) -> EnvFilter {
    let mut directives = env
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| config.log_filter().to_string());
    if config.debug {
        directives.push_str(",aws_cost_report=debug");
    }
    EnvFilter::builder().parse_lossy(directives)
}
