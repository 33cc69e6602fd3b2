//! Services for fetching, aggregating and reporting cost data

pub mod aggregator;
pub mod classifier;
pub mod clock;
pub mod cost_explorer;
pub mod pipeline;
pub mod report_writer;

pub use aggregator::Aggregator;
pub use clock::{Clock, FixedClock, SystemClock};
pub use cost_explorer::{AwsCliClient, CostExplorer};
pub use pipeline::{generate, ReportSummary};
