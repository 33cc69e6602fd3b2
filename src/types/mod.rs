//! Type definitions for aws-cost-report

mod billing;
mod config;
mod error;

pub use billing::*;
pub use config::*;
pub use error::*;
