//! Monthly AWS cost and usage report grouped by service

pub mod cli;
pub mod services;
pub mod types;
