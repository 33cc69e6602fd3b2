use thiserror::Error;

/// aws-cost-report error types
#[derive(Error, Debug)]
pub enum ReportError {
    /// No usable credentials in the environment
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Cost Explorer request failed or returned malformed data
    #[error("api error: {0}")]
    Api(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid command line value
    #[error("argument error: {0}")]
    Argument(String),

    /// Workbook could not be rendered
    #[error("workbook error: {0}")]
    Workbook(String),
}

impl ReportError {
    /// Throttling responses are the only errors worth retrying
    pub fn is_throttling(&self) -> bool {
        const THROTTLING_CODES: [&str; 4] = [
            "ThrottlingException",
            "LimitExceededException",
            "RequestLimitExceeded",
            "TooManyRequests",
        ];
        match self {
            ReportError::Api(msg) => THROTTLING_CODES.iter().any(|code| msg.contains(code)),
            _ => false,
        }
    }
}

/// Result type alias for aws-cost-report
pub type Result<T> = std::result::Result<T, ReportError>;
