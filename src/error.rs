use thiserror::Error;

/// Errors raised at the crate's I/O and configuration boundaries.
///
/// Flow bookkeeping itself never fails: missing data reads as zero.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("flow has no id, packet export skipped")]
    MissingFlowId,
}

pub type Result<T> = std::result::Result<T, FlowError>;
