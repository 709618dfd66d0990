use thiserror::Error;

/// Errors that abort a whole call before any probe is issued.
///
/// Negative probe outcomes and per-probe failures are data, see
/// [`crate::outcome`]; they never surface through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ScanError::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        ScanError::Configuration(msg.into())
    }
}
