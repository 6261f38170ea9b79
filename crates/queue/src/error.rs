//! Generation error taxonomy.
//!
//! Every terminal failure carries a stable code so callers can branch
//! without string matching.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// Submission rejected because queue capacity is exhausted.
    /// Retry later or shed load.
    #[error("queue full: {size} of {capacity} slots in use")]
    QueueFull { size: usize, capacity: usize },

    /// Task removed before or during execution by explicit request.
    #[error("task cancelled")]
    Cancelled,

    /// Task exceeded its configured deadline. Execution is abandoned,
    /// not guaranteed halted.
    #[error("task timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The unit of work failed.
    #[error("generation failed: {reason}")]
    Failed { reason: String },

    /// The queue has shut down and can no longer settle this request.
    #[error("queue shut down")]
    ChannelClosed,
}

impl GenerationError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    /// Stable machine-readable code for this condition.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::QueueFull { .. } => "QUEUE_FULL",
            GenerationError::Cancelled => "CANCELLED",
            GenerationError::Timeout { .. } => "TIMEOUT",
            GenerationError::Failed { .. } => "GENERATION_FAILED",
            GenerationError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }
}

impl From<String> for GenerationError {
    fn from(reason: String) -> Self {
        Self::Failed { reason }
    }
}

impl From<&str> for GenerationError {
    fn from(reason: &str) -> Self {
        Self::Failed { reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GenerationError::QueueFull { size: 50, capacity: 50 }.code(), "QUEUE_FULL");
        assert_eq!(GenerationError::Cancelled.code(), "CANCELLED");
        assert_eq!(GenerationError::Timeout { elapsed_ms: 1 }.code(), "TIMEOUT");
        assert_eq!(GenerationError::failed("x").code(), "GENERATION_FAILED");
    }

    #[test]
    fn generic_reasons_wrap_into_failed() {
        let err: GenerationError = "backend returned 500".into();
        assert_eq!(err, GenerationError::failed("backend returned 500"));
    }
}
