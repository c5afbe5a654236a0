//! Service error types.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("{service} returned status {status}")]
    Status { service: String, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts and transport failures are transient; malformed payloads and
    /// cancellation are not. Cancellation in particular must never be
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Http(_) | ServiceError::Timeout { .. } => true,
            ServiceError::Status { status, .. } => *status >= 500 || *status == 429,
            ServiceError::ProbeFailed(_) => false,
            ServiceError::InvalidResponse(_) => false,
            ServiceError::Io(_) => false,
            ServiceError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Timeout {
            service: "tts".into(),
            timeout_secs: 60
        }
        .is_retryable());
        assert!(ServiceError::Status {
            service: "llm".into(),
            status: 503
        }
        .is_retryable());
        assert!(ServiceError::Status {
            service: "llm".into(),
            status: 429
        }
        .is_retryable());

        assert!(!ServiceError::Status {
            service: "llm".into(),
            status: 400
        }
        .is_retryable());
        assert!(!ServiceError::invalid_response("garbage").is_retryable());
        assert!(!ServiceError::Cancelled.is_retryable());
    }
}
