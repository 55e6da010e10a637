//! Error types for newsreel.
//!
//! Each concern has its own error enum: external collaborators report
//! [`ServiceError`], the item store reports [`StoreError`], retried calls
//! surface as [`RetryError`], and everything a stage can fail with is folded
//! into [`StageError`].

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by external collaborators (scraper, generators, publisher).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("failed to parse service response: {0}")]
    Parse(String),

    #[error("malformed service response: {0}")]
    InvalidResponse(String),

    /// The request may have taken effect but the outcome could not be confirmed.
    #[error("outcome unconfirmed: {0}")]
    Unconfirmed(String),

    #[error("missing configuration: {0}")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Whether retrying the same call has a reasonable chance of succeeding.
    ///
    /// Timeouts, connection failures, rate limiting, server errors and
    /// malformed responses are transient. Client errors, unconfirmed
    /// outcomes and local IO failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Request(_)
            | ServiceError::Timeout(_)
            | ServiceError::Parse(_)
            | ServiceError::InvalidResponse(_) => true,
            ServiceError::Status { code, .. } => *code == 429 || *code >= 500,
            ServiceError::Unconfirmed(_) | ServiceError::NotConfigured(_) | ServiceError::Io(_) => {
                false
            }
        }
    }

    /// Map a transport error from reqwest into a service error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else if err.is_decode() {
            ServiceError::Parse(err.to_string())
        } else {
            ServiceError::Request(err.to_string())
        }
    }
}

/// Errors from the item store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("item not found: {0}")]
    NotFound(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    #[error("stage {stage} is missing precursor data: {missing}")]
    PrecursorMissing { stage: String, missing: String },

    #[error("payload for stage {payload} cannot complete stage {stage}")]
    PayloadMismatch { stage: String, payload: String },

    #[error("another item already has source link {0}")]
    DuplicateLink(String),
}

impl StoreError {
    /// Fatal errors abort the running stage; the rest are per-item problems.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_)
                | StoreError::Query(_)
                | StoreError::Serialization(_)
                | StoreError::InvalidRow(_)
        )
    }
}

/// The last error of a retried operation, together with how many attempts were made.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Number of attempts made before giving up.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last_error: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Errors a stage can produce for a single item.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Retry(#[from] RetryError<ServiceError>),

    #[error("missing precursor data: {0}")]
    Precursor(String),

    #[error("stage produced no output: {0}")]
    NoOutput(String),
}

impl StageError {
    /// True when an external side effect may have happened without confirmation.
    pub fn is_unconfirmed(&self) -> bool {
        match self {
            StageError::Service(err) => matches!(err, ServiceError::Unconfirmed(_)),
            StageError::Retry(err) => matches!(err.last_error, ServiceError::Unconfirmed(_)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::Timeout("slow".into()).is_transient());
        assert!(ServiceError::InvalidResponse("4 prompts".into()).is_transient());
        assert!(ServiceError::Status {
            code: 503,
            message: "down".into()
        }
        .is_transient());
        assert!(ServiceError::Status {
            code: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!ServiceError::Status {
            code: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!ServiceError::Unconfirmed("timeout after upload".into()).is_transient());
    }

    #[test]
    fn test_retry_error_display() {
        let err = RetryError {
            attempts: 3,
            last_error: ServiceError::Request("connection reset".into()),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempt(s)"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn test_unconfirmed_detection() {
        let err = StageError::from(ServiceError::Unconfirmed("no ack".into()));
        assert!(err.is_unconfirmed());

        let err = StageError::from(RetryError {
            attempts: 1,
            last_error: ServiceError::Unconfirmed("no ack".into()),
        });
        assert!(err.is_unconfirmed());

        let err = StageError::Precursor("audio_ref".into());
        assert!(!err.is_unconfirmed());
    }

    #[test]
    fn test_store_error_fatality() {
        assert!(StoreError::Connection("refused".into()).is_fatal());
        assert!(!StoreError::NotFound(Uuid::nil()).is_fatal());
        assert!(!StoreError::PrecursorMissing {
            stage: "video".into(),
            missing: "audio_ref".into()
        }
        .is_fatal());
    }
}
