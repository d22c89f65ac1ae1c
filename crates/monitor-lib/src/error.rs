//! Error taxonomy for the monitoring core
//!
//! Validation and context failures surface to the direct caller as
//! [`MonitorError`]. Transient upstream failures from the stream-serving API
//! are [`StreamApiError`] and are converted into report entries by the
//! periodic tasks rather than propagated.

use thiserror::Error;

/// Errors surfaced to callers of operator-facing operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("no organization context could be resolved")]
    MissingOrganization,

    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),
}

/// Errors from the stream-serving control endpoints
#[derive(Debug, Error)]
pub enum StreamApiError {
    #[error("stream API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream API rejected credentials")]
    Unauthorized,

    #[error("stream API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid stream API url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl StreamApiError {
    /// Whether a retry after re-authentication could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StreamApiError::Http(_) | StreamApiError::Unauthorized => true,
            StreamApiError::Status { status, .. } => *status >= 500,
            StreamApiError::InvalidUrl(_) => false,
        }
    }
}
