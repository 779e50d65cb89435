//! Error types for codesweep-core
//!
//! Each pipeline stage has its own error enum so retry policy can be decided
//! per variant: fetch and delivery errors distinguish terminal from transient
//! failures, analysis errors are always retryable per file.

use std::time::Duration;

use thiserror::Error;

/// Errors from the content host while expanding a trigger
#[derive(Error, Debug)]
pub enum FetchError {
    /// Commit, ref, or repository does not exist. Terminal for the run.
    #[error("not found: {0}")]
    NotFound(String),

    /// Content host signalled rate limiting (HTTP 403/429)
    #[error("rate limited by content host")]
    RateLimited,

    /// Connection failure, timeout, or 5xx from the content host
    #[error("transient network error: {0}")]
    TransientNetwork(String),
}

impl FetchError {
    /// Whether the coordinator should retry the fetch stage
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::NotFound(_))
    }
}

/// Errors from one inference call. All variants are retryable per file
/// and never fatal to the run.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Inference call exceeded its deadline
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    /// Inference host unreachable or returned a server error
    #[error("inference service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Empty or malformed inference output
    #[error("invalid inference response: {0}")]
    InvalidResponse(String),
}

/// Errors from the notification channel
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Connection failure, timeout, or 5xx from the channel
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Channel refused the payload. Terminal, but the report is kept.
    #[error("notification channel rejected report: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Whether the dispatcher should retry the send
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::TransientNetwork(_))
    }
}

/// Internal coordinator invariant violations. Always fatal to the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A run event arrived in a state that does not accept it
    #[error("invalid state transition: {event} while {from}")]
    InvalidTransition { from: String, event: String },

    /// No run with this id exists in the ledger
    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    /// Run exceeded its wall-clock budget
    #[error("run exceeded wall-clock budget of {0:?}")]
    RunTimeout(Duration),
}

/// Main error type for the codesweep-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Content fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Analysis error
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Delivery error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Pipeline coordination error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for codesweep-core
pub type Result<T> = std::result::Result<T, Error>;
