//! Error taxonomy shared by every executor.
//!
//! Executors classify their own failures so callers never have to sniff
//! message text. The orchestrator only retries `RateLimited`.

use std::time::Duration;

/// Errors produced while obtaining a response from a model or agent.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The provider refused the request because of rate limiting.
    #[error("rate limited by {provider}: {message}")]
    RateLimited { provider: String, message: String },

    /// A spawned process exceeded its wall-clock deadline and was killed.
    #[error("{what} timed out after {}ms", .after.as_millis())]
    Timeout { what: String, after: Duration },

    /// The provider answered with an error other than rate limiting.
    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    /// A spawned process could not be started or failed without usable output.
    #[error("process error: {0}")]
    Process(String),

    /// The executor was misconfigured for the request it received.
    #[error("executor misconfigured: {0}")]
    Config(String),

    /// Filesystem or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Returns true when retrying after a delay may succeed.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns true when the failure was a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias for executor operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;
