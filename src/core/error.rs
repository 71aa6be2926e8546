use std::time::Duration;

use thiserror::Error;

/// Failure of one source adapter. Recoverable: the gather stage skips the
/// source and keeps going.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of the gather stage as a whole.
#[derive(Debug, Error)]
pub enum GatherError {
    /// Every configured source failed; there is nothing to run a pipeline on.
    #[error("all {0} sources unavailable")]
    AllSourcesUnavailable(usize),
}

/// Failure to turn a raw item into a publishable one. Per-item fatal: the
/// item is reported failed and the run continues.
#[derive(Debug, Error)]
#[error("transform failed: {0}")]
pub struct TransformError(pub String);

/// Failure of one publish attempt against one destination.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Credentials rejected. A configuration problem, never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The platform asked us to slow down. Retried within the attempt budget.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Transport error or 5xx. Retried within the attempt budget.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Auth(_))
    }

    /// Stable identifier stored in ledger rows and surfaced in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Auth(_) => "auth",
            PublishError::RateLimited { .. } => "rate_limited",
            PublishError::Unavailable(_) => "unavailable",
        }
    }
}

/// Run-level failure raised to the scheduler. Item- and destination-level
/// errors never reach this type; they are folded into the run report.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Gather(#[from] GatherError),

    #[error("run cancelled before completion")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}
