//! The error taxonomy from §7, expressed as a single `thiserror`-derived
//! enum with a `Categorizable` split so callers can match on category
//! (retryable vs. non-retryable vs. configuration) instead of on concrete
//! variants.

use thiserror::Error;

/// Coarse category a [`CapstanError`] falls into, used by the executor's
/// outcome-to-transition mapping (§4.3) and by producers deciding whether
/// to trip their circuit breaker (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient: connection drop, lock unavailable, serialization hiccup.
    /// Always retried with jittered backoff, bounded attempts.
    Transient,
    /// A worker fault, timeout, or resolution failure — materialized as a
    /// job state change, never escalated to the component itself.
    Job,
    /// Unrecoverable configuration problem. Propagates out of
    /// initialization and fails the supervisor fast.
    Configuration,
}

/// Implemented by error types that know their own [`ErrorCategory`].
pub trait Categorizable {
    fn category(&self) -> ErrorCategory;
}

/// The error taxonomy described in §7.
#[derive(Debug, Error)]
pub enum CapstanError {
    /// Connection drop, serialization failure, lock-not-available.
    #[error("transient storage error: {0}")]
    TransientStorageError(String),

    /// The jobs/peers table is absent.
    #[error("missing schema: {0}")]
    MissingSchemaError(String),

    /// Cannot load the `worker` symbol named by a job.
    #[error("worker resolution failed for {worker:?}")]
    WorkerResolutionError { worker: String },

    /// Raised error, abnormal exit, or non-local return inside `perform`.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// `perform` exceeded `timeout(job)`.
    #[error("job timed out")]
    TimeoutError,

    /// `pkill` received, or the worker returned `{cancel, reason}`.
    #[error("job cancelled: {reason}")]
    CancelledError { reason: String },
}

impl Categorizable for CapstanError {
    fn category(&self) -> ErrorCategory {
        match self {
            CapstanError::TransientStorageError(_) => ErrorCategory::Transient,
            CapstanError::MissingSchemaError(_) => ErrorCategory::Configuration,
            CapstanError::WorkerResolutionError { .. }
            | CapstanError::WorkerFault(_)
            | CapstanError::TimeoutError
            | CapstanError::CancelledError { .. } => ErrorCategory::Job,
        }
    }
}

impl CapstanError {
    /// The formatted banner recorded in a job's `errors` array, matching
    /// §7's "formatted banner and the failure reason" language for
    /// `WorkerFault`.
    pub fn as_recorded_error(&self) -> String {
        match self {
            CapstanError::TimeoutError => "timeout".to_string(),
            CapstanError::CancelledError { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}
