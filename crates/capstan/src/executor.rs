//! Safe invocation of user worker code (§4.3).
//!
//! An [`Executor`] is not a long-lived actor like the others — it's one
//! `tokio::spawn`-ed task per claimed job, owned by the Producer that
//! claimed it. It resolves the worker, runs `perform` under a timeout,
//! and maps whatever happens (success, error, cancel, snooze, panic,
//! timeout) to a [`Transition`] the producer hands to the `JobStore`.

use crate::error::CapstanError;
use crate::job::{Job, JobOutcome, Transition};
use crate::state_machine::{default_backoff, transition};
use crate::worker::WorkerRegistry;
use std::time::Duration;

/// The result of running one job to completion, paired with the
/// `JobId`/task identity the producer needs to remove it from its
/// running set.
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub job_id: i64,
    pub transition: Transition,
}

/// Run `job` to completion against `registry`, returning the terminal (or
/// scheduling) [`Transition`] to apply. Never panics: every fault path —
/// resolution failure, worker panic, timeout, cancellation — is folded
/// into a `Transition` value instead of propagating.
pub async fn run(job: Job, registry: &WorkerRegistry) -> ExecutorOutcome {
    let job_id = job.id;

    let worker = match registry.resolve(&job.worker) {
        Some(worker) => worker,
        None => {
            let err = CapstanError::WorkerResolutionError {
                worker: job.worker.clone(),
            };
            tracing::warn!(job_id, worker = %job.worker, "worker resolution failed");
            return ExecutorOutcome {
                job_id,
                transition: transition(
                    &job,
                    JobOutcome::Error {
                        reason: err.as_recorded_error(),
                    },
                    default_backoff(job.attempt),
                ),
            };
        }
    };

    let effective_timeout = worker.timeout(&job);

    let job_for_task = job.clone();
    let worker_for_task = worker.clone();
    let perform = tokio::spawn(async move { worker_for_task.perform(&job_for_task).await });

    let outcome = match effective_timeout {
        Some(duration) => run_with_timeout(perform, duration).await,
        None => run_unbounded(perform).await,
    };

    // §4.3 point 5: the worker's own `backoff` may override the default,
    // computed here (not inside `transition`) so the pure state machine
    // stays free of the `WorkerRegistry` dependency.
    let backoff = worker.backoff(job.attempt);
    let t = transition(&job, outcome, backoff);
    tracing::debug!(job_id, ?t, "job execution finalized");
    ExecutorOutcome { job_id, transition: t }
}

async fn run_unbounded(task: tokio::task::JoinHandle<JobOutcome>) -> JobOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(join_err) => fault_outcome(join_err),
    }
}

async fn run_with_timeout(task: tokio::task::JoinHandle<JobOutcome>, duration: Duration) -> JobOutcome {
    let abort_handle = task.abort_handle();
    match tokio::time::timeout(duration, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => fault_outcome(join_err),
        Err(_elapsed) => {
            abort_handle.abort();
            JobOutcome::Error {
                reason: CapstanError::TimeoutError.as_recorded_error(),
            }
        }
    }
}

/// A `JoinError` is either a panic (worker fault) or a cancellation (we
/// never call `.abort()` except on timeout, so in practice this path is
/// the timeout-abort racing the task's own completion, or a genuine
/// panic); either way it's recorded as a `WorkerFault`, never escalated
/// to the producer itself (§4.3 point 3, §7 "Worker faults never crash
/// any system component").
fn fault_outcome(join_err: tokio::task::JoinError) -> JobOutcome {
    let reason = if join_err.is_panic() {
        let banner = panic_message(join_err.into_panic());
        CapstanError::WorkerFault(banner).as_recorded_error()
    } else {
        CapstanError::CancelledError {
            reason: "task aborted".to_string(),
        }
        .as_recorded_error()
    };
    JobOutcome::Error { reason }
}

/// Recover the panic banner from a `Box<dyn Any + Send>` payload, covering
/// the two shapes `std::panic!` actually produces (`&'static str` and
/// `String`); anything else (a custom panic payload type) falls back to a
/// generic banner rather than failing to record an error at all.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
