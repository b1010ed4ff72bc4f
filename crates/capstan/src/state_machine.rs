//! The pure job-state transition function (§4.1).
//!
//! Kept free of I/O so the invariants in §8 are unit-testable without a
//! database: given a job and an outcome, `transition` always returns the
//! same [`Transition`], and the executor/producer/stager just hand that
//! value to a [`crate::store::JobStore`].

use crate::backoff::backoff_for_attempt;
use crate::job::{Job, JobOutcome, Transition};
use chrono::Utc;
use std::time::Duration;

/// Map a claimed job's outcome to the durable transition it resolves to.
///
/// `job.attempt` here is the attempt count *after* the claim incremented it
/// (i.e. the attempt that just ran), matching the claim query's
/// `attempt = attempt + 1 ... RETURNING *` in §4.1. `backoff` is the delay
/// to apply on a `Retry`, computed by the caller so a worker's
/// [`crate::worker::Worker::backoff`] override (§4.3 point 5) can take
/// effect without this function performing any dispatch itself; callers
/// with no worker in scope (e.g. a resolution failure) pass
/// [`backoff_for_attempt`]'s default.
pub fn transition(job: &Job, outcome: JobOutcome, backoff: Duration) -> Transition {
    match outcome {
        JobOutcome::Complete => Transition::Complete,
        JobOutcome::Cancel { reason } => Transition::Cancel { reason },
        JobOutcome::Snooze { after } => Transition::Snooze {
            scheduled_at: Utc::now()
                + chrono::Duration::from_std(after).unwrap_or(chrono::Duration::zero()),
        },
        JobOutcome::Error { reason } => {
            if job.attempt < job.max_attempts {
                Transition::Retry {
                    scheduled_at: Utc::now()
                        + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero()),
                    error: reason,
                }
            } else {
                Transition::Discard { error: reason }
            }
        }
    }
}

/// The default backoff a caller with no worker override in scope should
/// pass to [`transition`].
pub fn default_backoff(attempt: i32) -> Duration {
    backoff_for_attempt(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ErrorEntry, JobState};
    use serde_json::Value;
    use std::time::Duration;

    fn job_with(attempt: i32, max_attempts: i32) -> Job {
        Job {
            id: 1,
            state: JobState::Executing,
            queue: "alpha".into(),
            worker: "Noop".into(),
            args: Value::Object(Default::default()),
            meta: Value::Object(Default::default()),
            tags: vec![],
            attempt,
            max_attempts,
            priority: 0,
            errors: vec![],
            attempted_by: vec!["node@1".into()],
            inserted_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempted_at: Some(Utc::now()),
            completed_at: None,
            cancelled_at: None,
            discarded_at: None,
        }
    }

    #[test]
    fn complete_outcome_always_completes() {
        let job = job_with(1, 20);
        assert!(matches!(
            transition(&job, JobOutcome::Complete, Duration::from_secs(1)),
            Transition::Complete
        ));
    }

    #[test]
    fn error_with_attempts_remaining_retries() {
        let job = job_with(1, 3);
        let t = transition(
            &job,
            JobOutcome::Error {
                reason: "boom".into(),
            },
            Duration::from_secs(1),
        );
        match t {
            Transition::Retry { scheduled_at, error } => {
                assert_eq!(error, "boom");
                assert!(scheduled_at > Utc::now());
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn error_at_max_attempts_discards_not_retries() {
        let job = job_with(3, 3);
        let t = transition(
            &job,
            JobOutcome::Error {
                reason: "boom".into(),
            },
            Duration::from_secs(1),
        );
        assert!(matches!(t, Transition::Discard { .. }));
    }

    #[test]
    fn single_max_attempt_failure_discards() {
        let job = job_with(1, 1);
        let t = transition(
            &job,
            JobOutcome::Error {
                reason: "nope".into(),
            },
            Duration::from_secs(1),
        );
        assert!(matches!(t, Transition::Discard { .. }));
    }

    #[test]
    fn cancel_outcome_carries_reason() {
        let job = job_with(1, 20);
        let t = transition(
            &job,
            JobOutcome::Cancel {
                reason: "pkill".into(),
            },
            Duration::from_secs(1),
        );
        match t {
            Transition::Cancel { reason } => assert_eq!(reason, "pkill"),
            other => panic!("expected Cancel, got {other:?}"),
        }
    }

    #[test]
    fn snooze_schedules_in_the_future() {
        let job = job_with(1, 20);
        let before = Utc::now();
        let t = transition(
            &job,
            JobOutcome::Snooze {
                after: Duration::from_secs(60),
            },
            Duration::from_secs(1),
        );
        match t {
            Transition::Snooze { scheduled_at } => {
                assert!(scheduled_at >= before + chrono::Duration::seconds(59));
            }
            other => panic!("expected Snooze, got {other:?}"),
        }
    }

    #[test]
    fn retry_uses_the_caller_supplied_backoff_not_the_default() {
        let job = job_with(1, 3);
        let before = Utc::now();
        let t = transition(
            &job,
            JobOutcome::Error {
                reason: "boom".into(),
            },
            Duration::from_secs(3600),
        );
        match t {
            Transition::Retry { scheduled_at, .. } => {
                assert!(scheduled_at >= before + chrono::Duration::seconds(3599));
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn error_entry_serializes_with_attempt_and_timestamp() {
        let entry = ErrorEntry {
            attempt: 1,
            at: Utc::now(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["attempt"], 1);
        assert_eq!(json["error"], "boom");
    }
}
