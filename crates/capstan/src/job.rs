//! The durable job record and its state machine.
//!
//! [`Job`] is the central entity this crate operates on. It is a plain data
//! struct, independent of any SQL row type — backends map their own rows
//! into it at the boundary (see `capstan-postgres`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Maximum byte length of a `queue` or `worker` name.
pub const MAX_NAME_LEN: usize = 128;

/// Upper bound on `max_attempts`.
pub const MAX_ATTEMPTS_CEILING: i32 = 99;

/// One of the canonical job states.
///
/// Terminal states (`Completed`, `Discarded`, `Cancelled`) are absorbing:
/// no transition originates from them except an operator-initiated retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Available,
    Executing,
    Retryable,
    Completed,
    Discarded,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Discarded | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Available => "available",
            JobState::Executing => "executing",
            JobState::Retryable => "retryable",
            JobState::Completed => "completed",
            JobState::Discarded => "discarded",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`JobState`] from a string that isn't one of the seven
/// canonical state names.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized job state: {0}")]
pub struct ParseJobStateError(pub String);

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobState::Scheduled),
            "available" => Ok(JobState::Available),
            "executing" => Ok(JobState::Executing),
            "retryable" => Ok(JobState::Retryable),
            "completed" => Ok(JobState::Completed),
            "discarded" => Ok(JobState::Discarded),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(ParseJobStateError(other.to_string())),
        }
    }
}

/// One entry in a job's `errors` history, appended (never overwritten) on
/// each failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub attempt: i32,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// The central durable entity.
///
/// Ownership of a `Job` belongs exclusively to the backing store; this
/// struct is the in-process read of a row, not a handle to it. Mutating a
/// `Job` in memory has no durable effect — transitions only take effect
/// once applied through a [`crate::store::JobStore`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub state: JobState,
    pub queue: String,
    pub worker: String,
    pub args: Value,
    pub meta: Value,
    pub tags: Vec<String>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub errors: Vec<ErrorEntry>,
    pub attempted_by: Vec<String>,
    pub inserted_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub discarded_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `0 <= attempt <= max_attempts` and the name-length bounds from §3.
    pub fn invariants_hold(&self) -> bool {
        self.attempt >= 0
            && self.attempt <= self.max_attempts
            && self.max_attempts > 0
            && self.max_attempts <= MAX_ATTEMPTS_CEILING
            && !self.queue.is_empty()
            && self.queue.len() <= MAX_NAME_LEN
            && self.worker.len() <= MAX_NAME_LEN
            && (0..=9).contains(&self.priority)
    }
}

/// The producer-facing shape used to insert a new job (§6 insertion API is
/// out of scope; this is the one struct the core itself accepts to build a
/// row, shared by direct insertion and by operator `retry`).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub worker: String,
    pub args: Value,
    pub meta: Value,
    pub tags: Vec<String>,
    pub max_attempts: i32,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(queue: impl Into<String>, worker: impl Into<String>, args: Value) -> Self {
        Self {
            queue: queue.into(),
            worker: worker.into(),
            args,
            meta: Value::Object(Default::default()),
            tags: Vec::new(),
            max_attempts: 20,
            priority: 0,
            scheduled_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// The outcome `perform` (or the executor's fault handling) resolved to,
/// before it has been mapped to a durable [`Transition`]. Mirrors §4.3's
/// return-value table.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Complete,
    Cancel { reason: String },
    Error { reason: String },
    Snooze { after: Duration },
}

/// A terminal (or scheduling) transition to apply to a job, produced by the
/// pure [`crate::state_machine::transition`] function and carried to a
/// [`crate::store::JobStore`] call. Kept separate from `JobOutcome` so the
/// state machine's defaulting logic (backoff, `max_attempts` bump) is
/// computed once, in one place, independent of I/O.
#[derive(Debug, Clone)]
pub enum Transition {
    Complete,
    Retry {
        scheduled_at: DateTime<Utc>,
        error: String,
    },
    Discard {
        error: String,
    },
    Cancel {
        reason: String,
    },
    Snooze {
        scheduled_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            id: 1,
            state: JobState::Available,
            queue: "alpha".into(),
            worker: "SendEmail".into(),
            args: Value::Object(Default::default()),
            meta: Value::Object(Default::default()),
            tags: vec![],
            attempt: 0,
            max_attempts: 20,
            priority: 0,
            errors: vec![],
            attempted_by: vec![],
            inserted_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempted_at: None,
            completed_at: None,
            cancelled_at: None,
            discarded_at: None,
        }
    }

    #[test]
    fn job_state_round_trips_through_its_string_form() {
        for state in [
            JobState::Scheduled,
            JobState::Available,
            JobState::Executing,
            JobState::Retryable,
            JobState::Completed,
            JobState::Discarded,
            JobState::Cancelled,
        ] {
            let parsed: JobState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn unknown_state_string_is_rejected() {
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states_are_exactly_completed_discarded_cancelled() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Discarded.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Scheduled.is_terminal());
        assert!(!JobState::Available.is_terminal());
        assert!(!JobState::Executing.is_terminal());
        assert!(!JobState::Retryable.is_terminal());
    }

    #[test]
    fn valid_job_satisfies_its_own_invariants() {
        assert!(sample_job().invariants_hold());
    }

    #[test]
    fn attempt_exceeding_max_attempts_violates_invariants() {
        let mut job = sample_job();
        job.attempt = 21;
        job.max_attempts = 20;
        assert!(!job.invariants_hold());
    }

    #[test]
    fn priority_out_of_range_violates_invariants() {
        let mut job = sample_job();
        job.priority = 10;
        assert!(!job.invariants_hold());
    }

    #[test]
    fn new_job_defaults_match_spec() {
        let job = NewJob::new("alpha", "SendEmail", serde_json::json!({}));
        assert_eq!(job.priority, 0);
        assert_eq!(job.max_attempts, 20);
        assert!(job.tags.is_empty());
    }

    #[test]
    fn new_job_builder_overrides_defaults() {
        let job = NewJob::new("alpha", "SendEmail", serde_json::json!({}))
            .with_priority(3)
            .with_max_attempts(5)
            .with_tags(vec!["urgent".into()]);
        assert_eq!(job.priority, 3);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.tags, vec!["urgent".to_string()]);
    }
}
