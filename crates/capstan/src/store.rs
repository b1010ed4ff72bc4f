//! Backend traits the core depends on for durable state (§6 "Backend traits
//! (core-side)").
//!
//! Three traits, each `async_trait` with `Send + Sync` so a single
//! implementation can be shared across actor tasks behind an `Arc`:
//! [`JobStore`] for the jobs table, [`PeerStore`] for leader election, and
//! [`crate::notify::Notifier`] for the pub/sub relay (kept in its own
//! module since it has no SQL analogue).

use crate::error::CapstanError;
use crate::job::{Job, NewJob, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A row promoted from `scheduled`/`retryable` to `available` by the
/// Stager's staging query (§4.4 point 2).
#[derive(Debug, Clone)]
pub struct StagedJob {
    pub id: i64,
    pub queue: String,
    pub worker: String,
}

/// The result of [`JobStore::check_queue`] (§6 operational surface).
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub queue: String,
    pub node: String,
    pub limit: usize,
    pub paused: bool,
    pub running: Vec<i64>,
    pub started_at: DateTime<Utc>,
}

/// The durable jobs-table boundary. Implementations own their own
/// connection pooling and transaction handling; every method here either
/// succeeds or returns a [`CapstanError`] whose category tells the caller
/// whether to retry (§7 propagation policy).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job, returning it as persisted (with `id` assigned).
    async fn insert(&self, job: NewJob) -> Result<Job, CapstanError>;

    /// Atomically claim up to `demand` `available` rows for `queue`,
    /// transitioning them to `executing` (§4.1 claim query). Ordered by
    /// `(priority, scheduled_at, id)`. May return fewer than `demand` rows,
    /// including zero.
    async fn claim(&self, queue: &str, demand: usize, node: &str) -> Result<Vec<Job>, CapstanError>;

    /// Promote up to `limit` due `scheduled`/`retryable` rows to
    /// `available` (§4.4 staging algorithm). Returns the distinct set of
    /// promoted rows so the caller can build the `insert` notification
    /// payload.
    async fn stage(&self, limit: usize) -> Result<Vec<StagedJob>, CapstanError>;

    /// Apply a terminal (or scheduling) [`Transition`] to a claimed job,
    /// appending to `errors` rather than overwriting it. Returns the job
    /// as it stands after the update.
    async fn finalize(&self, id: i64, transition: Transition) -> Result<Job, CapstanError>;

    /// Operator-initiated cancel (§4.1 "any non-terminal -> cancelled").
    /// Idempotent: cancelling an already-terminal job is a no-op that
    /// returns the job unchanged.
    async fn cancel(&self, id: i64) -> Result<Job, CapstanError>;

    /// Operator-initiated retry of a terminal job: attempts are preserved,
    /// `max_attempts` is raised if it was already saturated, and state
    /// moves to `available`.
    async fn retry(&self, id: i64) -> Result<Job, CapstanError>;

    /// Look up a single job by id, or `None` if it doesn't exist.
    async fn fetch_job(&self, id: i64) -> Result<Option<Job>, CapstanError>;
}

/// The outcome of one election tick (§4.5 point 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOutcome {
    /// This node holds (or now holds) the leader row.
    Leader,
    /// A different node holds the leader row.
    Follower { leader_node: String },
}

/// The `peers` table boundary (§4.5).
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Delete expired rows, then upsert this node's claim with a fresh
    /// `expires_at`. Returns whether this node is the leader after the
    /// attempt.
    async fn contend(&self, name: &str, node: &str, ttl: chrono::Duration) -> Result<PeerOutcome, CapstanError>;

    /// Graceful resignation: delete the row if (and only if) it is still
    /// held by `node`. A no-op if some other node already holds it.
    async fn resign(&self, name: &str, node: &str) -> Result<(), CapstanError>;

    /// The `node` of the current unexpired holder, if any.
    async fn current_leader(&self, name: &str) -> Result<Option<String>, CapstanError>;
}
