//! Dynamic dispatch to user code (§9 "Dynamic dispatch to user code", §4.3).
//!
//! `worker` is a string at rest on the job row. [`WorkerRegistry`] resolves
//! it to an `Arc<dyn Worker>` built once at startup from the application's
//! own worker implementations; a miss is a recoverable
//! [`crate::error::CapstanError::WorkerResolutionError`], not a panic.

use crate::backoff::backoff_for_attempt;
use crate::job::{Job, JobOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// User-implemented unit of work. One `Worker` instance backs every job
/// whose `worker` string matches the name it's registered under.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute the job. The default transition mapping (§4.3 point 4) is
    /// applied by the executor to whatever [`JobOutcome`] this returns.
    async fn perform(&self, job: &Job) -> JobOutcome;

    /// Effective timeout for a specific job. `None` means unbounded,
    /// matching the spec's default.
    fn timeout(&self, _job: &Job) -> Option<Duration> {
        None
    }

    /// Backoff before the next retry, given the attempt that just failed.
    /// Workers may override; the default is §4.3 point 5.
    fn backoff(&self, attempt: i32) -> Duration {
        backoff_for_attempt(attempt)
    }
}

/// Maps `worker` strings to the `Arc<dyn Worker>` that handles them.
/// Built once at startup; lookups never mutate it afterward.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under a name. Overwrites any prior registration
    /// under the same name, mirroring a builder reconfigured before startup
    /// rather than a runtime re-registration path.
    pub fn register(&mut self, name: impl Into<String>, worker: Arc<dyn Worker>) -> &mut Self {
        self.workers.insert(name.into(), worker);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("registered", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    struct NoopWorker;

    #[async_trait]
    impl Worker for NoopWorker {
        async fn perform(&self, _job: &Job) -> JobOutcome {
            JobOutcome::Complete
        }
    }

    fn sample_job() -> Job {
        Job {
            id: 1,
            state: crate::job::JobState::Executing,
            queue: "alpha".into(),
            worker: "Noop".into(),
            args: Value::Object(Default::default()),
            meta: Value::Object(Default::default()),
            tags: vec![],
            attempt: 1,
            max_attempts: 20,
            priority: 0,
            errors: vec![],
            attempted_by: vec![],
            inserted_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempted_at: Some(Utc::now()),
            completed_at: None,
            cancelled_at: None,
            discarded_at: None,
        }
    }

    #[test]
    fn registry_resolves_registered_worker() {
        let mut registry = WorkerRegistry::new();
        registry.register("Noop", Arc::new(NoopWorker));
        assert!(registry.resolve("Noop").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_miss_is_none_not_panic() {
        let registry = WorkerRegistry::new();
        assert!(registry.resolve("Missing").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn default_timeout_is_unbounded() {
        let worker = NoopWorker;
        assert!(worker.timeout(&sample_job()).is_none());
    }

    #[tokio::test]
    async fn default_perform_runs_through_trait_object() {
        let mut registry = WorkerRegistry::new();
        registry.register("Noop", Arc::new(NoopWorker));
        let worker = registry.resolve("Noop").unwrap();
        let outcome = worker.perform(&sample_job()).await;
        assert!(matches!(outcome, JobOutcome::Complete));
    }

    #[test]
    fn debug_impl_lists_registered_names() {
        let mut registry = WorkerRegistry::new();
        registry.register("Noop", Arc::new(NoopWorker));
        let debug = format!("{:?}", registry);
        assert!(debug.contains("Noop"));
    }
}
