//! # Capstan
//!
//! A durable, Postgres-backed background job processing core: jobs live
//! in a relational table and are discovered, claimed, executed, and
//! transitioned through a state machine across one or more worker nodes
//! sharing the same database, with at-least-once execution guarantees
//! and cooperative shutdown.
//!
//! This crate is backend-agnostic: it depends on three traits —
//! [`store::JobStore`], [`store::PeerStore`], [`notify::Notifier`] — and
//! ships none of their implementations. `capstan-postgres` implements
//! them against Postgres; `capstan-testing` implements them in memory.
//!
//! ## Components
//!
//! - [`job`] / [`state_machine`] — the canonical job record and its pure
//!   transition function.
//! - [`worker`] — the `Worker` trait and registry user code is resolved
//!   through.
//! - [`executor`] — safe invocation of a claimed job's worker.
//! - [`producer`] — the per-queue claim/dispatch/supervise loop.
//! - [`stager`] — periodic promotion of due scheduled/retryable jobs.
//! - [`peer`] — single-leader election scoped to an instance name.
//! - [`sonar`] — cluster connectivity classification.
//! - [`notify`] — the pub/sub relay and its default in-process impl.
//! - [`watchman`] / [`midwife`] — graceful per-queue shutdown and dynamic
//!   queue lifecycle.
//! - [`registry`] — the `(instance, role, queue?)` handle lookup table.
//! - [`supervisor`] — wires all of the above under an instance name.
//!
//! ## Example
//!
//! ```ignore
//! use capstan_core::{Config, QueueConfig, Instance, WorkerRegistry};
//! use std::sync::Arc;
//!
//! let config = Config::new("myapp", "node-1")
//!     .with_queue(QueueConfig::new("default", 10));
//!
//! let mut workers = WorkerRegistry::new();
//! workers.register("SendEmail", Arc::new(SendEmailWorker));
//!
//! let instance = Instance::start(config, job_store, peer_store, notifier, Arc::new(workers))?;
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod midwife;
pub mod notify;
pub mod peer;
pub mod producer;
pub mod registry;
pub mod sonar;
pub mod stager;
pub mod state_machine;
pub mod store;
pub mod supervisor;
pub mod watchman;
pub mod worker;

pub use config::{Config, QueueConfig, StageInterval};
pub use error::{CapstanError, Categorizable, ErrorCategory};
pub use job::{ErrorEntry, Job, JobOutcome, JobState, NewJob, Transition};
pub use notify::{Channel, LocalNotifier, Notification, NotificationStream, Notifier, SignalPayload};
pub use producer::ProducerHandle;
pub use registry::{Registry, Role};
pub use sonar::ClusterStatus;
pub use state_machine::transition;
pub use store::{JobStore, PeerOutcome, PeerStore, QueueSnapshot, StagedJob};
pub use supervisor::Instance;
pub use worker::{Worker, WorkerRegistry};

pub use async_trait::async_trait;
