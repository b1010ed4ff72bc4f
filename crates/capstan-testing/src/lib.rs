//! # capstan-testing
//!
//! In-memory `JobStore`/`PeerStore` fakes plus job fixture builders for
//! exercising `capstan-core` and worker implementations built on it
//! without a database. [`capstan_core::LocalNotifier`] already serves as
//! the in-process `Notifier` fake and is re-exported here so callers don't
//! need a direct `capstan-core` dependency just to wire up a test harness.

pub mod fixtures;
pub mod job_store;
pub mod peer_store;

pub use capstan_core::LocalNotifier;
pub use job_store::{always_leader, snapshot, InMemoryJobStore};
pub use peer_store::{AlwaysLeader, InMemoryPeerStore};
