//! # capstan-postgres
//!
//! The Postgres backend for `capstan-core`: [`job_store::PgJobStore`],
//! [`peer_store::PgPeerStore`], and [`notifier::PgNotifier`] implement the
//! core's three backend traits (`JobStore`, `PeerStore`, `Notifier`)
//! against a single `capstan_jobs` / `capstan_peers` schema (§6).
//!
//! Running [`schema::MIGRATION`] against the target database is the
//! caller's responsibility — this crate does not manage migrations, only
//! assumes the schema it describes is present.

mod error;
pub mod job_store;
pub mod notifier;
pub mod peer_store;
pub mod schema;

pub use error::map_sqlx_error;
pub use job_store::PgJobStore;
pub use notifier::PgNotifier;
pub use peer_store::PgPeerStore;
pub use schema::MIGRATION;
