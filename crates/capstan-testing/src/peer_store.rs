//! [`InMemoryPeerStore`]: a `PeerStore` fake mirroring
//! `capstan-postgres::PgPeerStore`'s contend/resign semantics (§4.5)
//! without a database — one row per instance name, guarded by a `Mutex`.

use async_trait::async_trait;
use capstan_core::{CapstanError, PeerOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

struct Row {
    node: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryPeerStore {
    rows: Mutex<HashMap<String, Row>>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl capstan_core::PeerStore for InMemoryPeerStore {
    async fn contend(&self, name: &str, node: &str, ttl: chrono::Duration) -> Result<PeerOutcome, CapstanError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();

        if rows.get(name).map(|row| row.expires_at < now).unwrap_or(false) {
            rows.remove(name);
        }

        match rows.get_mut(name) {
            Some(row) if row.node == node => {
                row.expires_at = now + ttl;
                Ok(PeerOutcome::Leader)
            }
            Some(row) => Ok(PeerOutcome::Follower {
                leader_node: row.node.clone(),
            }),
            None => {
                rows.insert(
                    name.to_string(),
                    Row {
                        node: node.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(PeerOutcome::Leader)
            }
        }
    }

    async fn resign(&self, name: &str, node: &str) -> Result<(), CapstanError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.get(name).map(|row| row.node == node).unwrap_or(false) {
            rows.remove(name);
        }
        Ok(())
    }

    async fn current_leader(&self, name: &str) -> Result<Option<String>, CapstanError> {
        let now = Utc::now();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(name)
            .filter(|row| row.expires_at >= now)
            .map(|row| row.node.clone()))
    }
}

/// A [`capstan_core::PeerStore`] that always reports `node` as leader,
/// for tests that only care about the stager's leader-only staging path
/// and don't want to exercise the election tick itself.
pub struct AlwaysLeader {
    pub node: String,
}

impl AlwaysLeader {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

#[async_trait]
impl capstan_core::PeerStore for AlwaysLeader {
    async fn contend(&self, _name: &str, _node: &str, _ttl: chrono::Duration) -> Result<PeerOutcome, CapstanError> {
        Ok(PeerOutcome::Leader)
    }

    async fn resign(&self, _name: &str, _node: &str) -> Result<(), CapstanError> {
        Ok(())
    }

    async fn current_leader(&self, _name: &str) -> Result<Option<String>, CapstanError> {
        Ok(Some(self.node.clone()))
    }
}
