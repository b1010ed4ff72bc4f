//! [`PgPeerStore`]: the `capstan_peers` table boundary (§4.5 single-leader
//! election). One row per instance name; holding the row is holding
//! leadership.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use capstan_core::{CapstanError, PeerOutcome};
use chrono::Utc;
use sqlx::{PgPool, Row};

pub struct PgPeerStore {
    pool: PgPool,
}

impl PgPeerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl capstan_core::PeerStore for PgPeerStore {
    async fn contend(&self, name: &str, node: &str, ttl: chrono::Duration) -> Result<PeerOutcome, CapstanError> {
        let now = Utc::now();
        let expires_at = now + ttl;

        sqlx::query("DELETE FROM capstan_peers WHERE name = $1 AND expires_at < $2")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO capstan_peers (name, node, started_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE capstan_peers.node = EXCLUDED.node
            "#,
        )
        .bind(name)
        .bind(node)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query("SELECT node FROM capstan_peers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let holder: String = row.try_get("node").map_err(map_sqlx_error)?;
                if holder == node {
                    Ok(PeerOutcome::Leader)
                } else {
                    Ok(PeerOutcome::Follower { leader_node: holder })
                }
            }
            None => Ok(PeerOutcome::Follower {
                leader_node: String::new(),
            }),
        }
    }

    async fn resign(&self, name: &str, node: &str) -> Result<(), CapstanError> {
        sqlx::query("DELETE FROM capstan_peers WHERE name = $1 AND node = $2")
            .bind(name)
            .bind(node)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn current_leader(&self, name: &str) -> Result<Option<String>, CapstanError> {
        let row = sqlx::query("SELECT node FROM capstan_peers WHERE name = $1 AND expires_at >= NOW()")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| row.try_get("node").map_err(map_sqlx_error)).transpose()
    }
}
