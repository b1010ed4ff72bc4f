//! [`PgNotifier`]: cross-node fan-out over Postgres `LISTEN`/`NOTIFY`,
//! layered on top of a private [`LocalNotifier`] for the in-process half
//! of delivery (§4.6).
//!
//! One dedicated connection (`PgListener`) runs a background task that
//! forwards every `NOTIFY` it sees — including the ones this same process
//! just published, Postgres makes no distinction — into the local relay.
//! Publishing always goes out over SQL `pg_notify`, never directly into
//! the local relay, so there is exactly one delivery path regardless of
//! whether the listener happens to be on the same node. Grounded in the
//! `PgListener` + `select!` shape from
//! `other_examples/8f6cd3e7_thalamiq-zunder__apps-server-src-queue-postgres.rs.rs`.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use base64::Engine;
use capstan_core::{CapstanError, Channel, LocalNotifier, NotificationStream, Notifier};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::io::Read;
use std::sync::Arc;

/// Payloads at or above this size (bytes of UTF-8 JSON) are gzip+base64
/// compressed before publishing (§4.6 "Payload"). Chosen comfortably
/// below Postgres's 8000-byte `NOTIFY` payload ceiling.
const COMPRESS_THRESHOLD: usize = 6000;

const COMPRESSED_PREFIX: &str = "gz:";

fn encode_payload(payload: &Value) -> String {
    let raw = payload.to_string();
    if raw.len() < COMPRESS_THRESHOLD {
        return raw;
    }

    let mut encoder = GzEncoder::new(raw.as_bytes(), Compression::default());
    let mut compressed = Vec::new();
    if encoder.read_to_end(&mut compressed).is_err() {
        return raw;
    }
    format!(
        "{COMPRESSED_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(compressed)
    )
}

fn decode_payload(raw: &str) -> Option<Value> {
    if let Some(encoded) = raw.strip_prefix(COMPRESSED_PREFIX) {
        let compressed = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).ok()?;
        return serde_json::from_str(&decompressed).ok();
    }
    serde_json::from_str(raw).ok()
}

fn channel_for(scoped_name: &str, prefix: &str) -> Option<Channel> {
    let name = scoped_name.strip_prefix(prefix)?.strip_prefix('.')?;
    Channel::ALL.into_iter().find(|c| c.as_str() == name)
}

pub struct PgNotifier {
    pool: PgPool,
    local: Arc<LocalNotifier>,
    prefix: String,
}

impl PgNotifier {
    /// Open a dedicated `LISTEN` connection for every built-in channel
    /// (scoped by `prefix`) and start relaying into the local broadcast
    /// bus. The returned notifier is immediately usable; the background
    /// task keeps running for its lifetime.
    pub async fn connect(pool: PgPool, prefix: impl Into<String>) -> Result<Self, CapstanError> {
        let prefix = prefix.into();
        let mut listener = PgListener::connect_with(&pool).await.map_err(map_sqlx_error)?;
        for channel in Channel::ALL {
            listener
                .listen(&channel.scoped(&prefix))
                .await
                .map_err(map_sqlx_error)?;
        }

        let local = Arc::new(LocalNotifier::new());
        let relay_prefix = prefix.clone();
        let relay_local = local.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let Some(channel) = channel_for(notification.channel(), &relay_prefix) else {
                            continue;
                        };
                        let Some(payload) = decode_payload(notification.payload()) else {
                            tracing::warn!(channel = %channel, "dropping malformed notification payload");
                            continue;
                        };
                        let _ = relay_local.notify(channel, payload).await;
                    }
                    Err(error) => {
                        // `PgListener` reconnects transparently; a recv error here
                        // means the connection is being rebuilt, not that the
                        // notifier is permanently broken.
                        tracing::warn!(%error, "postgres listen connection interrupted, reconnecting");
                    }
                }
            }
        });

        Ok(Self { pool, local, prefix })
    }

    /// Construct without spawning the listener task, for callers that
    /// only ever publish (e.g. a one-shot operator CLI) and don't need
    /// to receive relayed notifications.
    pub fn publish_only(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            local: Arc::new(LocalNotifier::new()),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn listen(&self, channels: &[Channel], ident: Option<String>) -> NotificationStream {
        self.local.listen(channels, ident).await
    }

    async fn unlisten(&self, channels: &[Channel]) {
        self.local.unlisten(channels).await
    }

    async fn notify(&self, channel: Channel, payload: Value) -> Result<(), CapstanError> {
        let encoded = encode_payload(&payload);
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel.scoped(&self.prefix))
            .bind(encoded)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
