//! The pub/sub relay (§4.6) and its default in-process implementation.
//!
//! The core depends on exactly three operations — `listen`, `unlisten`,
//! `notify` — and the guarantee that local listeners receive
//! `{channel, decoded_payload}` messages. [`LocalNotifier`] is the
//! default, backend-agnostic relay: a `tokio::sync::broadcast` channel per
//! [`Channel`], mirroring the teacher's `EventBus`. `capstan-postgres`
//! wraps one of these for local fan-out and layers Postgres `LISTEN`/
//! `NOTIFY` on top for cross-node delivery; the trait makes no
//! distinction between the two at the call site.

use crate::error::CapstanError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::{broadcast, mpsc};

/// The built-in channel names (§4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Insert,
    Signal,
    Leader,
    Gossip,
    Stager,
    Sonar,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Insert,
        Channel::Signal,
        Channel::Leader,
        Channel::Gossip,
        Channel::Stager,
        Channel::Sonar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Insert => "insert",
            Channel::Signal => "signal",
            Channel::Leader => "leader",
            Channel::Gossip => "gossip",
            Channel::Stager => "stager",
            Channel::Sonar => "sonar",
        }
    }

    /// The channel name scoped by namespace prefix (§6 "Environment"),
    /// e.g. `"myapp.insert"`.
    pub fn scoped(self, prefix: &str) -> String {
        format!("{prefix}.{}", self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control directive carried on the `signal` channel (§6 payload
/// shapes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SignalPayload {
    Pause { queue: String },
    Resume { queue: String },
    Scale { queue: String, limit: usize },
    Pkill { job_id: i64 },
    Start { queue: String },
    Stop { queue: String },
}

/// A decoded message delivered to a local listener: the channel it
/// arrived on plus its JSON payload, already scope-filtered (§4.6).
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel: Channel,
    pub payload: Value,
}

/// Receiving half handed back by [`Notifier::listen`]. A listener on
/// multiple channels gets one forwarding task per requested channel, each
/// draining its own broadcast subscription into a shared `mpsc` channel
/// this stream reads from — so a producer listening on both `insert` and
/// `signal` (§4.2) actually receives both, not just whichever channel
/// happened to be first in the slice. A lagged subscriber is logged and
/// treated as a dropped notification, never surfaced as an error the
/// caller must recover from (§4.6 "Semantics": at-most-once, no buffering
/// on disconnect).
pub struct NotificationStream {
    inner: mpsc::Receiver<Notification>,
    ident: Option<String>,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
}

impl NotificationStream {
    fn new(inner: mpsc::Receiver<Notification>, ident: Option<String>, forwarders: Vec<tokio::task::JoinHandle<()>>) -> Self {
        Self { inner, ident, forwarders }
    }

    /// Wait for the next notification addressed to this listener's scope.
    /// Returns `None` only if every forwarding task has exited (the
    /// notifier was dropped).
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            let notification = self.inner.recv().await?;
            if scope_matches(&notification.payload, self.ident.as_deref()) {
                return Some(notification);
            }
        }
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

/// Drain one channel's broadcast subscription into the stream's shared
/// `mpsc` sender until the stream is dropped or the broadcast sender goes
/// away.
fn spawn_forwarder(mut rx: broadcast::Receiver<Notification>, tx: mpsc::Sender<Notification>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    if tx.send(notification).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notifier subscriber lagged, dropping notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// §4.6 "Scope filtering": payloads carrying an `ident` key are only
/// delivered to listeners whose identity matches, or whose `ident` is
/// `"any"`. Payloads without `ident` are delivered unfiltered.
fn scope_matches(payload: &Value, listener_ident: Option<&str>) -> bool {
    let Some(payload_ident) = payload.get("ident").and_then(Value::as_str) else {
        return true;
    };
    if payload_ident == "any" {
        return true;
    }
    listener_ident == Some(payload_ident)
}

/// The pub/sub boundary the core depends on (§4.6).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Subscribe to one or more channels, scoped to `ident` (typically
    /// `"{instance}.{node}"`; `None` receives everything regardless of
    /// `ident` filtering).
    async fn listen(&self, channels: &[Channel], ident: Option<String>) -> NotificationStream;

    /// Channels are broadcast-backed; there is no per-subscriber
    /// unsubscribe handle to revoke short of dropping the stream, so this
    /// is a no-op retained for interface symmetry with backends (e.g.
    /// Postgres `UNLISTEN`) that do have one to release.
    async fn unlisten(&self, _channels: &[Channel]) {}

    /// Publish a payload on `channel`. Backends may compress large
    /// payloads transparently (§4.6 "Payload"); callers always pass plain
    /// JSON.
    async fn notify(&self, channel: Channel, payload: Value) -> Result<(), CapstanError>;
}

/// Default in-process relay: one `broadcast::Sender` per [`Channel`].
/// Capacity is generous (notifications are small control messages, not a
/// durability path) but finite, so a stalled listener lags rather than
/// growing the ring buffer unboundedly.
pub struct LocalNotifier {
    channels: [broadcast::Sender<Notification>; 6],
}

const DEFAULT_CAPACITY: usize = 1024;

impl LocalNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| broadcast::channel(capacity).0),
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Notification> {
        &self.channels[Channel::ALL.iter().position(|c| *c == channel).unwrap()]
    }
}

impl Default for LocalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn listen(&self, channels: &[Channel], ident: Option<String>) -> NotificationStream {
        let channels: &[Channel] = if channels.is_empty() { &[Channel::Insert] } else { channels };
        let (tx, rx) = mpsc::channel(DEFAULT_CAPACITY);
        let forwarders = channels
            .iter()
            .map(|&channel| spawn_forwarder(self.sender(channel).subscribe(), tx.clone()))
            .collect();
        NotificationStream::new(rx, ident, forwarders)
    }

    async fn notify(&self, channel: Channel, payload: Value) -> Result<(), CapstanError> {
        // No subscribers is not an error (§4.6: "slow listeners do not
        // backpressure publishers"); a closed channel with zero receivers
        // returns `Err` from `broadcast::Sender::send`, which we swallow.
        let _ = self.sender(channel).send(Notification { channel, payload });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unfiltered_payload_reaches_every_listener() {
        let notifier = LocalNotifier::new();
        let mut a = notifier.listen(&[Channel::Insert], Some("inst.node-a".into())).await;
        let mut b = notifier.listen(&[Channel::Insert], Some("inst.node-b".into())).await;

        notifier
            .notify(Channel::Insert, json!([{"queue": "alpha"}]))
            .await
            .unwrap();

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn scoped_payload_only_reaches_matching_ident() {
        let notifier = LocalNotifier::new();
        let mut mine = notifier.listen(&[Channel::Signal], Some("inst.node-a".into())).await;
        let mut other = notifier.listen(&[Channel::Signal], Some("inst.node-b".into())).await;

        notifier
            .notify(
                Channel::Signal,
                json!({"ident": "inst.node-a", "action": "pause", "queue": "alpha"}),
            )
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(50), mine.recv())
            .await
            .expect("mine should receive promptly");
        assert!(received.is_some());

        let missed = tokio::time::timeout(std::time::Duration::from_millis(50), other.recv()).await;
        assert!(missed.is_err(), "other node should not see a scoped payload for node-a");
    }

    #[tokio::test]
    async fn listening_on_multiple_channels_receives_from_all_of_them() {
        let notifier = LocalNotifier::new();
        let mut inbox = notifier
            .listen(&[Channel::Insert, Channel::Signal], Some("inst.node-a".into()))
            .await;

        notifier.notify(Channel::Insert, json!([{"queue": "alpha"}])).await.unwrap();
        notifier
            .notify(Channel::Signal, json!({"action": "pause", "queue": "alpha"}))
            .await
            .unwrap();

        let first = inbox.recv().await.expect("insert notification");
        let second = inbox.recv().await.expect("signal notification");
        let channels: Vec<Channel> = vec![first.channel, second.channel];
        assert!(channels.contains(&Channel::Insert));
        assert!(channels.contains(&Channel::Signal));
    }

    #[tokio::test]
    async fn any_ident_reaches_every_listener() {
        let notifier = LocalNotifier::new();
        let mut listener = notifier.listen(&[Channel::Leader], Some("inst.node-a".into())).await;

        notifier
            .notify(Channel::Leader, json!({"ident": "any", "down": "inst"}))
            .await
            .unwrap();

        assert!(listener.recv().await.is_some());
    }

    #[test]
    fn channel_scoped_name_carries_prefix() {
        assert_eq!(Channel::Insert.scoped("myapp"), "myapp.insert");
    }

    #[test]
    fn signal_payload_round_trips_through_json() {
        let payload = SignalPayload::Scale {
            queue: "alpha".into(),
            limit: 5,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["action"], "scale");
        let back: SignalPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
