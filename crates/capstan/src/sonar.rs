//! Cluster connectivity sensor (§4.7).
//!
//! Each node periodically publishes `{node, ping}` on the `sonar` channel
//! and keeps a `node -> last_seen` map of everyone it's heard from,
//! including itself. The derived [`ClusterStatus`] drives the Stager's
//! mode selection (§4.4).

use crate::notify::{Channel, Notifier};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// The tri-state connectivity classification (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    /// Nobody heard from, not even ourselves (startup grace period).
    Isolated,
    /// Only our own ping has been seen.
    Solitary,
    /// At least one other node has been seen.
    Clustered,
}

#[derive(Debug, Serialize, Deserialize)]
struct SonarPing {
    node: String,
    ping: SonarPingMarker,
}

#[derive(Debug, Serialize, Deserialize)]
enum SonarPingMarker {
    #[serde(rename = "ping")]
    Ping,
}

/// Commands the Sonar actor accepts. Currently just a shutdown signal;
/// Sonar has no operator-facing controls beyond observing its status.
pub enum SonarCommand {
    Shutdown,
}

/// A running Sonar actor's handle: the command sender plus a `watch`
/// channel readable by the Stager (and anything else) without going
/// through the actor's mailbox.
#[derive(Clone)]
pub struct SonarHandle {
    commands: mpsc::Sender<SonarCommand>,
    status: watch::Receiver<ClusterStatus>,
}

impl SonarHandle {
    pub fn status(&self) -> ClusterStatus {
        *self.status.borrow()
    }

    pub async fn watch_status(&self) -> watch::Receiver<ClusterStatus> {
        self.status.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SonarCommand::Shutdown).await;
    }
}

/// Spawn the Sonar actor. `node` is this node's identity; `interval` is
/// the ping cadence; `stale_multiplier` sets how many missed pings before
/// a peer is pruned (`interval * stale_multiplier`).
pub fn spawn(
    node: String,
    prefix: String,
    interval: Duration,
    stale_multiplier: u32,
    notifier: Arc<dyn Notifier>,
) -> SonarHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SonarCommand>(16);
    let (status_tx, status_rx) = watch::channel(ClusterStatus::Isolated);

    tokio::spawn(async move {
        let mut last_seen: HashMap<String, Instant> = HashMap::new();
        let stale_after = interval.saturating_mul(stale_multiplier.max(1));
        let mut ticker = tokio::time::interval(interval);
        let mut inbox = notifier.listen(&[Channel::Sonar], None).await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    last_seen.insert(node.clone(), Instant::now());
                    let payload = serde_json::to_value(SonarPing {
                        node: node.clone(),
                        ping: SonarPingMarker::Ping,
                    }).unwrap_or(serde_json::Value::Null);
                    if let Err(err) = notifier.notify(Channel::Sonar, payload).await {
                        tracing::warn!(error = %err, "sonar failed to publish ping");
                    }
                    prune_stale(&mut last_seen, stale_after);
                    publish_status(&node, &last_seen, &status_tx, &prefix);
                }
                notification = inbox.recv() => {
                    let Some(notification) = notification else { break };
                    if let Ok(ping) = serde_json::from_value::<SonarPing>(notification.payload) {
                        last_seen.insert(ping.node, Instant::now());
                        publish_status(&node, &last_seen, &status_tx, &prefix);
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SonarCommand::Shutdown) | None => break,
                    }
                }
            }
        }
    });

    SonarHandle {
        commands: cmd_tx,
        status: status_rx,
    }
}

fn prune_stale(last_seen: &mut HashMap<String, Instant>, stale_after: Duration) {
    let now = Instant::now();
    last_seen.retain(|_, seen_at| now.duration_since(*seen_at) <= stale_after);
}

fn publish_status(
    node: &str,
    last_seen: &HashMap<String, Instant>,
    status_tx: &watch::Sender<ClusterStatus>,
    _prefix: &str,
) {
    let status = classify(node, last_seen);
    if *status_tx.borrow() != status {
        tracing::info!(?status, node, at = %Utc::now(), "sonar status changed");
    }
    let _ = status_tx.send(status);
}

/// Pure classification rule (§4.7): empty map -> isolated, only self ->
/// solitary, more than one node -> clustered.
fn classify(node: &str, last_seen: &HashMap<String, Instant>) -> ClusterStatus {
    match last_seen.len() {
        0 => ClusterStatus::Isolated,
        1 if last_seen.contains_key(node) => ClusterStatus::Solitary,
        1 => ClusterStatus::Clustered,
        _ => ClusterStatus::Clustered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LocalNotifier;
    use std::time::Duration as StdDuration;

    #[test]
    fn empty_map_is_isolated() {
        let map = HashMap::new();
        assert_eq!(classify("node-a", &map), ClusterStatus::Isolated);
    }

    #[test]
    fn only_self_is_solitary() {
        let mut map = HashMap::new();
        map.insert("node-a".to_string(), Instant::now());
        assert_eq!(classify("node-a", &map), ClusterStatus::Solitary);
    }

    #[test]
    fn self_plus_other_is_clustered() {
        let mut map = HashMap::new();
        map.insert("node-a".to_string(), Instant::now());
        map.insert("node-b".to_string(), Instant::now());
        assert_eq!(classify("node-a", &map), ClusterStatus::Clustered);
    }

    #[test]
    fn stale_entries_are_pruned() {
        let mut map = HashMap::new();
        map.insert("node-a".to_string(), Instant::now() - StdDuration::from_secs(100));
        prune_stale(&mut map, StdDuration::from_secs(10));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn solitary_node_reports_solitary_after_one_tick() {
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let handle = spawn(
            "node-a".into(),
            "capstan".into(),
            StdDuration::from_millis(20),
            3,
            notifier,
        );
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(handle.status(), ClusterStatus::Solitary);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn two_nodes_sharing_a_notifier_see_each_other_as_clustered() {
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let a = spawn(
            "node-a".into(),
            "capstan".into(),
            StdDuration::from_millis(20),
            5,
            notifier.clone(),
        );
        let b = spawn(
            "node-b".into(),
            "capstan".into(),
            StdDuration::from_millis(20),
            5,
            notifier,
        );
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(a.status(), ClusterStatus::Clustered);
        assert_eq!(b.status(), ClusterStatus::Clustered);
        a.shutdown().await;
        b.shutdown().await;
    }
}
