//! Leader election (§4.5). One Peer actor contends, on a timer, for the
//! single-leader row scoped to the instance name; [`PeerHandle::is_leader`]
//! and [`PeerHandle::leader_node`] are read without going through the
//! actor's mailbox via a `watch` channel, since the Stager polls this on
//! every tick.

use crate::error::CapstanError;
use crate::notify::{Channel, Notifier};
use crate::store::{PeerOutcome, PeerStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionState {
    pub is_leader: bool,
    pub leader_node: Option<String>,
}

impl ElectionState {
    fn unknown() -> Self {
        Self {
            is_leader: false,
            leader_node: None,
        }
    }
}

pub enum PeerCommand {
    Shutdown,
}

#[derive(Clone)]
pub struct PeerHandle {
    commands: mpsc::Sender<PeerCommand>,
    state: watch::Receiver<ElectionState>,
}

impl PeerHandle {
    pub fn is_leader(&self) -> bool {
        self.state.borrow().is_leader
    }

    pub fn leader_node(&self) -> Option<String> {
        self.state.borrow().leader_node.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(PeerCommand::Shutdown).await;
    }
}

/// Spawn the Peer actor for `instance`/`node`, electing every `interval`
/// (shortened by `leader_interval_divisor` once this node is the leader,
/// §4.5 "sticky" leadership) with a row TTL of `ttl`.
pub fn spawn(
    instance: String,
    node: String,
    interval: Duration,
    leader_interval_divisor: u32,
    ttl: Duration,
    store: Arc<dyn PeerStore>,
    notifier: Arc<dyn Notifier>,
) -> PeerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PeerCommand>(16);
    let (state_tx, state_rx) = watch::channel(ElectionState::unknown());

    tokio::spawn(async move {
        let leader_interval = interval
            .checked_div(leader_interval_divisor.max(1))
            .unwrap_or(interval);
        let mut next_delay = interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(next_delay) => {
                    let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(45));
                    match store.contend(&instance, &node, ttl_chrono).await {
                        Ok(PeerOutcome::Leader) => {
                            let was_leader = state_tx.borrow().is_leader;
                            let _ = state_tx.send(ElectionState {
                                is_leader: true,
                                leader_node: Some(node.clone()),
                            });
                            if !was_leader {
                                tracing::info!(instance = %instance, node = %node, "became leader");
                            }
                            next_delay = leader_interval;
                        }
                        Ok(PeerOutcome::Follower { leader_node }) => {
                            let _ = state_tx.send(ElectionState {
                                is_leader: false,
                                leader_node: Some(leader_node),
                            });
                            next_delay = interval;
                        }
                        Err(err) => {
                            // §4.5 point 3: on rollback/transient error,
                            // preserve the prior `leader?` value. Do not flap.
                            tracing::warn!(error = %err, "peer election tick failed, preserving prior state");
                            next_delay = interval;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PeerCommand::Shutdown) | None => {
                            resign_if_leader(&store, &notifier, &instance, &node, &state_tx).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    PeerHandle {
        commands: cmd_tx,
        state: state_rx,
    }
}

/// §4.5 point 4: on graceful termination, if leader, delete the row and
/// broadcast `down` on the `leader` channel so peers may immediately
/// re-contest rather than waiting out the expired TTL.
async fn resign_if_leader(
    store: &Arc<dyn PeerStore>,
    notifier: &Arc<dyn Notifier>,
    instance: &str,
    node: &str,
    state_tx: &watch::Sender<ElectionState>,
) {
    if !state_tx.borrow().is_leader {
        return;
    }
    if let Err(err) = store.resign(instance, node).await {
        tracing::warn!(error = %err, "failed to resign leader row on shutdown");
        return;
    }
    if let Err(err) = notifier
        .notify(Channel::Leader, json!({"down": instance}))
        .await
    {
        tracing::warn!(error = %err, "failed to broadcast leader resignation");
    }
}

/// Return the current leader, querying the store directly (bypassing a
/// running actor), used by callers that only need a one-shot read.
pub async fn get_leader(store: &dyn PeerStore, instance: &str) -> Result<Option<String>, CapstanError> {
    store.current_leader(instance).await
}
