//! Periodic promotion of due `scheduled`/`retryable` jobs to `available`
//! (§4.4), gated by leader election and adapted to cluster connectivity.

use crate::config::StageInterval;
use crate::notify::{Channel, Notifier};
use crate::peer::PeerHandle;
use crate::sonar::{ClusterStatus, SonarHandle};
use crate::store::JobStore;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which staging strategy is currently active (§4.4 "Modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagerMode {
    /// Only the leader stages; the promoted-queue list is broadcast on
    /// `insert` for every node's producers to react to.
    Global,
    /// Notifications aren't trusted to propagate; fall back to notifying
    /// this node's own producers directly, in-process.
    Local,
}

/// §4.4 "Mode transitions": derive the stager's mode from the Sonar's
/// cluster status and this node's leadership, given the previous mode for
/// the `Unknown`-equivalent (no-Sonar-reading-yet) case.
fn select_mode(status: ClusterStatus, is_leader: bool, previous: StagerMode) -> StagerMode {
    match status {
        ClusterStatus::Clustered => StagerMode::Global,
        ClusterStatus::Isolated => StagerMode::Local,
        ClusterStatus::Solitary => {
            if is_leader {
                StagerMode::Global
            } else {
                StagerMode::Local
            }
        }
        #[allow(unreachable_patterns)]
        _ => previous,
    }
}

pub enum StagerCommand {
    Shutdown,
}

#[derive(Clone)]
pub struct StagerHandle {
    commands: mpsc::Sender<StagerCommand>,
}

impl StagerHandle {
    pub async fn shutdown(&self) {
        let _ = self.commands.send(StagerCommand::Shutdown).await;
    }
}

/// A purely-local fallback channel the Stager uses in [`StagerMode::Local`]
/// to notify this node's own producers directly, bypassing the notifier
/// entirely (§4.4 "every node stages nothing remotely"). Every known
/// queue is pulsed unconditionally on each tick regardless of what the
/// staging query actually promoted, since this is also the polling
/// safety net (§8) for inserts that never produced a notification.
pub trait LocalQueueNotifier: Send + Sync {
    fn notify_local_queues(&self);
}

pub fn spawn(
    instance: String,
    stage_interval: StageInterval,
    stage_batch_limit: usize,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    peer: PeerHandle,
    sonar: SonarHandle,
    local: Arc<dyn LocalQueueNotifier>,
) -> StagerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<StagerCommand>(16);

    let interval = match stage_interval {
        StageInterval::Every(d) => d,
        // §4.4 "If :infinity, the stager does not run". We still spawn the
        // task so the handle is uniform, but it only ever waits on
        // shutdown.
        StageInterval::Infinity => {
            tokio::spawn(async move {
                let _ = cmd_rx.recv().await;
            });
            return StagerHandle { commands: cmd_tx };
        }
    };

    tokio::spawn(async move {
        let mut mode = StagerMode::Local;
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let new_mode = select_mode(sonar.status(), peer.is_leader(), mode);
                    if new_mode != mode {
                        tracing::info!(instance = %instance, ?mode, ?new_mode, "stager mode transition");
                        mode = new_mode;
                    }

                    match mode {
                        StagerMode::Global if peer.is_leader() => {
                            stage_and_broadcast(&store, &notifier, stage_batch_limit).await;
                        }
                        StagerMode::Global => {
                            // Not the leader; nothing to do this tick, wait
                            // for the leader's broadcast instead.
                        }
                        StagerMode::Local => {
                            stage_and_notify_local(&store, local.as_ref(), stage_batch_limit).await;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(StagerCommand::Shutdown) | None => break,
                    }
                }
            }
        }
    });

    StagerHandle { commands: cmd_tx }
}

async fn stage_and_broadcast(store: &Arc<dyn JobStore>, notifier: &Arc<dyn Notifier>, limit: usize) {
    match store.stage(limit).await {
        Ok(staged) if staged.is_empty() => {}
        Ok(staged) => {
            let queues = distinct_queues(&staged);
            tracing::debug!(count = staged.len(), queues = ?queues, "staged jobs, broadcasting insert");
            let payload = json!(queues.iter().map(|q| json!({"queue": q})).collect::<Vec<_>>());
            if let Err(err) = notifier.notify(Channel::Insert, payload).await {
                tracing::warn!(error = %err, "failed to broadcast staged queues");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "stager failed to promote due jobs");
        }
    }
}

async fn stage_and_notify_local(store: &Arc<dyn JobStore>, local: &dyn LocalQueueNotifier, limit: usize) {
    if let Err(err) = store.stage(limit).await {
        tracing::warn!(error = %err, "stager failed to promote due jobs (local mode)");
    }
    local.notify_local_queues();
}

fn distinct_queues(staged: &[crate::store::StagedJob]) -> Vec<String> {
    staged
        .iter()
        .map(|job| job.queue.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
