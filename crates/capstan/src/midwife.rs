//! Dynamic per-queue supervisor lifecycle (§4.9). Listens on the
//! `signal` channel for `start`/`stop` queue directives; the instance's
//! configured queues are started once at boot, everything after that is
//! driven by signals (or direct calls via [`MidwifeHandle`]).
//!
//! The Midwife's queue-supervisor map is the one mutable process-wide
//! state in the core (§9 "Global mutable state") — it lives inside this
//! single serializing actor rather than behind a shared lock.

use crate::config::QueueConfig;
use crate::notify::{Channel, Notifier};
use crate::producer::ProducerHandle;
use crate::registry::{Registry, Role};
use crate::store::JobStore;
use crate::watchman;
use crate::worker::WorkerRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub enum MidwifeCommand {
    StartQueue(QueueConfig),
    StopQueue { queue: String },
    Shutdown,
}

#[derive(Clone)]
pub struct MidwifeHandle {
    commands: mpsc::Sender<MidwifeCommand>,
}

impl MidwifeHandle {
    pub async fn start_queue(&self, config: QueueConfig) {
        let _ = self.commands.send(MidwifeCommand::StartQueue(config)).await;
    }

    pub async fn stop_queue(&self, queue: impl Into<String>) {
        let _ = self
            .commands
            .send(MidwifeCommand::StopQueue { queue: queue.into() })
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(MidwifeCommand::Shutdown).await;
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    instance: String,
    node: String,
    initial_queues: Vec<QueueConfig>,
    shutdown_grace_period: Duration,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    workers: Arc<WorkerRegistry>,
    registry: Arc<Registry>,
) -> MidwifeHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<MidwifeCommand>(64);
    let ident = format!("{instance}.{node}");

    tokio::spawn(async move {
        let mut producers: HashMap<String, ProducerHandle> = HashMap::new();
        let mut inbox = notifier.listen(&[Channel::Signal], Some(ident)).await;

        for config in initial_queues {
            start_queue(
                &instance,
                &node,
                config,
                &store,
                &notifier,
                &workers,
                &registry,
                &mut producers,
            );
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(MidwifeCommand::StartQueue(config)) => {
                            start_queue(&instance, &node, config, &store, &notifier, &workers, &registry, &mut producers);
                        }
                        Some(MidwifeCommand::StopQueue { queue }) => {
                            stop_queue(&instance, &queue, shutdown_grace_period, &registry, &mut producers).await;
                        }
                        Some(MidwifeCommand::Shutdown) | None => {
                            let queues: Vec<String> = producers.keys().cloned().collect();
                            for queue in queues {
                                stop_queue(&instance, &queue, shutdown_grace_period, &registry, &mut producers).await;
                            }
                            break;
                        }
                    }
                }
                notification = inbox.recv() => {
                    let Some(notification) = notification else { continue };
                    if notification.channel != Channel::Signal {
                        continue;
                    }
                    match notification.payload.get("action").and_then(|a| a.as_str()) {
                        Some("start") => {
                            if let Some(queue) = notification.payload.get("queue").and_then(|q| q.as_str()) {
                                let limit = notification
                                    .payload
                                    .get("limit")
                                    .and_then(|l| l.as_u64())
                                    .unwrap_or(1) as usize;
                                start_queue(
                                    &instance,
                                    &node,
                                    QueueConfig::new(queue, limit),
                                    &store,
                                    &notifier,
                                    &workers,
                                    &registry,
                                    &mut producers,
                                );
                            }
                        }
                        Some("stop") => {
                            if let Some(queue) = notification.payload.get("queue").and_then(|q| q.as_str()) {
                                stop_queue(&instance, queue, shutdown_grace_period, &registry, &mut producers).await;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    MidwifeHandle { commands: cmd_tx }
}

#[allow(clippy::too_many_arguments)]
fn start_queue(
    instance: &str,
    node: &str,
    config: QueueConfig,
    store: &Arc<dyn JobStore>,
    notifier: &Arc<dyn Notifier>,
    workers: &Arc<WorkerRegistry>,
    registry: &Arc<Registry>,
    producers: &mut HashMap<String, ProducerHandle>,
) {
    let queue = config.queue.clone();
    if producers.contains_key(&queue) {
        tracing::debug!(queue, "start_queue ignored, producer already running");
        return;
    }
    let handle = crate::producer::spawn(
        instance.to_string(),
        node.to_string(),
        config,
        store.clone(),
        notifier.clone(),
        workers.clone(),
    );
    registry.register(instance, Role::Producer(queue.clone()), handle.clone());
    tracing::info!(instance, queue, "queue started");
    producers.insert(queue, handle);
}

async fn stop_queue(
    instance: &str,
    queue: &str,
    grace_period: Duration,
    registry: &Arc<Registry>,
    producers: &mut HashMap<String, ProducerHandle>,
) {
    let Some(handle) = producers.remove(queue) else {
        return;
    };
    let outcome = watchman::shutdown(&handle, grace_period).await;
    tracing::info!(instance, queue, ?outcome, "queue stopped");
    handle.shutdown().await;
    registry.deregister(instance, &Role::Producer(queue.to_string()));
}
