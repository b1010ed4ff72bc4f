//! Wires every component under an instance name (§2 "Supervisor tree").
//!
//! [`Instance::start`] is the single entry point a binary calls: given a
//! [`Config`] and the three backend traits plus a populated
//! [`WorkerRegistry`], it spawns Peer, Sonar, Stager and Midwife (which in
//! turn starts the configured queues' Producers) and returns a handle
//! that can reach any of them through the shared [`Registry`].

use crate::config::Config;
use crate::midwife::MidwifeHandle;
use crate::notify::Notifier;
use crate::peer::PeerHandle;
use crate::registry::{Registry, Role};
use crate::sonar::SonarHandle;
use crate::stager::{LocalQueueNotifier, StagerHandle};
use crate::store::{JobStore, PeerStore};
use crate::worker::WorkerRegistry;
use std::sync::Arc;

/// Pulses every registered producer for the instance directly, bypassing
/// the notifier — the Stager's local-mode fallback (§4.4).
struct RegistryLocalQueueNotifier {
    instance: String,
    queues: Vec<String>,
    registry: Arc<Registry>,
}

impl LocalQueueNotifier for RegistryLocalQueueNotifier {
    fn notify_local_queues(&self) {
        for queue in &self.queues {
            if let Some(handle) = self
                .registry
                .get::<crate::producer::ProducerHandle>(&self.instance, &Role::Producer(queue.clone()))
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle.try_dispatch().await;
                });
            }
        }
    }
}

/// A running supervisor tree. Dropping this does not stop the actors
/// (they're independent `tokio::spawn`-ed tasks reachable through the
/// registry); call [`Instance::shutdown`] for cooperative teardown.
pub struct Instance {
    config: Config,
    registry: Arc<Registry>,
    peer: PeerHandle,
    sonar: SonarHandle,
    stager: StagerHandle,
    midwife: MidwifeHandle,
}

impl Instance {
    /// Validate `config`, then start Sonar, Peer, Stager, and the
    /// Midwife (which starts every configured queue's Producer). Returns
    /// `Err` only for configuration problems (§7 "Unrecoverable
    /// configuration errors propagate out of initialization").
    pub fn start(
        config: Config,
        job_store: Arc<dyn JobStore>,
        peer_store: Arc<dyn PeerStore>,
        notifier: Arc<dyn Notifier>,
        workers: Arc<WorkerRegistry>,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let registry = Arc::new(Registry::new());

        let sonar = crate::sonar::spawn(
            config.node.clone(),
            config.prefix.clone(),
            config.sonar_interval,
            config.sonar_stale_multiplier,
            notifier.clone(),
        );
        registry.register(&config.instance, Role::Sonar, sonar.clone());

        let peer = crate::peer::spawn(
            config.instance.clone(),
            config.node.clone(),
            config.peer_election_interval,
            config.peer_leader_interval_divisor,
            config.peer_ttl,
            peer_store,
            notifier.clone(),
        );
        registry.register(&config.instance, Role::Peer, peer.clone());

        let local = Arc::new(RegistryLocalQueueNotifier {
            instance: config.instance.clone(),
            queues: config.queues.iter().map(|q| q.queue.clone()).collect(),
            registry: registry.clone(),
        });

        let stager = crate::stager::spawn(
            config.instance.clone(),
            config.stage_interval,
            config.stage_batch_limit,
            job_store.clone(),
            notifier.clone(),
            peer.clone(),
            sonar.clone(),
            local,
        );
        registry.register(&config.instance, Role::Stager, stager.clone());

        let midwife = crate::midwife::spawn(
            config.instance.clone(),
            config.node.clone(),
            config.queues.clone(),
            config.shutdown_grace_period,
            job_store,
            notifier,
            workers,
            registry.clone(),
        );
        registry.register(&config.instance, Role::Midwife, midwife.clone());

        Ok(Self {
            config,
            registry,
            peer,
            sonar,
            stager,
            midwife,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn sonar(&self) -> &SonarHandle {
        &self.sonar
    }

    pub fn midwife(&self) -> &MidwifeHandle {
        &self.midwife
    }

    /// Reach a running queue's producer by name, if it's currently
    /// started.
    pub fn producer(&self, queue: &str) -> Option<crate::producer::ProducerHandle> {
        self.registry
            .get(&self.config.instance, &Role::Producer(queue.to_string()))
    }

    /// Cooperative shutdown of the whole tree: the Midwife drains every
    /// running queue (§4.8) before Peer resigns leadership and Sonar/
    /// Stager stop ticking.
    pub async fn shutdown(&self) {
        self.midwife.shutdown().await;
        self.stager.shutdown().await;
        self.peer.shutdown().await;
        self.sonar.shutdown().await;
    }
}
