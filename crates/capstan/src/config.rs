//! In-memory configuration shapes the core reads (§1 "ambient stack",
//! SPEC_FULL.md §1). Parsing from files/env is out of scope; what's in
//! scope is the validated shape itself, since every actor constructs
//! itself from one of these.

use std::time::Duration;

/// A queue's concurrency/runtime settings, the producer-facing half of
/// §4.2's `{conf, queue, limit, paused, ...}` state.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue: String,
    pub limit: usize,
    pub paused: bool,
    pub dispatch_cooldown: Duration,
}

impl QueueConfig {
    pub fn new(queue: impl Into<String>, limit: usize) -> Self {
        Self {
            queue: queue.into(),
            limit,
            paused: false,
            dispatch_cooldown: Duration::from_millis(50),
        }
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn with_dispatch_cooldown(mut self, cooldown: Duration) -> Self {
        self.dispatch_cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.is_empty() {
            return Err(ConfigError::new("queue name must not be empty"));
        }
        if self.queue.len() > crate::job::MAX_NAME_LEN {
            return Err(ConfigError::new("queue name exceeds the 128-byte limit"));
        }
        if self.limit == 0 {
            return Err(ConfigError::new("queue limit must be at least 1"));
        }
        Ok(())
    }
}

/// The cadence at which the Stager promotes due jobs (§4.4 "Cadence").
/// `Infinity` disables staging, degrading the system to pure
/// claim-on-insert availability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageInterval {
    Every(Duration),
    Infinity,
}

impl Default for StageInterval {
    fn default() -> Self {
        StageInterval::Every(Duration::from_secs(1))
    }
}

/// The instance-wide configuration. One `Config` is built at startup and
/// shared read-only (`Arc<Config>`) across every actor; the Midwife's
/// queue-supervisor map is the only mutable process-wide state elsewhere
/// in the core (§9 "Global mutable state").
#[derive(Debug, Clone)]
pub struct Config {
    /// The name of this supervisor tree; scopes peer election and the
    /// channel-identity pair used for notifier scope filtering.
    pub instance: String,
    /// This node's identity, e.g. hostname or a configured override.
    pub node: String,
    /// Namespace prefix for channel names (§6 "Environment").
    pub prefix: String,
    pub queues: Vec<QueueConfig>,
    pub stage_interval: StageInterval,
    pub stage_batch_limit: usize,
    pub peer_election_interval: Duration,
    /// Factor by which the *current leader's* next election is shortened
    /// relative to `peer_election_interval`, keeping leadership sticky
    /// (§4.5).
    pub peer_leader_interval_divisor: u32,
    pub peer_ttl: Duration,
    pub sonar_interval: Duration,
    pub sonar_stale_multiplier: u32,
    pub shutdown_grace_period: Duration,
}

impl Config {
    pub fn new(instance: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            node: node.into(),
            prefix: "capstan".to_string(),
            queues: Vec::new(),
            stage_interval: StageInterval::default(),
            stage_batch_limit: 5_000,
            peer_election_interval: Duration::from_secs(30),
            peer_leader_interval_divisor: 2,
            peer_ttl: Duration::from_secs(45),
            sonar_interval: Duration::from_secs(15),
            sonar_stale_multiplier: 3,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_stage_interval(mut self, interval: StageInterval) -> Self {
        self.stage_interval = interval;
        self
    }

    /// `"{instance}.{node}"`, the identity used to scope notifier
    /// payloads carrying `ident` (§4.6).
    pub fn ident(&self) -> String {
        format!("{}.{}", self.instance, self.node)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.is_empty() {
            return Err(ConfigError::new("instance name must not be empty"));
        }
        if self.node.is_empty() {
            return Err(ConfigError::new("node identifier must not be empty"));
        }
        if self.prefix.is_empty() || !self.prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::new("prefix must be a non-empty alphanumeric identifier"));
        }
        for queue in &self.queues {
            queue.validate()?;
        }
        if self.peer_leader_interval_divisor == 0 {
            return Err(ConfigError::new("peer_leader_interval_divisor must be at least 1"));
        }
        Ok(())
    }
}

/// An unrecoverable configuration problem (§7 "Unrecoverable configuration
/// errors propagate out of initialization and fail-fast the supervisor").
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes_validation() {
        let config = Config::new("myapp", "node-1").with_queue(QueueConfig::new("alpha", 5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_instance_name_is_rejected() {
        let config = Config::new("", "node-1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_alphanumeric_prefix_is_rejected() {
        let config = Config::new("myapp", "node-1").with_prefix("my-app");
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_limit_queue_is_rejected() {
        let config = Config::new("myapp", "node-1").with_queue(QueueConfig::new("alpha", 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn ident_combines_instance_and_node() {
        let config = Config::new("myapp", "node-1");
        assert_eq!(config.ident(), "myapp.node-1");
    }

    #[test]
    fn stage_interval_defaults_to_one_second() {
        assert_eq!(StageInterval::default(), StageInterval::Every(Duration::from_secs(1)));
    }
}
