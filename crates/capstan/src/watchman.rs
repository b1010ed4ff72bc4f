//! Graceful shutdown of a single queue (§4.8). A Watchman doesn't run as
//! a long-lived actor of its own — shutting a queue down is a one-shot
//! sequence a caller (the Midwife, or a test) drives by awaiting
//! [`shutdown`].

use crate::producer::ProducerHandle;
use std::time::Duration;

/// A small fixed grace extension added on top of `shutdown_grace_period`
/// before giving up on drain (§4.8 point 3).
const GRACE_EXTENSION: Duration = Duration::from_millis(250);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every running job finished (or was aborted by a `pkill`) before
    /// the grace period elapsed.
    Drained,
    /// The grace period elapsed with jobs still `executing`; they remain
    /// in that state for a rescue plugin to reclaim on restart (§4.8
    /// point 3).
    GraceExpired { still_running: usize },
}

/// §4.8: pause the producer so it claims nothing new, then poll its
/// running count until it drains or `grace_period` (plus a small fixed
/// extension) elapses.
pub async fn shutdown(producer: &ProducerHandle, grace_period: Duration) -> ShutdownOutcome {
    producer.pause().await;

    let deadline = tokio::time::Instant::now() + grace_period + GRACE_EXTENSION;
    loop {
        let running = producer.running_count().await;
        if running == 0 {
            return ShutdownOutcome::Drained;
        }
        if tokio::time::Instant::now() >= deadline {
            return ShutdownOutcome::GraceExpired { still_running: running };
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
