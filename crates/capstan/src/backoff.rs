//! Default retry backoff (§4.3 point 5): `2^attempt + 15` seconds, ±10%
//! jitter. Workers may override via [`crate::worker::Worker::backoff`].

use std::time::Duration;

const JITTER_FRACTION: f64 = 0.10;

/// `2^attempt + 15` seconds with up to ±10% jitter applied, as a
/// `Duration`. `attempt` is expected to be small (<= 99 per §3); values
/// large enough to overflow `u32` saturate rather than panic.
pub fn backoff_for_attempt(attempt: i32) -> Duration {
    let attempt = attempt.max(0) as u32;
    let base_secs = 2f64.powi(attempt.min(30) as i32) + 15.0;
    jittered(base_secs)
}

fn jittered(base_secs: f64) -> Duration {
    let jitter_span = base_secs * JITTER_FRACTION;
    let offset = (fastrand::f64() * 2.0 - 1.0) * jitter_span;
    let secs = (base_secs + offset).max(0.0);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt() {
        let low = backoff_for_attempt(1).as_secs_f64();
        let high = backoff_for_attempt(5).as_secs_f64();
        assert!(high > low);
    }

    #[test]
    fn backoff_stays_within_jitter_band() {
        let base = 2f64.powi(3) + 15.0; // attempt = 3
        for _ in 0..200 {
            let d = backoff_for_attempt(3).as_secs_f64();
            assert!(d >= base * 0.9 - 0.001);
            assert!(d <= base * 1.1 + 0.001);
        }
    }

    #[test]
    fn backoff_never_negative() {
        for attempt in 0..10 {
            assert!(backoff_for_attempt(attempt).as_secs_f64() >= 0.0);
        }
    }

    #[test]
    fn large_attempt_does_not_panic() {
        let d = backoff_for_attempt(99);
        assert!(d.as_secs_f64() > 0.0);
    }
}
