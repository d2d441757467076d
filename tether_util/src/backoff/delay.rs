use crate::ReconnectPolicy;
use std::time::Duration;

/// Geometric delay schedule used between consecutive reconnect attempts.
///
/// The delay before reconnect attempt `n` (counted from 1) is
/// `base_delay * multiplier^(n - 1)`. There is no upper cap and no jitter: the
/// schedule is a pure function of the attempt number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    multiplier: f64,
}

impl ReconnectBackoff {
    /// Creates a new schedule from the given base delay and multiplier.
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// Reports the delay before the very first reconnect attempt.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Reports the growth factor between consecutive delays.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Computes the delay before the given reconnect `attempt`, counted from 1.
    ///
    /// Attempt `0` is treated as attempt `1`. Delays that overflow the
    /// nanosecond range saturate.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);

        // Multiply in the nanosecond domain: whole-millisecond bases are exact there
        let nanos = self.base_delay.as_nanos() as f64 * factor;

        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::from_nanos(u64::MAX);
        }

        Duration::from_nanos(nanos.round().max(0.0) as u64)
    }
}

impl From<&ReconnectPolicy> for ReconnectBackoff {
    fn from(policy: &ReconnectPolicy) -> Self {
        Self::new(policy.base_delay(), policy.multiplier())
    }
}

/// Computes the delay before retrying a publish after the failed `attempt`,
/// counted from 0: `2^attempt` seconds (1s, 2s, 4s, …).
pub fn publish_retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}
