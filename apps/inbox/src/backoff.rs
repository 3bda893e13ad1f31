use std::time::Duration;

use uuid::Uuid;

/// Growth cap on the doubling; further failures stay at the ceiling.
const MAX_DOUBLINGS: u32 = 16;

/// Wait schedule for the refresh loop. Each consecutive failure doubles the
/// wait up to `ceiling`; a success drops back to `initial`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub ceiling: Duration,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn for_poll(interval: Duration) -> Self {
        Self {
            initial: interval,
            ceiling: interval.saturating_mul(8).max(Duration::from_secs(60)),
            jitter_ratio: 0.1,
        }
    }

    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 1u32 << consecutive_failures.min(MAX_DOUBLINGS);
        let raw = self.initial.saturating_mul(factor).min(self.ceiling);
        raw.saturating_add(self.jitter(raw))
    }

    fn jitter(&self, raw: Duration) -> Duration {
        if raw.is_zero() || self.jitter_ratio <= 0.0 {
            return Duration::ZERO;
        }
        let spread = raw.mul_f64(self.jitter_ratio.min(1.0));
        let unit = (Uuid::new_v4().as_u128() % 10_000) as f64 / 10_000.0;
        spread.mul_f64(unit)
    }
}
