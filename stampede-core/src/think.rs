use rand::Rng;
use std::time::Duration;

/// Pause between a VU's iterations: `base` plus a uniform draw from `[0, jitter)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThinkTime {
    pub base: Duration,
    pub jitter: Duration,
}

impl ThinkTime {
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    pub fn uniform(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    pub fn is_zero(&self) -> bool {
        self.base.is_zero() && self.jitter.is_zero()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra = rng.gen_range(0..self.jitter.as_nanos().min(u64::MAX as u128) as u64);
        self.base.saturating_add(Duration::from_nanos(extra))
    }
}
