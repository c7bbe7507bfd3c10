use rand::Rng;
use std::time::Duration;

/// Exponential delay schedule for retried remote calls.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Schedule without delays, for tests that exercise retry paths.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, false)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let capped = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        // Jittered delays land in the upper half of the window.
        let delay_ms = if self.jitter && capped > 0 {
            rng.gen_range(capped / 2..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(8), true)
    }
}
