use std::time::Duration;

use rand::Rng;

/// Retry budget and spacing for the resends of one upload attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    ceiling: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, ceiling: Duration) -> Self {
        Self {
            max_retries,
            base,
            ceiling,
            jitter: false,
        }
    }

    /// Spreads computed delays uniformly over `0..=delay`.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn allows(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// `retry` is 1-based. A server hint replaces the computed delay but never
    /// exceeds the ceiling.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        self.delay_with_rng(retry, hint, &mut rand::thread_rng())
    }

    fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        retry: u32,
        hint: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.ceiling);
        }
        let doublings = retry.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1 << doublings).min(self.ceiling);
        if !self.jitter {
            return delay;
        }
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=delay_ms))
    }
}
