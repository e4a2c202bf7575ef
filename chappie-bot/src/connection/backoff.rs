use crate::models::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff between reconnects.
///
/// Attempt `n` waits `base * 2^(n-1)`, capped at `max_delay`, plus up to
/// `jitter_ms` of random delay. The counter resets whenever a session
/// reaches `Connected`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Count one more attempt and return how long to wait before it, or
    /// `None` once `max_attempts` consecutive attempts have been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;

        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        Some(self.base_delay(self.attempt) + Duration::from_millis(jitter))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, jitter_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_ms,
            max_attempts,
        }
    }

    #[test]
    fn test_delays_double_and_cap() {
        let mut backoff = Backoff::new(config(6, 0));
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert_eq!(backoff.attempts(), 6);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut backoff = Backoff::new(config(50, 250));
        for attempt in 1..=50 {
            let delay = backoff.next_delay().unwrap();
            let base = backoff.base_delay(attempt);
            assert!(delay >= base && delay <= base + Duration::from_millis(250));
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(config(2, 0));
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let backoff = Backoff::new(config(1, 0));
        assert_eq!(backoff.base_delay(500), Duration::from_millis(10_000));
    }
}
