// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Reconnect backoff and bounded write retry

use std::future::Future;
use std::time::Duration;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            factor: 2.0,
            cap_ms: 60_000,
            jitter: true,
        }
    }
}

/// Exponential reconnect backoff with jitter.
///
/// The ceiling grows as `base * factor^attempt` up to `cap`. With jitter on, each
/// delay is drawn uniformly between the previous delay and the current ceiling,
/// so the sequence never decreases and never exceeds the cap.
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last_delay: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic backoff for tests
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: BackoffConfig, rng: StdRng) -> Self {
        Self {
            config,
            attempt: 0,
            last_delay: Duration::ZERO,
            rng,
        }
    }

    /// Ceiling for the current attempt
    pub fn ceiling(&self) -> Duration {
        let base = self.config.base_ms as f64;
        let cap = self.config.cap_ms as f64;
        let exp = self.config.factor.max(1.0).powi(self.attempt.min(63) as i32);
        Duration::from_millis((base * exp).min(cap) as u64)
    }

    /// Delay to wait before the next connection attempt
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        let delay = if self.config.jitter {
            let low = self.last_delay.min(ceiling).as_millis() as u64;
            let high = ceiling.as_millis() as u64;
            if high > low {
                Duration::from_millis(self.rng.gen_range(low..=high))
            } else {
                ceiling
            }
        } else {
            ceiling
        };

        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = delay;
        delay
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Call after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
    }
}

/// Bounded retry with a fixed delay schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before each retry; the number of entries is the number of retries
    pub delays_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_ms: vec![1000, 2000, 4000],
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { delays_ms: vec![] }
    }

    pub fn retries(&self) -> usize {
        self.delays_ms.len()
    }

    /// Run `op`, retrying on error after each scheduled delay.
    /// Returns the last error once the schedule is exhausted.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delays = self.delays_ms.iter();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match delays.next() {
                    Some(&ms) => {
                        warn!("{} failed: {} (retrying in {}ms)", what, e, ms);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_non_decreasing_and_capped() {
        for seed in 0..20 {
            let mut backoff = Backoff::with_seed(BackoffConfig::default(), seed);
            let mut previous = Duration::ZERO;

            for _ in 0..40 {
                let delay = backoff.next_delay();
                assert!(delay >= previous, "seed {}: {:?} < {:?}", seed, delay, previous);
                assert!(delay <= Duration::from_secs(60));
                previous = delay;
            }
        }
    }

    #[test]
    fn test_backoff_without_jitter_doubles() {
        let config = BackoffConfig {
            jitter: false,
            ..Default::default()
        };
        let mut backoff = Backoff::new(config);
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::with_seed(BackoffConfig::default(), 7);
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempts(), 10);
        assert_eq!(backoff.ceiling(), Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_gives_up_after_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = tokio::time::Instant::now();

        let c = calls.clone();
        let result: Result<(), String> = RetryPolicy::default()
            .run("write", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("sink down".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let result: Result<usize, String> = RetryPolicy::default()
            .run("write", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("busy".to_string()) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
