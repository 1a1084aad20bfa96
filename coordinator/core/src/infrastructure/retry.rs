// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Sleep seam so retry timing is injectable. The default implementation
/// defers to the tokio timer; tests substitute a recording no-op.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Tokio-backed sleeper used in production composition.
#[derive(Debug, Default, Clone)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Backoff-with-jitter retry wrapper for outbound envelope delivery.
///
/// Attempt `n` (1-based) failing sleeps `base_delay * 2^(n-1)` scaled by a
/// factor drawn uniformly from `1 ± jitter_ratio`, then retries, up to
/// `max_attempts`. The final error is surfaced to the caller unchanged.
#[derive(Clone)]
pub struct CommandRetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter_ratio: f64,
    sleeper: Arc<dyn Sleeper>,
}

impl CommandRetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter_ratio: f64) -> Self {
        Self::with_sleeper(max_attempts, base_delay, jitter_ratio, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        max_attempts: u32,
        base_delay: Duration,
        jitter_ratio: f64,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter_ratio: jitter_ratio.clamp(0.0, 0.99),
            sleeper,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run one delivery attempt factory until it succeeds or attempts are
    /// exhausted.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut attempt_fn: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "delivery attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < self.max_attempts {
                        self.sleeper.sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_error.expect("at least one attempt always runs"))
    }

    /// Exponential backoff for a failed 1-based attempt, with jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_millis() as u64 * 2_u64.pow(exponent);
        let factor = if self.jitter_ratio > 0.0 {
            let mut rng = rand::thread_rng();
            rng.gen_range(1.0 - self.jitter_ratio..=1.0 + self.jitter_ratio)
        } else {
            1.0
        };
        Duration::from_millis((base as f64 * factor) as u64)
    }
}
