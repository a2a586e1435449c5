//! Backoff policy for retry loops.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay grows between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `+unit` per retry.
    Linear,
    /// `+unit, +2·unit, +4·unit, …` per retry.
    #[default]
    Exponent,
}

/// Backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Minimum delay in milliseconds.
    pub min_ms: u64,

    /// Maximum delay in milliseconds.
    pub max_ms: u64,

    /// Increment unit in milliseconds.
    pub unit_ms: u64,

    /// Growth strategy.
    pub strategy: Strategy,

    /// When a retry ran longer than this, the next delay restarts at `min_ms`.
    pub reset_after_ms: u64,

    /// Add up to 10% random jitter on top of each delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_ms: 1,
            max_ms: 30_000,
            unit_ms: 1_000,
            strategy: Strategy::Exponent,
            reset_after_ms: 30_000,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }

    fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

/// Stateful delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
    delta: u32,
    called_at: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            next: Duration::ZERO,
            delta: 1,
            called_at: None,
        }
    }

    /// Return the next delay.
    pub fn next_delay(&mut self) -> Duration {
        self.reset_if_quiet();
        self.called_at = Some(Instant::now());

        let (min, max, unit) = (self.config.min(), self.config.max(), self.config.unit());

        if self.next < min {
            self.next = min;
        } else if self.next != max {
            let step = match self.config.strategy {
                Strategy::Linear => unit,
                Strategy::Exponent => {
                    let step = unit.saturating_mul(self.delta);
                    self.delta = self.delta.saturating_mul(2);
                    step
                }
            };
            self.next = self.next.saturating_add(step).min(max);
        }

        with_jitter(self.next, self.config.jitter)
    }

    /// Restart the sequence at `min`.
    pub fn reset(&mut self) {
        self.next = Duration::ZERO;
        self.delta = 1;
    }

    fn reset_if_quiet(&mut self) {
        let Some(called_at) = self.called_at else {
            return;
        };
        if called_at.elapsed().saturating_sub(self.next) > self.config.reset_after() {
            self.reset();
        }
    }
}

/// Apply 0 to 10% jitter to a delay.
fn with_jitter(delay: Duration, enabled: bool) -> Duration {
    let range_ms = delay.as_millis() as u64 / 10;
    if !enabled || range_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..range_ms))
}
