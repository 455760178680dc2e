use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Same delay after every failure
    #[default]
    Fixed,
    /// `base_delay * n` after the n-th failure
    Linear,
    /// `base_delay * 2^(n-1)` after the n-th failure
    Exponential,
}

/// Bounded retry with a delay between attempts.
///
/// `max_attempts` counts every attempt including the first, so a policy with
/// `max_attempts = 3` sleeps at most twice.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: RetryStrategy::Fixed,
            jitter: false,
        }
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(RetryError::InvalidConfig(format!(
                "max_delay {:?} is smaller than base_delay {:?}",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay to wait after the `attempt`-th failure (1-based), never above
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        let base = match self.strategy {
            RetryStrategy::Exponential => self
                .base_delay
                .saturating_mul(2_u32.saturating_pow(step.min(31))),
            RetryStrategy::Linear => self.base_delay.saturating_mul(step.saturating_add(1)),
            RetryStrategy::Fixed => self.base_delay,
        };

        let delay = if self.jitter { apply_jitter(base) } else { base };
        delay.min(self.max_delay)
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.5..1.5); // ±50% jitter
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Limits when a retry loop may start another attempt or delay.
///
/// Exhausted once the deadline passes or the token is cancelled. An attempt
/// already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct RetryBudget {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl RetryBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn until_cancelled(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(cancel),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
            || self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Waits `delay` before the next attempt. Returns `false` without waiting
    /// out the delay when the budget would run out first.
    pub async fn sleep(&self, delay: Duration) -> bool {
        if self.is_exhausted() {
            return false;
        }
        if let Some(deadline) = self.deadline
            && Instant::now() + delay >= deadline
        {
            return false;
        }
        match &self.cancel {
            Some(cancel) => tokio::select! {
                () = cancel.cancelled() => false,
                () = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
