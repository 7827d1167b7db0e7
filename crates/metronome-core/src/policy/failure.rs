//! Failure policy: decides backoff delays and when to give up.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Extension point for backoff curves the closed set does not cover.
pub trait BackoffSchedule: Send + Sync {
    /// Delay before the next attempt, given the consecutive-failure count
    /// (1-indexed: the failure just recorded is included).
    fn delay(&self, consecutive_failures: u32) -> Duration;
}

/// Closed set of backoff strategies, plus [`BackoffSchedule`] for custom ones.
#[derive(Clone)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),

    /// delay = base * multiplier^(failures - 1), capped at `max_delay`.
    Exponential {
        base: Duration,
        multiplier: f64,
        max_delay: Duration,
    },

    /// Exponential with a uniform jitter of ±`jitter_ratio` applied, so a
    /// burst of failures does not re-dogpile the same instant.
    ExponentialJitter {
        base: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_ratio: f64,
    },

    Custom(Arc<dyn BackoffSchedule>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Exponential {
                base,
                multiplier,
                max_delay,
            } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("multiplier", multiplier)
                .field("max_delay", max_delay)
                .finish(),
            Self::ExponentialJitter {
                base,
                multiplier,
                max_delay,
                jitter_ratio,
            } => f
                .debug_struct("ExponentialJitter")
                .field("base", base)
                .field("multiplier", multiplier)
                .field("max_delay", max_delay)
                .field("jitter_ratio", jitter_ratio)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        // 指数は 0-indexed（1回目の失敗 = base そのまま）
        let exponent = consecutive_failures.saturating_sub(1) as i32;
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                base,
                multiplier,
                max_delay,
            } => {
                // clamp before Duration construction: powi は簡単に inf に届く
                let secs = (base.as_secs_f64() * multiplier.powi(exponent))
                    .min(max_delay.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            Self::ExponentialJitter {
                base,
                multiplier,
                max_delay,
                jitter_ratio,
            } => {
                let secs = base.as_secs_f64() * multiplier.powi(exponent);
                let capped = secs.min(max_delay.as_secs_f64());
                let factor = 1.0 - jitter_ratio + 2.0 * jitter_ratio * rand::random::<f64>();
                Duration::from_secs_f64(capped * factor.max(0.0))
            }
            Self::Custom(schedule) => schedule.delay(consecutive_failures),
        }
    }
}

/// Failure policy for a task: backoff curve + give-up threshold.
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    pub backoff: Backoff,

    /// Give up once this many consecutive failures have occurred
    /// (routes the execution to DEAD). `None` retries forever.
    pub max_retries: Option<u32>,
}

impl FailurePolicy {
    /// Default policy: exponential backoff 2s base, x2 per failure, capped
    /// at one hour, dead after 5 consecutive failures.
    pub fn default_policy() -> Self {
        Self {
            backoff: Backoff::Exponential {
                base: Duration::from_secs(2),
                multiplier: 2.0,
                max_delay: Duration::from_secs(3600),
            },
            max_retries: Some(5),
        }
    }

    pub fn fixed(delay: Duration, max_retries: Option<u32>) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_retries,
        }
    }

    /// Next due time after a failure, or `None` when the policy gives up.
    ///
    /// `consecutive_failures` is the count including the failure being
    /// handled, so it is never read before the handler invocation completed.
    pub fn next_execution_time(
        &self,
        now: DateTime<Utc>,
        consecutive_failures: u32,
    ) -> Option<DateTime<Utc>> {
        if let Some(max) = self.max_retries
            && consecutive_failures >= max
        {
            return None;
        }
        let delay = self.backoff.delay(consecutive_failures);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::TimeDelta::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}
