//! Priority levels and retry backoff hints.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::ValidationError;

/// Scheduling priority. Lower values run sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Priority = Priority(-15);
    pub const HIGH: Priority = Priority(-10);
    pub const MEDIUM: Priority = Priority(-5);
    pub const NORMAL: Priority = Priority(0);
    pub const LOW: Priority = Priority(10);

    pub fn value(self) -> i32 {
        self.0
    }
}

/// Parses a named level (`low`, `normal`, `medium`, `high`, `critical`) or a
/// signed integer.
impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::CRITICAL),
            "high" => Ok(Priority::HIGH),
            "medium" => Ok(Priority::MEDIUM),
            "normal" => Ok(Priority::NORMAL),
            "low" => Ok(Priority::LOW),
            other => other
                .parse::<i32>()
                .map(Priority)
                .map_err(|_| ValidationError::InvalidPriority(s.to_string())),
        }
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

/// Backoff algorithm tag.
///
/// The core stores this and exposes `next_after` as a hint; it never
/// re-queues a failed task on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Wait `delay` between retries.
    #[default]
    Fixed,

    /// Wait `delay * attempts` between retries.
    Linear,
}

impl Backoff {
    /// Earliest time a retry should run, given the task delay and the number
    /// of failed attempts so far.
    pub fn next_after(self, now_ms: i64, delay_ms: u64, failed_attempts: u32) -> i64 {
        let wait = match self {
            Backoff::Fixed => delay_ms,
            Backoff::Linear => delay_ms.saturating_mul(u64::from(failed_attempts.max(1))),
        };
        now_ms.saturating_add(i64::try_from(wait).unwrap_or(i64::MAX))
    }
}

impl FromStr for Backoff {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "linear" => Ok(Backoff::Linear),
            _ => Err(ValidationError::InvalidBackoff(s.to_string())),
        }
    }
}
