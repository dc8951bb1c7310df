//! Queue configuration.
//!
//! Every key is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! default_ttl_ms = 30000
//! ready_scan_interval_ms = 1000
//! event_capacity = 1024
//! default_max_attempts = 1
//! log_level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TTL_MS, Result, UowError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Lease lifetime used when a worker does not pick one.
    pub default_ttl_ms: u64,

    /// How often the ready poller scans the store.
    pub ready_scan_interval_ms: u64,

    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,

    /// `attempts.max` for tasks built through a request.
    pub default_max_attempts: u32,

    /// Default tracing filter for binaries embedding the queue.
    pub log_level: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            ready_scan_interval_ms: 1_000,
            event_capacity: 1_024,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            log_level: "info".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| UowError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| UowError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn ready_scan_interval(&self) -> Duration {
        Duration::from_millis(self.ready_scan_interval_ms)
    }
}
