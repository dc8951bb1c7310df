//! Lease record stored on a task.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::ids::TaskId;

/// One-way key identifying the lease holder.
///
/// The key is `sha256(requester_id ":" task_id)`, hex-encoded. The raw
/// requester id is never stored, so a persisted task cannot be used to
/// impersonate its holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(String);

impl LeaseKey {
    pub fn derive(requester_id: &str, task_id: &TaskId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(requester_id.as_bytes());
        hasher.update(b":");
        hasher.update(task_id.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Time-bounded exclusive claim on a task.
///
/// `ttl` is optional only so that a corrupted record can be decoded and
/// reported; the lease manager never writes a lease without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: LeaseKey,

    /// Epoch milliseconds of the last acquire/renew.
    pub time: i64,

    /// Milliseconds until expiry, counted from `time`.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl Lease {
    pub(crate) fn new(key: LeaseKey, time: i64, ttl: u64) -> Self {
        Self {
            key,
            time,
            ttl: Some(ttl),
        }
    }
}
