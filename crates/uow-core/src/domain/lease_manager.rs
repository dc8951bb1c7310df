//! Lease negotiation.
//!
//! Pure functions over a task's lease record. The current time is passed in
//! explicitly; nothing here reads a clock or holds state, so every function is
//! safe to call from any thread. Atomicity of read-modify-write is the
//! store's job.
//!
//! Expiry is evaluated lazily: an expired lease stays on the task until the
//! next `acquire` replaces it or a `release` clears it.

use super::errors::{InvariantError, LeaseError, Result, ValidationError};
use super::lease::{Lease, LeaseKey};
use super::task::Task;

/// Default lease lifetime when the caller does not pick one.
pub const DEFAULT_TTL_MS: u64 = 30_000;

/// How a successful `acquire` obtained the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The task had no lease.
    Fresh,

    /// The task had a lease that expired; the new requester took it over.
    Reclaimed,

    /// The caller already held the lease; time was reset and ttl re-applied.
    Renewed,
}

/// A task without a lease is unlocked. With a lease it is locked iff
/// `now - lease.time < lease.ttl`, so a ttl of 0 is expired immediately.
pub fn is_locked(task: &Task, now_ms: i64) -> Result<bool> {
    let Some(lease) = task.lease() else {
        return Ok(false);
    };
    let ttl = lease_ttl(task, lease)?;
    Ok(now_ms.saturating_sub(lease.time) < ttl_as_i64(ttl))
}

/// Whether `requester_id` holds the task's lease. Compares derived keys, not
/// raw identities. Expiry is not considered.
pub fn is_holder(task: &Task, requester_id: &str) -> Result<bool> {
    let Some(lease) = task.lease() else {
        return Err(LeaseError::NotLocked.into());
    };
    let task_id = task.require_id()?;
    Ok(LeaseKey::derive(requester_id, &task_id) == lease.key)
}

/// Acquire or renew the lease.
///
/// - held by the caller and unexpired: renewed
/// - held by someone else and unexpired: `AlreadyLocked`
/// - no lease, or expired: a fresh lease with a newly derived key
pub fn acquire(
    ttl_ms: u64,
    requester_id: &str,
    task: &mut Task,
    now_ms: i64,
) -> Result<Acquisition> {
    if requester_id.trim().is_empty() {
        return Err(ValidationError::RequesterIdMissing.into());
    }
    let task_id = task.require_id()?;
    let key = LeaseKey::derive(requester_id, &task_id);

    let acquisition = if is_locked(task, now_ms)? {
        if task.lease().is_some_and(|l| l.key == key) {
            Acquisition::Renewed
        } else {
            return Err(LeaseError::AlreadyLocked.into());
        }
    } else if task.lease().is_some() {
        Acquisition::Reclaimed
    } else {
        Acquisition::Fresh
    };

    *task.lease_mut() = Some(Lease::new(key, now_ms, ttl_ms));
    Ok(acquisition)
}

/// Holder-only renewal that re-applies the lease's own ttl.
pub fn renew(requester_id: &str, task: &mut Task, now_ms: i64) -> Result<()> {
    if !is_holder(task, requester_id)? {
        return Err(LeaseError::KeyInvalid.into());
    }
    let Some(lease) = task.lease() else {
        return Err(LeaseError::NotLocked.into());
    };
    let ttl = lease_ttl(task, lease)?;
    let key = lease.key.clone();
    *task.lease_mut() = Some(Lease::new(key, now_ms, ttl));
    Ok(())
}

/// Clear the lease. Releasing an unlocked task is a no-op; a caller whose
/// derived key does not match gets `KeyInvalid` and the lease is untouched.
pub fn release(requester_id: &str, task: &mut Task) -> Result<()> {
    if task.lease().is_none() {
        return Ok(());
    }
    if !is_holder(task, requester_id)? {
        return Err(LeaseError::KeyInvalid.into());
    }
    *task.lease_mut() = None;
    Ok(())
}

fn lease_ttl(task: &Task, lease: &Lease) -> Result<u64> {
    lease.ttl.ok_or_else(|| {
        let id = task
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unsaved task".to_string());
        InvariantError::LeaseWithoutTtl(id).into()
    })
}

fn ttl_as_i64(ttl: u64) -> i64 {
    i64::try_from(ttl).unwrap_or(i64::MAX)
}
