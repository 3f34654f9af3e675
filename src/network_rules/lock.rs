//! Per-account named locks
//!
//! Network rules are written back as a whole object, so every read-modify-write
//! cycle against one storage account has to be serialized. Locks are keyed by
//! name and scoped to this process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{Result, StornetError};

type LockRegistry = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Provider of named mutual exclusion
#[async_trait]
pub trait NamedLocks: Send + Sync {
    /// Wait until the lock called `name` is free and take it.
    ///
    /// Only callers using the identical name exclude each other.
    async fn acquire(&self, name: &str) -> Result<AccountLockGuard>;
}

/// Held lock; released when dropped.
///
/// Dropping covers every exit path: early returns, `?`, unwinding and a
/// cancelled future that owns the guard.
pub struct AccountLockGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: LockRegistry,
}

impl AccountLockGuard {
    /// Name of the held lock
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the registry itself still references an idle lock.
        self.registry
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
        debug!(lock = %self.name, "Released lock");
    }
}

impl std::fmt::Debug for AccountLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLockGuard")
            .field("name", &self.name)
            .finish()
    }
}

/// In-process lock registry keyed by storage account name
#[derive(Clone, Default)]
pub struct AccountLocks {
    registry: LockRegistry,
    timeout: Option<Duration>,
}

impl AccountLocks {
    /// Create a registry whose acquisitions wait indefinitely
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that gives up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            registry: LockRegistry::default(),
            timeout: Some(timeout),
        }
    }

    /// Number of names currently held or waited on
    pub fn active_locks(&self) -> usize {
        self.registry.len()
    }
}

/// Prunes the registry entry when an acquisition ends without a guard,
/// whether it timed out or its future was dropped while waiting.
struct PendingAcquire {
    name: String,
    registry: LockRegistry,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl NamedLocks for AccountLocks {
    async fn acquire(&self, name: &str) -> Result<AccountLockGuard> {
        // Declared before the wait so it is dropped after the wait future
        // has given up its reference to the mutex.
        let pending = PendingAcquire {
            name: name.to_string(),
            registry: Arc::clone(&self.registry),
        };
        let lock = Arc::clone(&self.registry.entry(name.to_string()).or_default());

        debug!(lock = %name, "Waiting for lock");
        let acquired = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock.lock_owned()).await.ok(),
            None => Some(lock.lock_owned().await),
        };

        let Some(guard) = acquired else {
            drop(pending);
            warn!(lock = %name, timeout = ?self.timeout, "Timed out waiting for lock");
            return Err(StornetError::lock_timeout(name));
        };
        debug!(lock = %name, "Acquired lock");

        Ok(AccountLockGuard {
            name: pending.name.clone(),
            guard: Some(guard),
            registry: Arc::clone(&pending.registry),
        })
    }
}
