//! Advisory per-resource operation locks.
//!
//! Migration phases that mutate a resource's state or share its staging
//! directory take a lock named by `(resource_id, operation)` before the
//! critical section. A second caller waits a bounded time for the holder
//! to release, then fails with a `Conflict`; nothing in this system blocks
//! indefinitely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use convoy_core::ResourceId;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::error::{MigrationError, Result};

/// Held for the duration of a locked migration operation.
///
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct OperationGuard {
    _inner: OwnedMutexGuard<()>,
}

/// Process-scoped table of `(resource_id, operation)` locks.
pub struct OperationLocks {
    table: Mutex<HashMap<(ResourceId, &'static str), Arc<tokio::sync::Mutex<()>>>>,
    wait: Duration,
}

impl OperationLocks {
    /// Create a lock table with the given bounded acquisition wait.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Fetch or create the lock for a key, pruning unused entries.
    fn entry(&self, resource: ResourceId, operation: &'static str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table.lock();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(table.entry((resource, operation)).or_default())
    }

    /// Acquire the lock for `(resource, operation)`, waiting at most the
    /// configured bound.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Conflict` if the lock is still held when
    /// the wait expires.
    pub async fn acquire(
        &self,
        resource: ResourceId,
        operation: &'static str,
    ) -> Result<OperationGuard> {
        let lock = self.entry(resource, operation);

        match tokio::time::timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(OperationGuard { _inner: guard }),
            Err(_) => Err(MigrationError::Conflict(format!(
                "operation lock {resource}-{operation} is held"
            ))),
        }
    }

    /// Acquire the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Conflict` if the lock is currently held.
    pub fn try_acquire(
        &self,
        resource: ResourceId,
        operation: &'static str,
    ) -> Result<OperationGuard> {
        let lock = self.entry(resource, operation);

        lock.try_lock_owned()
            .map(|guard| OperationGuard { _inner: guard })
            .map_err(|_| {
                MigrationError::Conflict(format!(
                    "operation lock {resource}-{operation} is held"
                ))
            })
    }
}

impl Default for OperationLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
