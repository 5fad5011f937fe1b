//! Per-sandbox lock map.
//!
//! One logical mutex per live sandbox: operations on the same sandbox
//! serialize in arrival order, operations on different sandboxes run fully
//! in parallel. Entries are created lazily and torn down by reference
//! count once the last holder releases, so deleted sandboxes do not leak
//! map entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Map of per-sandbox locks.
#[derive(Clone, Default)]
pub struct SandboxLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a sandbox, creating the entry if absent.
    /// Waiters are served in arrival order by the underlying mutex.
    pub async fn acquire(&self, sandbox_id: Uuid) -> SandboxGuard {
        let entry = {
            let mut map = self.inner.lock().unwrap();
            map.entry(sandbox_id).or_default().clone()
        };
        let permit = entry.lock_owned().await;
        SandboxGuard {
            _permit: permit,
            cleanup: LockCleanup {
                map: self.inner.clone(),
                sandbox_id,
            },
        }
    }

    /// Drop the map entry eagerly, for sandbox deletion. Waiters already
    /// queued keep their own handle and drain normally; their operations
    /// fail afterwards on the registry lookup.
    pub fn discard(&self, sandbox_id: Uuid) {
        self.inner.lock().unwrap().remove(&sandbox_id);
    }

    /// Number of live lock entries. Test hook.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the duration of one coordinator operation.
///
/// Field order matters: the permit must drop before the cleanup probe runs
/// so the strong count no longer includes this holder.
pub struct SandboxGuard {
    _permit: OwnedMutexGuard<()>,
    cleanup: LockCleanup,
}

impl SandboxGuard {
    /// The sandbox this guard serializes.
    pub fn sandbox_id(&self) -> Uuid {
        self.cleanup.sandbox_id
    }
}

struct LockCleanup {
    map: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
    sandbox_id: Uuid,
}

impl Drop for LockCleanup {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap();
        if let Some(entry) = map.get(&self.sandbox_id) {
            // Waiters each hold a clone while queued; a count of one means
            // only the map itself still references the lock.
            if Arc::strong_count(entry) == 1 {
                map.remove(&self.sandbox_id);
            }
        }
    }
}
