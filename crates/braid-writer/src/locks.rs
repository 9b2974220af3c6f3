use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use braid_core::types::Address;

/// Lock hierarchy, outer to inner: handle_joint → author addresses →
/// write. Acquisition in reverse order is forbidden. Every lock is held
/// through an owned guard, so release happens on every exit path — early
/// `?` returns included — without any explicit unlock call.
static HANDLE_JOINT: Lazy<Arc<AsyncMutex<()>>> = Lazy::new(|| Arc::new(AsyncMutex::new(())));
static WRITE: Lazy<Arc<AsyncMutex<()>>> = Lazy::new(|| Arc::new(AsyncMutex::new(())));
static ADDRESS_LOCKS: Lazy<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

/// Global ingest lock: one joint moves through the pipeline at a time.
pub async fn lock_handle_joint() -> OwnedMutexGuard<()> {
    HANDLE_JOINT.clone().lock_owned().await
}

/// Global writer lock: SQL+KV commit and post-commit AA/fee work happen
/// inside this guard's scope.
pub async fn lock_write() -> OwnedMutexGuard<()> {
    WRITE.clone().lock_owned().await
}

/// Per-address validation locks, acquired in sorted order so two units
/// sharing authors can never deadlock.
pub async fn lock_addresses(addresses: &[Address]) -> Vec<OwnedMutexGuard<()>> {
    let mut sorted: Vec<&Address> = addresses.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut guards = Vec::with_capacity(sorted.len());
    for address in sorted {
        let lock = {
            let mut registry = ADDRESS_LOCKS
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        guards.push(lock.lock_owned().await);
    }
    guards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_lock_released_on_drop() {
        {
            let _guard = lock_write().await;
        }
        // a second acquisition must not block
        let _guard = lock_write().await;
    }

    #[tokio::test]
    async fn address_locks_dedupe() {
        let a = Address::new("A".repeat(32)).unwrap();
        let guards = lock_addresses(&[a.clone(), a]).await;
        assert_eq!(guards.len(), 1);
    }
}
