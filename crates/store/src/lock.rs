use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// A registry of per-run async mutexes. The Reconciliation Engine holds one
/// of these across `get` and the subsequent `insert`/`update` of an upsert
/// (§5): two concurrent upserts on the same id serialize, while upserts on
/// distinct ids proceed independently.
#[derive(Default)]
pub struct KeyedLocks {
    locks: SyncMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `id`, creating it if this is the first caller.
    pub async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let id = Uuid::new_v4();

        let l1 = locks.clone();
        let g1 = l1.lock(id).await;

        let l2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _g2 = l2.lock(id).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(g1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_ids_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = locks.lock(Uuid::new_v4()).await;
    }
}
