//! Deferred-update queue (§4.4.5). Process-local, in-memory, lost on
//! restart — acceptable per §5 ("shared resources").

use std::collections::HashMap;

use parking_lot::Mutex;
use th_domain::run::RunUpdate;
use uuid::Uuid;

#[derive(Default)]
pub struct DeferredQueue {
    by_id: Mutex<HashMap<Uuid, Vec<RunUpdate>>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, update: RunUpdate) {
        self.by_id.lock().entry(update.id).or_default().push(update);
    }

    /// Remove and return every update queued for `id`, in insertion order.
    pub fn take_all(&self, id: Uuid) -> Vec<RunUpdate> {
        self.by_id.lock().remove(&id).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len_for(&self, id: Uuid) -> usize {
        self.by_id.lock().get(&id).map(Vec::len).unwrap_or(0)
    }
}
