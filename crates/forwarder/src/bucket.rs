//! Per-group debounce bucket (§4.6.2, §4.6.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use th_domain::run::Run;
use uuid::Uuid;

/// `empty → accumulating (timer running) → flushing (atomic remove) → done`.
/// There is no explicit `empty` variant: a bucket is created already
/// `Accumulating` the moment its first run arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPhase {
    Accumulating,
    Done,
}

/// One in-memory buffer of runs awaiting flush under a single group key.
/// `generation` is bumped on every arrival and every merge-away; a pending
/// debounce timer compares its captured generation against the current one
/// when it wakes, so a superseded timer becomes a no-op rather than
/// needing explicit cancellation (§4.6.2, §4.6.7 "cancellation ... is safe
/// and idempotent").
pub struct BucketState {
    pub key: String,
    pub runs: Mutex<HashMap<Uuid, Run>>,
    pub generation: AtomicU64,
    pub phase: Mutex<BucketPhase>,
}

impl BucketState {
    pub fn new(key: String) -> Self {
        Self {
            key,
            runs: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            phase: Mutex::new(BucketPhase::Accumulating),
        }
    }

    pub fn mark_done(&self) {
        *self.phase.lock() = BucketPhase::Done;
    }
}
