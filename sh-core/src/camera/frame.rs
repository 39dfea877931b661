//! Latest-frame store
//!
//! One producer installs complete snapshots; readers clone an `Arc` and never
//! see a half-written buffer.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Encoded frame plus the person count detected on it
#[derive(Debug, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub jpeg: Vec<u8>,
    pub person_count: u32,
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct FrameStore {
    latest: RwLock<Option<Arc<FrameSnapshot>>>,
    next_seq: AtomicU64,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new snapshot, replacing the previous one
    pub fn publish(&self, jpeg: Vec<u8>, person_count: u32) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(FrameSnapshot {
            jpeg,
            person_count,
            seq,
        });
        *self.latest.write() = Some(snapshot);
        seq
    }

    pub fn latest(&self) -> Option<Arc<FrameSnapshot>> {
        self.latest.read().clone()
    }

    /// Person count of the latest snapshot, 0 before the first frame
    pub fn person_count(&self) -> u32 {
        self.latest.read().as_ref().map_or(0, |s| s.person_count)
    }
}
