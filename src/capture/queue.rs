use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::config::QueuePolicy;

/// FIFO between the capture thread and the drain side.
///
/// Pushing never blocks. Under `QueuePolicy::DropOldest` a full queue discards
/// its oldest entry to admit the new one; drops are counted.
#[derive(Debug)]
pub struct IngestQueue<T> {
    items: Mutex<VecDeque<T>>,
    policy: QueuePolicy,
    dropped: AtomicU64,
}

impl<T> IngestQueue<T> {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(QueuePolicy::Unbounded)
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        if let QueuePolicy::DropOldest(capacity) = self.policy {
            if items.len() >= capacity.max(1) {
                items.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // One line per power of two keeps a stalled consumer from flooding the log
                if dropped.is_power_of_two() {
                    warn!("Ingestion queue full ({}), {} records dropped so far", capacity, dropped);
                }
            }
        }
        items.push_back(item);
    }

    /// Remove up to `max` items in arrival order
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let take = max.min(items.len());
        items.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}
