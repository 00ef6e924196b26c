// =============================================================================
// Ingress Queue — bounded adapter-to-dispatcher tick queue
// =============================================================================
//
// Generalizes `broker::PriorityQueue`'s evict-on-full `Mutex<VecDeque>` +
// `Notify` shape to the adapter side of the pipeline: when the queue is at
// capacity, the incoming tick evicts the oldest queued tick for the *same*
// (exchange, pair) if one exists (only the latest quote per key matters),
// falling back to the globally oldest entry otherwise.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::PriceUpdate;

pub struct IngressQueue {
    items: Mutex<VecDeque<PriceUpdate>>,
    notify: Notify,
    capacity: usize,
    dropped_total: AtomicU64,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn push(&self, tick: PriceUpdate) {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                let same_key_idx = items.iter().position(|t| t.exchange == tick.exchange && t.pair == tick.pair);
                match same_key_idx {
                    Some(idx) => {
                        items.remove(idx);
                    }
                    None => {
                        items.pop_front();
                    }
                }
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(tick);
        }
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> PriceUpdate {
        loop {
            if let Some(tick) = self.items.lock().pop_front() {
                return tick;
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
