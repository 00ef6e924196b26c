// =============================================================================
// Subscriber Broker — bounded per-client delivery with priority-drop back-pressure
// =============================================================================
//
// Generalizes the teacher's one-task-per-connection `handle_ws_connection`
// loop into a fan-out broker: each subscriber gets its own bounded queue fed
// from the Opportunity Bus, and a dedicated task drains it into the
// WebSocket. `tokio::sync::mpsc` has no mid-queue removal, so a slow
// consumer's backlog is managed with a small hand-rolled priority queue
// instead (`parking_lot::Mutex<VecDeque<BusEvent>>` + `tokio::sync::Notify`)
// that can evict the lowest-priority item already queued when a higher
// priority one arrives and the queue is full.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusEvent, EventFilter};

/// Relative priority of a queued event: lower evicts first. `PriceTick` and
/// `Prediction` are the high-volume, low-value-per-item variants; every
/// opportunity/signal variant is worth protecting under pressure.
fn priority_rank(event: &BusEvent) -> u8 {
    match event {
        BusEvent::PriceTick(_) | BusEvent::Quote(_) => 0,
        BusEvent::Prediction(_) => 1,
        _ => 2,
    }
}

enum PushOutcome {
    Accepted,
    Dropped,
}

struct PriorityQueue {
    items: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    capacity: usize,
}

impl PriorityQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push `event`, evicting the lowest-priority queued item if full and
    /// `event` outranks it. Returns whether `event` itself ended up queued.
    fn push(&self, event: BusEvent) -> PushOutcome {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(event);
            drop(items);
            self.notify.notify_one();
            return PushOutcome::Accepted;
        }

        let incoming_rank = priority_rank(&event);
        let weakest = items
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| priority_rank(e))
            .map(|(idx, e)| (idx, priority_rank(e)));

        match weakest {
            Some((idx, rank)) if rank < incoming_rank => {
                items.remove(idx);
                items.push_back(event);
                drop(items);
                self.notify.notify_one();
                PushOutcome::Accepted
            }
            _ => PushOutcome::Dropped,
        }
    }

    async fn pop(&self) -> BusEvent {
        loop {
            if let Some(event) = self.items.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

/// Handle a subscriber holds to push events in and read its own identity
/// back from; the broker owns the receiving side.
pub struct SubscriberHandle {
    pub id: Uuid,
    queue: Arc<PriorityQueue>,
    filter: EventFilter,
    dropped_total: Arc<AtomicU64>,
    consecutive_drops: Arc<AtomicU32>,
}

impl SubscriberHandle {
    pub fn offer(&self, event: &BusEvent) {
        if !self.filter.matches(event) {
            return;
        }
        match self.queue.push(event.clone()) {
            PushOutcome::Accepted => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
            }
            PushOutcome::Dropped => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                self.consecutive_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn recv(&self) -> BusEvent {
        self.queue.pop().await
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops.load(Ordering::Relaxed)
    }
}

/// Registry of live subscriber queues. The dispatcher and engines never talk
/// to this directly — they publish onto `OpportunityBus`; a single fan-out
/// task (spawned in `main.rs`) reads the bus and calls `offer` on every
/// registered handle.
pub struct SubscriberBroker {
    queue_depth: usize,
    disconnect_after_drops: u32,
    handles: Mutex<Vec<Arc<SubscriberHandle>>>,
}

impl SubscriberBroker {
    pub fn new(queue_depth: usize, disconnect_after_drops: u32) -> Self {
        Self {
            queue_depth,
            disconnect_after_drops,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, filter: EventFilter) -> Arc<SubscriberHandle> {
        let handle = Arc::new(SubscriberHandle {
            id: Uuid::new_v4(),
            queue: Arc::new(PriorityQueue::new(self.queue_depth)),
            filter,
            dropped_total: Arc::new(AtomicU64::new(0)),
            consecutive_drops: Arc::new(AtomicU32::new(0)),
        });
        self.handles.lock().push(handle.clone());
        debug!(subscriber_id = %handle.id, "subscriber registered");
        handle
    }

    pub fn unregister(&self, id: Uuid) {
        self.handles.lock().retain(|h| h.id != id);
        debug!(subscriber_id = %id, "subscriber unregistered");
    }

    /// Fan `event` out to every live subscriber, dropping any whose
    /// consecutive-drop count exceeds the configured threshold. Returns the
    /// ids disconnected this round so the caller can tear down their
    /// WebSocket tasks.
    pub fn broadcast(&self, event: &BusEvent) -> Vec<Uuid> {
        let handles = self.handles.lock();
        let mut slow = Vec::new();
        for handle in handles.iter() {
            handle.offer(event);
            if handle.consecutive_drops() > self.disconnect_after_drops {
                warn!(subscriber_id = %handle.id, "disconnecting slow subscriber");
                slow.push(handle.id);
            }
        }
        drop(handles);
        for id in &slow {
            self.unregister(*id);
        }
        slow
    }

    pub fn subscriber_count(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunities::ArbitrageOpportunity;
    use crate::types::PriceUpdate;

    fn tick_event() -> BusEvent {
        BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0))
    }

    fn opp_event() -> BusEvent {
        BusEvent::SimpleOpp(ArbitrageOpportunity {
            pair: "BTC/USDT".into(),
            buy_exchange: "binance".into(),
            sell_exchange: "coinbase".into(),
            buy_price: 1.0,
            sell_price: 1.2,
            profit_pct: 20.0,
            ts: 0,
        })
    }

    #[tokio::test]
    async fn queue_accepts_until_capacity() {
        let queue = PriorityQueue::new(2);
        assert!(matches!(queue.push(tick_event()), PushOutcome::Accepted));
        assert!(matches!(queue.push(tick_event()), PushOutcome::Accepted));
        assert!(matches!(queue.push(tick_event()), PushOutcome::Dropped));
    }

    #[tokio::test]
    async fn higher_priority_evicts_lower_when_full() {
        let queue = PriorityQueue::new(1);
        assert!(matches!(queue.push(tick_event()), PushOutcome::Accepted));
        assert!(matches!(queue.push(opp_event()), PushOutcome::Accepted));
        let survivor = queue.pop().await;
        assert_eq!(survivor.kind(), "simple_opp");
    }

    #[tokio::test]
    async fn broker_disconnects_after_sustained_drops() {
        let broker = SubscriberBroker::new(1, 2);
        let handle = broker.register(EventFilter::all());
        for _ in 0..5 {
            broker.broadcast(&tick_event());
        }
        assert_eq!(broker.subscriber_count(), 0);
        assert!(handle.consecutive_drops() >= 2);
    }

    #[tokio::test]
    async fn unfiltered_subscriber_receives_all_kinds() {
        let broker = SubscriberBroker::new(8, 10);
        let handle = broker.register(EventFilter::all());
        broker.broadcast(&opp_event());
        let event = handle.recv().await;
        assert_eq!(event.kind(), "simple_opp");
    }
}
