// =============================================================================
// Tick Buffer Ring — bounded per-(exchange, pair) FIFO
// =============================================================================
//
// Generalizes `market_data::candle_buffer::CandleBuffer`'s ring-eviction
// pattern (`VecDeque` capped at a fixed size, oldest popped on overflow) from
// OHLCV candles to raw tick samples, feeding the statistical, latency, and
// ML engines.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

/// A single point in a tick ring: timestamp plus the derived mid alongside
/// the raw bid/ask that produced it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TickSample {
    pub ts: i64,
    pub mid: f64,
    pub bid: f64,
    pub ask: f64,
}

/// Bounded FIFO of `TickSample`s for one `(exchange, pair)` key. Push is
/// O(1); oldest entries are evicted implicitly on overflow.
struct Ring {
    samples: VecDeque<TickSample>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, sample: TickSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}

/// Thread-safe collection of per-`(exchange, pair)` tick rings, all sharing
/// the same fixed capacity (default 500, per spec).
pub struct TickRingStore {
    rings: RwLock<HashMap<(String, String), Ring>>,
    capacity: usize,
}

impl TickRingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn push(&self, exchange: &str, pair: &str, sample: TickSample) {
        let mut rings = self.rings.write();
        let ring = rings
            .entry((exchange.to_string(), pair.to_string()))
            .or_insert_with(|| Ring::new(self.capacity));
        ring.push(sample);
    }

    /// Oldest-first clone of every sample currently held for the key.
    pub fn snapshot(&self, exchange: &str, pair: &str) -> Vec<TickSample> {
        self.rings
            .read()
            .get(&(exchange.to_string(), pair.to_string()))
            .map(|r| r.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Oldest-first mid prices for the key — the series most engines want.
    pub fn mids(&self, exchange: &str, pair: &str) -> Vec<f64> {
        self.snapshot(exchange, pair).iter().map(|s| s.mid).collect()
    }

    pub fn len(&self, exchange: &str, pair: &str) -> usize {
        self.rings
            .read()
            .get(&(exchange.to_string(), pair.to_string()))
            .map(|r| r.samples.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, exchange: &str, pair: &str) -> bool {
        self.len(exchange, pair) == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, mid: f64) -> TickSample {
        TickSample { ts, mid, bid: mid - 1.0, ask: mid + 1.0 }
    }

    #[test]
    fn push_evicts_oldest_beyond_capacity() {
        let store = TickRingStore::new(3);
        for i in 0..5 {
            store.push("binance", "BTC/USDT", sample(i, 100.0 + i as f64));
        }
        assert_eq!(store.len("binance", "BTC/USDT"), 3);
        let mids = store.mids("binance", "BTC/USDT");
        assert_eq!(mids, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn keys_are_independent() {
        let store = TickRingStore::new(10);
        store.push("binance", "BTC/USDT", sample(0, 100.0));
        store.push("coinbase", "BTC/USDT", sample(0, 101.0));
        assert_eq!(store.len("binance", "BTC/USDT"), 1);
        assert_eq!(store.len("coinbase", "BTC/USDT"), 1);
    }

    #[test]
    fn empty_key_returns_empty() {
        let store = TickRingStore::new(10);
        assert!(store.snapshot("binance", "ETH/USDT").is_empty());
        assert!(store.is_empty("binance", "ETH/USDT"));
    }
}
