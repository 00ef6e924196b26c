// =============================================================================
// Market State Store — latest-quote table, single writer, snapshot reads
// =============================================================================
//
// Generalizes the `RwLock<HashMap<...>>` shape used throughout this codebase
// (see `AppState::trade_processors`) into the canonical `pair -> exchange ->
// ExchangeQuote` table the detection engines share.
//
// The store is written only by the dispatcher (single logical writer, per
// the concurrency model); engines and external readers only ever take a
// read-only snapshot, so there is no lock held across engine evaluation.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::ExchangeQuote;

/// Latest-quote table: `pair -> exchange -> ExchangeQuote`.
pub struct MarketStateStore {
    inner: RwLock<HashMap<String, HashMap<String, ExchangeQuote>>>,
}

impl MarketStateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Commit `quote` and return a clone of every quote currently held for
    /// its pair (including the one just written). The write lock is held
    /// only for the duration of the insert + clone, never across engine
    /// evaluation.
    pub fn update_and_snapshot(&self, quote: ExchangeQuote) -> HashMap<String, ExchangeQuote> {
        let mut map = self.inner.write();
        let entry = map.entry(quote.pair.clone()).or_default();
        entry.insert(quote.exchange.clone(), quote);
        entry.clone()
    }

    /// Read-only snapshot of every exchange's latest quote for `pair`.
    pub fn quotes_for(&self, pair: &str) -> HashMap<String, ExchangeQuote> {
        self.inner
            .read()
            .get(pair)
            .cloned()
            .unwrap_or_default()
    }

    /// Every pair the store currently has at least one quote for.
    pub fn pairs(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Full snapshot of the store, keyed `pair -> exchange -> quote`. Used by
    /// the `/api/state` endpoint.
    pub fn full_snapshot(&self) -> HashMap<String, HashMap<String, ExchangeQuote>> {
        self.inner.read().clone()
    }
}

impl Default for MarketStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceUpdate;

    fn quote(exchange: &str, pair: &str, bid: f64, ask: f64, ts: i64) -> ExchangeQuote {
        ExchangeQuote::from(&PriceUpdate::new(exchange, pair, bid, ask, ts))
    }

    #[test]
    fn update_and_snapshot_reflects_last_tick_per_key() {
        let store = MarketStateStore::new();
        store.update_and_snapshot(quote("binance", "BTC/USDT", 65000.0, 65010.0, 0));
        let snapshot = store.update_and_snapshot(quote("binance", "BTC/USDT", 65100.0, 65110.0, 1));

        assert_eq!(snapshot.len(), 1);
        assert!((snapshot["binance"].bid - 65100.0).abs() < 1e-9);
        assert_eq!(store.quotes_for("BTC/USDT")["binance"].bid, 65100.0);
    }

    #[test]
    fn multiple_exchanges_coexist_per_pair() {
        let store = MarketStateStore::new();
        store.update_and_snapshot(quote("binance", "BTC/USDT", 65000.0, 65010.0, 0));
        let snapshot = store.update_and_snapshot(quote("coinbase", "BTC/USDT", 65150.0, 65160.0, 1));

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("binance"));
        assert!(snapshot.contains_key("coinbase"));
    }

    #[test]
    fn quotes_for_unknown_pair_is_empty() {
        let store = MarketStateStore::new();
        assert!(store.quotes_for("ETH/USDT").is_empty());
    }

    #[test]
    fn pairs_lists_only_seen_pairs() {
        let store = MarketStateStore::new();
        store.update_and_snapshot(quote("binance", "BTC/USDT", 1.0, 1.1, 0));
        store.update_and_snapshot(quote("binance", "ETH/USDT", 1.0, 1.1, 0));
        let mut pairs = store.pairs();
        pairs.sort();
        assert_eq!(pairs, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
    }
}
