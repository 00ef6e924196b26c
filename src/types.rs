// =============================================================================
// Core value types — canonical quotes and per-exchange quote snapshots
// =============================================================================

use serde::{Deserialize, Serialize};

/// Operating mode for the engine's tick source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    Simulation,
    Replay,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Simulation
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Simulation => write!(f, "simulation"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

/// Canonical immutable quote produced by an exchange adapter.
///
/// Invariants enforced by the dispatcher (never by the constructor, so
/// adapters can build one from raw wire data before validation runs):
/// `bid > 0`, `ask >= bid`, `pair` is `BASE/QUOTE` uppercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub exchange: String,
    pub pair: String,
    pub bid: f64,
    pub ask: f64,
    /// Milliseconds since the UNIX epoch.
    pub ts: i64,
}

impl PriceUpdate {
    pub fn new(exchange: impl Into<String>, pair: impl Into<String>, bid: f64, ask: f64, ts: i64) -> Self {
        Self {
            exchange: exchange.into(),
            pair: pair.into(),
            bid,
            ask,
            ts,
        }
    }

    /// `bid > 0 && ask >= bid`. The single definition of tick validity shared
    /// by the dispatcher and the test suite.
    pub fn is_valid(&self) -> bool {
        self.bid > 0.0 && self.ask >= self.bid && self.bid.is_finite() && self.ask.is_finite()
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid == 0.0 {
            0.0
        } else {
            (self.ask - self.bid) / mid * 100.0
        }
    }
}

/// Latest quote for a single `(pair, exchange)` key, with derived fields.
///
/// Created on the first tick for a key, overwritten on every subsequent
/// tick, never deleted for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeQuote {
    pub exchange: String,
    pub pair: String,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread_pct: f64,
    pub ts: i64,
}

impl From<&PriceUpdate> for ExchangeQuote {
    fn from(tick: &PriceUpdate) -> Self {
        Self {
            exchange: tick.exchange.clone(),
            pair: tick.pair.clone(),
            bid: tick.bid,
            ask: tick.ask,
            mid: tick.mid(),
            spread_pct: tick.spread_pct(),
            ts: tick.ts,
        }
    }
}

/// Normalize a raw, venue-specific symbol into canonical `BASE/QUOTE` form.
///
/// Accepts forms already containing a separator (`BTC-USDT`, `XBT/USDT`) as
/// well as bare concatenations (`btcusdt`) by matching against the supplied
/// list of known quote currencies, longest match first. Returns `None` when
/// no canonical form can be derived.
pub fn normalize_pair(raw: &str, known_quotes: &[&str]) -> Option<String> {
    let upper = raw.to_uppercase();

    for sep in ['/', '-', '_'] {
        if let Some((base, quote)) = upper.split_once(sep) {
            if !base.is_empty() && !quote.is_empty() {
                return Some(format!("{base}/{quote}"));
            }
        }
    }

    let mut quotes: Vec<&&str> = known_quotes.iter().collect();
    quotes.sort_by_key(|q| std::cmp::Reverse(q.len()));
    for quote in quotes {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            let base = &upper[..upper.len() - quote.len()];
            if !base.is_empty() {
                return Some(format!("{base}/{quote}"));
            }
        }
    }

    None
}

/// Extract `(base, quote)` from a canonical `BASE/QUOTE` pair.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    pair.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_update_validity() {
        let ok = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        assert!(ok.is_valid());

        let zero_bid = PriceUpdate::new("binance", "BTC/USDT", 0.0, 65010.0, 0);
        assert!(!zero_bid.is_valid());

        let crossed = PriceUpdate::new("binance", "BTC/USDT", 65010.0, 65000.0, 0);
        assert!(!crossed.is_valid());
    }

    #[test]
    fn mid_and_spread() {
        let tick = PriceUpdate::new("binance", "BTC/USDT", 100.0, 102.0, 0);
        assert!((tick.mid() - 101.0).abs() < 1e-9);
        assert!((tick.spread_pct() - (2.0 / 101.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn normalize_pair_with_separator() {
        assert_eq!(normalize_pair("XBT/USDT", &["USDT"]), Some("XBT/USDT".into()));
        assert_eq!(normalize_pair("btc-usdt", &["USDT"]), Some("BTC/USDT".into()));
    }

    #[test]
    fn normalize_pair_concatenated() {
        assert_eq!(normalize_pair("btcusdt", &["USDT", "USD"]), Some("BTC/USDT".into()));
        assert_eq!(normalize_pair("ethbtc", &["BTC"]), Some("ETH/BTC".into()));
    }

    #[test]
    fn normalize_pair_unknown() {
        assert_eq!(normalize_pair("garbage", &["USDT"]), None);
    }

    #[test]
    fn exchange_quote_from_tick() {
        let tick = PriceUpdate::new("coinbase", "BTC/USDT", 100.0, 110.0, 42);
        let quote = ExchangeQuote::from(&tick);
        assert_eq!(quote.exchange, "coinbase");
        assert!((quote.mid - 105.0).abs() < 1e-9);
    }
}
