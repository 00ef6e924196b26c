// =============================================================================
// Simulator Adapter — deterministic synthetic tick generator
// =============================================================================
//
// Generalizes `original_source/exchanges/simulator.py`'s `SimulatedExchange`:
// a random walk off a base price per pair, an exchange-specific offset so
// different venues disagree enough to create opportunities, and a small bid/
// ask spread. The Python original seeds from the process-global `random`
// module; this adapter instead derives a per-(exchange, pair) seed so
// `mode: simulation` runs are reproducible across restarts, matching the
// determinism decision already made for `FundingRateFeed`/`DexPoolFeed`.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use super::{AdapterHandle, ExchangeAdapter};
use crate::errors::DetectionError;
use crate::ingress::IngressQueue;
use crate::types::PriceUpdate;

const MOVEMENT_RANGE: (f64, f64) = (-0.001, 0.001);
const SPREAD_RANGE: (f64, f64) = (0.0001, 0.0005);
const TICK_INTERVAL_MS_RANGE: (u64, u64) = (100, 500);

fn base_price(pair: &str) -> Option<f64> {
    Some(match pair {
        "BTC/USDT" => 97_500.0,
        "ETH/USDT" => 3_250.0,
        "SOL/USDT" => 245.0,
        "XRP/USDT" => 3.15,
        "ETH/BTC" => 0.0333,
        "SOL/BTC" => 0.00251,
        "XRP/BTC" => 0.0000323,
        _ => return None,
    })
}

fn seed_for(exchange: &str, pair: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    ("simulator", exchange, pair).hash(&mut hasher);
    hasher.finish()
}

pub struct SimulatorAdapter {
    exchange: &'static str,
    pairs: Vec<String>,
    handle: Arc<AdapterHandle>,
    offset_percent: f64,
}

impl SimulatorAdapter {
    pub fn new(exchange: &'static str, pairs: Vec<String>, handle: Arc<AdapterHandle>, offset_percent: f64) -> Self {
        Self { exchange, pairs, handle, offset_percent }
    }

    fn next_tick(&self, pair: &str, prices: &mut f64, rng: &mut StdRng) -> Option<PriceUpdate> {
        let movement = Uniform::new(MOVEMENT_RANGE.0, MOVEMENT_RANGE.1).sample(rng);
        *prices *= 1.0 + movement;

        let adjusted = *prices * (1.0 + self.offset_percent / 100.0);
        let spread_percent = Uniform::new(SPREAD_RANGE.0, SPREAD_RANGE.1).sample(rng);
        let half_spread = adjusted * spread_percent / 2.0;

        let bid = adjusted - half_spread;
        let ask = adjusted + half_spread;
        let ts = chrono::Utc::now().timestamp_millis();
        Some(PriceUpdate::new(self.exchange, pair, bid, ask, ts))
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatorAdapter {
    fn name(&self) -> &'static str {
        self.exchange
    }

    fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
        let mut rngs: Vec<StdRng> = self.pairs.iter().map(|p| StdRng::seed_from_u64(seed_for(self.exchange, p))).collect();
        let mut prices: Vec<f64> = self
            .pairs
            .iter()
            .map(|p| base_price(p).ok_or_else(|| DetectionError::MalformedMessage { exchange: self.exchange.into(), reason: format!("no simulated base price for pair {p}") }))
            .collect::<Result<_, _>>()?;

        self.handle.set(super::AdapterState::Subscribed);
        self.handle.set(super::AdapterState::Streaming);

        let mut interval_rng = StdRng::seed_from_u64(seed_for(self.exchange, "interval"));
        loop {
            for i in 0..self.pairs.len() {
                if let Some(tick) = self.next_tick(&self.pairs[i], &mut prices[i], &mut rngs[i]) {
                    ingress.push(tick);
                }
            }
            let delay_ms = Uniform::new(TICK_INTERVAL_MS_RANGE.0, TICK_INTERVAL_MS_RANGE.1).sample(&mut interval_rng);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_stable_for_same_exchange_and_pair() {
        assert_eq!(seed_for("binance-sim", "BTC/USDT"), seed_for("binance-sim", "BTC/USDT"));
        assert_ne!(seed_for("binance-sim", "BTC/USDT"), seed_for("kraken-sim", "BTC/USDT"));
    }

    #[test]
    fn next_tick_keeps_ask_above_bid() {
        let handle = AdapterHandle::new("binance-sim");
        let adapter = SimulatorAdapter::new("binance-sim", vec!["BTC/USDT".into()], handle, 0.02);
        let mut rng = StdRng::seed_from_u64(42);
        let mut price = 97_500.0;
        let tick = adapter.next_tick("BTC/USDT", &mut price, &mut rng).expect("tick");
        assert!(tick.ask > tick.bid);
    }

    #[test]
    fn unknown_pair_yields_error_on_run() {
        assert!(base_price("NOPE/USDT").is_none());
    }
}
