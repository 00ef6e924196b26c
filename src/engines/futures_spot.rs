// =============================================================================
// Futures-Spot Basis Arbitrage Engine
// =============================================================================
//
// Carry-trade detector: compares a perpetual futures contract's funding rate
// and mark price against the spot quote for the same symbol. A real
// integration would source `futures_price`/`funding_rate` from an exchange's
// futures API; this engine reads them through a `FundingRateFeed` trait so
// the simulated default (`SimulatedFundingFeed`, seeded deterministically
// from the config, matching `original_source/engine_futures_spot.py`'s
// `random.gauss`-driven simulation) can later be swapped for a live one
// without touching the detection logic.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{FuturesDirection, FuturesSpotOpportunity, RiskLevel};
use crate::types::PriceUpdate;

pub struct FundingSample {
    pub funding_rate: f64,
    pub futures_price: f64,
}

pub trait FundingRateFeed: Send {
    fn sample(&mut self, exchange: &str, symbol: &str, spot_mid: f64) -> FundingSample;
}

/// Deterministic stand-in for a real funding-rate API: a mean-reverting
/// random walk seeded from `(exchange, symbol)` so repeated runs over the
/// same inputs reproduce the same sequence.
pub struct SimulatedFundingFeed {
    rngs: HashMap<(String, String), StdRng>,
    prev_rate: HashMap<(String, String), f64>,
    seed: u64,
}

impl SimulatedFundingFeed {
    pub fn new(seed: u64) -> Self {
        Self {
            rngs: HashMap::new(),
            prev_rate: HashMap::new(),
            seed,
        }
    }

    fn rng_for(&mut self, key: &(String, String)) -> &mut StdRng {
        let seed = self.seed;
        self.rngs.entry(key.clone()).or_insert_with(|| {
            let mut hasher_seed = seed;
            for byte in key.0.bytes().chain(key.1.bytes()) {
                hasher_seed = hasher_seed.wrapping_mul(31).wrapping_add(byte as u64);
            }
            StdRng::seed_from_u64(hasher_seed)
        })
    }
}

impl FundingRateFeed for SimulatedFundingFeed {
    fn sample(&mut self, exchange: &str, symbol: &str, spot_mid: f64) -> FundingSample {
        let key = (exchange.to_string(), symbol.to_string());
        let prev_rate = *self.prev_rate.get(&key).unwrap_or(&0.0);
        let rng = self.rng_for(&key);

        let basis_dist = Normal::new(0.0003, 0.0002).expect("valid normal params");
        let funding_dist = Normal::new(0.0001, 0.0003).expect("valid normal params");

        let base_basis = basis_dist.sample(rng);
        let base_funding = if prev_rate != 0.0 {
            prev_rate * 0.8 + funding_dist.sample(rng) * 0.2
        } else {
            funding_dist.sample(rng)
        };
        let funding_rate = base_funding.clamp(-0.001, 0.003);

        self.prev_rate.insert(key, funding_rate);

        FundingSample {
            funding_rate,
            futures_price: spot_mid * (1.0 + base_basis),
        }
    }
}

#[derive(Default)]
struct RateHistory {
    rates: VecDeque<f64>,
}

const RATE_HISTORY_CAP: usize = 100;

impl RateHistory {
    fn push(&mut self, rate: f64) {
        self.rates.push_back(rate);
        while self.rates.len() > RATE_HISTORY_CAP {
            self.rates.pop_front();
        }
    }

    fn z_score(&self, current: f64) -> f64 {
        if self.rates.len() < 2 {
            return 0.0;
        }
        let mean = self.rates.iter().sum::<f64>() / self.rates.len() as f64;
        let variance = self.rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (self.rates.len() - 1) as f64;
        let std = variance.sqrt();
        if std == 0.0 {
            0.0
        } else {
            (current - mean) / std
        }
    }
}

fn confidence(z_score: f64, funding_rate: f64, basis_pct: f64, max_basis_percent: f64) -> f64 {
    let z_factor = (z_score.abs() / 3.0).min(1.0);
    let basis_factor = 1.0 - (basis_pct.abs() / max_basis_percent).min(1.0);
    let rate_factor = (funding_rate.abs() / 0.001).min(1.0);
    (0.4 * z_factor + 0.3 * basis_factor + 0.3 * rate_factor).clamp(0.0, 1.0)
}

fn risk_level(z_score: f64, basis_pct: f64, funding_rate: f64) -> RiskLevel {
    let mut score = 0;
    if z_score.abs() > 2.5 {
        score += 2;
    } else if z_score.abs() > 1.5 {
        score += 1;
    }
    if basis_pct.abs() > 0.3 {
        score += 2;
    } else if basis_pct.abs() > 0.1 {
        score += 1;
    }
    if funding_rate.abs() > 0.002 {
        score += 1;
    }
    if score >= 4 {
        RiskLevel::High
    } else if score >= 2 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub struct FuturesSpotEngine {
    feed: Box<dyn FundingRateFeed>,
    history: HashMap<(String, String), RateHistory>,
}

impl FuturesSpotEngine {
    pub fn new(feed: Box<dyn FundingRateFeed>) -> Self {
        Self { feed, history: HashMap::new() }
    }

    pub fn simulated(seed: u64) -> Self {
        Self::new(Box::new(SimulatedFundingFeed::new(seed)))
    }
}

impl Engine for FuturesSpotEngine {
    fn name(&self) -> &'static str {
        "futures_spot"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let spot_mid = tick.mid();
        let sample = self.feed.sample(&tick.exchange, &tick.pair, spot_mid);

        let basis = sample.futures_price - spot_mid;
        let basis_pct = basis / spot_mid * 100.0;
        if basis_pct.abs() > ctx.config.max_basis_percent {
            return Vec::new();
        }

        let annualized_rate = sample.funding_rate * 3.0 * 365.0 * 100.0;

        let key = (tick.exchange.clone(), tick.pair.clone());
        let history = self.history.entry(key).or_default();
        let z_score = if history.rates.len() >= 10 {
            history.z_score(sample.funding_rate)
        } else {
            0.0
        };
        history.push(sample.funding_rate);

        let direction = if sample.funding_rate >= ctx.config.min_funding_rate && annualized_rate >= ctx.config.min_funding_annualized {
            Some(FuturesDirection::CashAndCarry)
        } else if sample.funding_rate <= -ctx.config.min_funding_rate && annualized_rate.abs() >= ctx.config.min_funding_annualized {
            Some(FuturesDirection::ReverseCashCarry)
        } else {
            None
        };

        let Some(direction) = direction else { return Vec::new() };

        let opp = FuturesSpotOpportunity {
            exchange: tick.exchange.clone(),
            symbol: tick.pair.clone(),
            direction,
            spot_price: spot_mid,
            futures_price: sample.futures_price,
            basis_pct,
            funding_rate: sample.funding_rate,
            annualized_rate,
            z_score,
            confidence: confidence(z_score, sample.funding_rate, basis_pct, ctx.config.max_basis_percent),
            risk_level: risk_level(z_score, basis_pct, sample.funding_rate),
            ts: tick.ts,
        };

        info!(exchange = %opp.exchange, symbol = %opp.symbol, annualized_rate = opp.annualized_rate, "futures-spot basis opportunity");
        vec![BusEvent::FuturesSpotOpp(opp)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::market_state::MarketStateStore;
    use crate::tick_ring::TickRingStore;

    struct FixedFeed {
        funding_rate: f64,
        basis: f64,
    }

    impl FundingRateFeed for FixedFeed {
        fn sample(&mut self, _exchange: &str, _symbol: &str, spot_mid: f64) -> FundingSample {
            FundingSample {
                funding_rate: self.funding_rate,
                futures_price: spot_mid * (1.0 + self.basis),
            }
        }
    }

    fn ctx<'a>(market: &'a MarketStateStore, ticks: &'a TickRingStore, config: &'a RuntimeConfig) -> EngineContext<'a> {
        EngineContext { market, ticks, config }
    }

    #[test]
    fn positive_funding_emits_cash_and_carry() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        let mut engine = FuturesSpotEngine::new(Box::new(FixedFeed { funding_rate: 0.001, basis: 0.0005 }));
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);

        let opp = events
            .iter()
            .find_map(|e| if let BusEvent::FuturesSpotOpp(o) = e { Some(o) } else { None })
            .expect("expected a futures-spot opportunity");
        assert_eq!(opp.direction, FuturesDirection::CashAndCarry);
    }

    #[test]
    fn basis_outside_max_suppresses_opportunity() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        let mut engine = FuturesSpotEngine::new(Box::new(FixedFeed { funding_rate: 0.001, basis: 10.0 }));
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }

    #[test]
    fn simulated_feed_is_deterministic_for_same_seed() {
        let mut feed_a = SimulatedFundingFeed::new(42);
        let mut feed_b = SimulatedFundingFeed::new(42);
        let a = feed_a.sample("binance", "BTC/USDT", 65000.0);
        let b = feed_b.sample("binance", "BTC/USDT", 65000.0);
        assert!((a.funding_rate - b.funding_rate).abs() < 1e-12);
        assert!((a.futures_price - b.futures_price).abs() < 1e-9);
    }
}
