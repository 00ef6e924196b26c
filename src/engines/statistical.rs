// =============================================================================
// Statistical Arbitrage Engine — mean-reversion on the pair-to-pair spread
// =============================================================================
//
// Tracks the price ratio between every configured pair of pairs on an
// exchange, requires high Pearson correlation before trusting the
// relationship, and signals when the ratio's z-score and an
// Ornstein-Uhlenbeck half-life estimate indicate it is unusually stretched.
// Grounded in `original_source/engine_statistical.py`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{StatArbDirection, StatArbSignal};
use crate::types::PriceUpdate;

const SPREAD_HISTORY_CAP: usize = 500;

#[derive(Default)]
struct SpreadHistory {
    values: VecDeque<f64>,
}

impl SpreadHistory {
    fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > SPREAD_HISTORY_CAP {
            self.values.pop_front();
        }
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f64>() / self.values.len() as f64
        }
    }

    fn std(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (self.values.len() - 1) as f64;
        variance.sqrt()
    }

    fn z_score(&self) -> f64 {
        let std = self.std();
        if std == 0.0 || self.values.is_empty() {
            return 0.0;
        }
        (self.values.back().copied().unwrap_or(0.0) - self.mean()) / std
    }

    /// Ornstein-Uhlenbeck half-life of mean reversion, in ticks. `None` when
    /// there isn't enough history or the AR(1) coefficient isn't in (0, 1)
    /// (i.e. the process isn't mean-reverting).
    fn half_life(&self) -> Option<f64> {
        if self.values.len() < 50 {
            return None;
        }
        let mean = self.mean();
        let demeaned: Vec<f64> = self.values.iter().map(|v| v - mean).collect();

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 1..demeaned.len() {
            numerator += demeaned[i] * demeaned[i - 1];
            denominator += demeaned[i - 1].powi(2);
        }
        if denominator == 0.0 {
            return None;
        }
        let rho = numerator / denominator;
        if !(0.0 < rho && rho < 1.0) {
            return None;
        }
        let half_life = -(2.0_f64.ln()) / rho.ln();
        if half_life > 0.0 {
            Some(half_life)
        } else {
            None
        }
    }
}

fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 10 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let numerator: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let std_a = a.iter().map(|x| (x - mean_a).powi(2)).sum::<f64>().sqrt();
    let std_b = b.iter().map(|y| (y - mean_b).powi(2)).sum::<f64>().sqrt();

    if std_a == 0.0 || std_b == 0.0 {
        0.0
    } else {
        numerator / (std_a * std_b)
    }
}

fn confidence(z_score: f64, half_life: Option<f64>, correlation: f64, z_entry: f64, min_correlation: f64) -> f64 {
    let z_factor = (((z_score.abs() - z_entry) / 2.0) + 0.5).clamp(0.5, 1.0);
    let hl_factor = match half_life {
        Some(hl) if hl < 50.0 => (50.0 / hl.max(1.0)).min(1.0),
        _ => 0.3,
    };
    let corr_factor = ((correlation - min_correlation) / (1.0 - min_correlation)).clamp(0.0, 1.0);
    0.4 * z_factor + 0.3 * hl_factor + 0.3 * corr_factor
}

pub struct StatisticalArbitrageEngine {
    spreads: HashMap<(String, String, String), SpreadHistory>,
}

impl StatisticalArbitrageEngine {
    pub fn new() -> Self {
        Self { spreads: HashMap::new() }
    }
}

impl Default for StatisticalArbitrageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for StatisticalArbitrageEngine {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let mut events = Vec::new();

        for other in &ctx.config.pairs {
            if *other == tick.pair {
                continue;
            }
            let (pair_a, pair_b) = if tick.pair < *other {
                (tick.pair.clone(), other.clone())
            } else {
                (other.clone(), tick.pair.clone())
            };

            let mids_a = ctx.ticks.mids(&tick.exchange, &pair_a);
            let mids_b = ctx.ticks.mids(&tick.exchange, &pair_b);
            if mids_a.len() < ctx.config.min_history || mids_b.len() < ctx.config.min_history {
                continue;
            }

            let price_a = *mids_a.last().unwrap();
            let price_b = *mids_b.last().unwrap();
            if price_b == 0.0 {
                continue;
            }

            let correlation = pearson_correlation(&mids_a, &mids_b);
            if correlation < ctx.config.min_correlation {
                continue;
            }

            let key = (tick.exchange.clone(), pair_a.clone(), pair_b.clone());
            let history = self.spreads.entry(key).or_default();
            history.push(price_a / price_b);

            if history.values.len() < ctx.config.min_history {
                continue;
            }

            let z_score = history.z_score();
            if z_score.abs() < ctx.config.z_entry {
                continue;
            }

            let half_life = history.half_life();
            let signal_confidence = confidence(z_score, half_life, correlation, ctx.config.z_entry, ctx.config.min_correlation);
            let signal = if z_score >= ctx.config.z_entry {
                StatArbDirection::ShortSpread
            } else {
                StatArbDirection::LongSpread
            };

            let opp = StatArbSignal {
                pair_a,
                pair_b,
                exchange: tick.exchange.clone(),
                z_score,
                spread: *history.values.back().unwrap(),
                mean_spread: history.mean(),
                std_spread: history.std(),
                half_life,
                correlation,
                signal,
                confidence: signal_confidence,
                ts: tick.ts,
            };

            info!(pair_a = %opp.pair_a, pair_b = %opp.pair_b, z_score = opp.z_score, "statistical arbitrage signal");
            events.push(BusEvent::StatArbSignal(opp));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::market_state::MarketStateStore;
    use crate::tick_ring::TickRingStore;
    use crate::tick_ring::TickSample;

    fn ctx<'a>(market: &'a MarketStateStore, ticks: &'a TickRingStore, config: &'a RuntimeConfig) -> EngineContext<'a> {
        EngineContext { market, ticks, config }
    }

    #[test]
    fn signal_requires_minimum_history() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(600);
        let mut config = RuntimeConfig::default();
        config.pairs = vec!["BTC/USDT".into(), "ETH/USDT".into()];
        config.min_history = 30;

        ticks.push("binance", "ETH/USDT", TickSample { ts: 0, mid: 3500.0, bid: 3499.0, ask: 3501.0 });
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        ticks.push("binance", "BTC/USDT", TickSample { ts: 0, mid: tick.mid(), bid: tick.bid, ask: tick.ask });

        let mut engine = StatisticalArbitrageEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }

    #[test]
    fn emits_no_signal_when_correlation_too_low() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(600);
        let mut config = RuntimeConfig::default();
        config.pairs = vec!["BTC/USDT".into(), "ETH/USDT".into()];
        config.min_history = 10;

        // Uncorrelated series: one random-walks up, the other oscillates.
        for i in 0..40 {
            let a = 100.0 + i as f64;
            let b = 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 };
            ticks.push("binance", "BTC/USDT", TickSample { ts: i, mid: a, bid: a - 0.1, ask: a + 0.1 });
            ticks.push("binance", "ETH/USDT", TickSample { ts: i, mid: b, bid: b - 0.1, ask: b + 0.1 });
        }

        let tick = PriceUpdate::new("binance", "BTC/USDT", 139.0, 140.0, 40);
        let mut engine = StatisticalArbitrageEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }
}
