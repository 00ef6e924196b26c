// =============================================================================
// Latency Arbitrage Engine
// =============================================================================
//
// Tracks per-(exchange, pair) update cadence and flags a feed as stale once
// it hasn't ticked in longer than its per-exchange threshold. Treats the
// timestamp of the tick currently being processed as "now" (there is no
// wall clock in the detection pipeline — every engine reasons purely off
// tick timestamps), matching the spec's worked example where a consensus
// price is computed at the instant a fast exchange ticks, relative to a
// known-stale exchange's last update. Grounded in
// `original_source/engine_latency.py`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{LatencyDirection, LatencyOpportunity};
use crate::types::PriceUpdate;

const HISTORY_CAP: usize = 200;
const MIN_SAMPLES_FOR_METRICS: usize = 10;
const MIN_CONSENSUS_EXCHANGES: usize = 2;

#[derive(Default)]
struct FeedHistory {
    timestamps: VecDeque<i64>,
    prices: VecDeque<f64>,
}

impl FeedHistory {
    fn push(&mut self, ts: i64, price: f64) {
        self.timestamps.push_back(ts);
        self.prices.push_back(price);
        while self.timestamps.len() > HISTORY_CAP {
            self.timestamps.pop_front();
            self.prices.pop_front();
        }
    }

    fn update_frequency_hz(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        let span_ms = (*self.timestamps.back().unwrap() - *self.timestamps.front().unwrap()) as f64;
        if span_ms <= 0.0 {
            return 0.0;
        }
        (self.timestamps.len() - 1) as f64 / (span_ms / 1000.0)
    }

    fn last_price(&self) -> f64 {
        self.prices.back().copied().unwrap_or(0.0)
    }

    fn last_ts(&self) -> i64 {
        self.timestamps.back().copied().unwrap_or(0)
    }
}

struct FeedSnapshot {
    price: f64,
    stale_duration_ms: i64,
    is_stale: bool,
    update_frequency_hz: f64,
    avg_latency_ms: f64,
}

fn confidence(fast_count: usize, diff_pct: f64, stale_duration_ms: i64, fast_prices: &[f64]) -> f64 {
    let consensus_factor = (fast_count as f64 / 3.0).min(1.0);
    let diff_factor = (diff_pct.abs() / 0.5).min(1.0);
    let staleness_factor = (stale_duration_ms as f64 / 2000.0).min(1.0);

    let agreement_factor = if fast_prices.len() > 1 {
        let mean = fast_prices.iter().sum::<f64>() / fast_prices.len() as f64;
        let variance = fast_prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (fast_prices.len() - 1) as f64;
        let std = variance.sqrt();
        if mean == 0.0 {
            0.5
        } else {
            1.0 - ((std / mean) * 100.0).min(1.0)
        }
    } else {
        0.5
    };

    (0.25 * consensus_factor + 0.25 * diff_factor + 0.25 * staleness_factor + 0.25 * agreement_factor).clamp(0.0, 1.0)
}

fn risk_score(time_window_ms: i64, diff_pct: f64, avg_latency_ms: f64) -> f64 {
    let time_risk = 1.0 - (time_window_ms as f64 / 1000.0).min(1.0);
    let diff_risk = if diff_pct.abs() > 0.5 {
        0.8
    } else if diff_pct.abs() > 0.2 {
        0.4
    } else {
        0.1
    };
    let latency_risk = if avg_latency_ms > 500.0 {
        0.6
    } else if avg_latency_ms > 200.0 {
        0.3
    } else {
        0.1
    };
    (0.4 * time_risk + 0.3 * diff_risk + 0.3 * latency_risk).clamp(0.0, 1.0)
}

pub struct LatencyEngine {
    histories: HashMap<(String, String), FeedHistory>,
}

impl LatencyEngine {
    pub fn new() -> Self {
        Self { histories: HashMap::new() }
    }

    fn snapshot(&self, exchange: &str, pair: &str, now: i64, threshold_ms: i64) -> Option<FeedSnapshot> {
        let history = self.histories.get(&(exchange.to_string(), pair.to_string()))?;
        if history.timestamps.len() < MIN_SAMPLES_FOR_METRICS {
            return None;
        }

        let stale_duration_ms = (now - history.last_ts()).max(0);
        let is_stale = stale_duration_ms > threshold_ms;
        let update_frequency_hz = history.update_frequency_hz();

        let mut deltas = Vec::new();
        for w in history.timestamps.iter().collect::<Vec<_>>().windows(2) {
            deltas.push((*w[1] - *w[0]) as f64);
        }
        let avg_latency_ms = if deltas.is_empty() { 0.0 } else { deltas.iter().sum::<f64>() / deltas.len() as f64 };

        Some(FeedSnapshot {
            price: history.last_price(),
            stale_duration_ms: if is_stale { stale_duration_ms } else { 0 },
            is_stale,
            update_frequency_hz,
            avg_latency_ms,
        })
    }
}

impl Default for LatencyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LatencyEngine {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let key = (tick.exchange.clone(), tick.pair.clone());
        self.histories.entry(key).or_default().push(tick.ts, tick.mid());

        let exchanges_with_pair: Vec<String> = ctx
            .market
            .quotes_for(&tick.pair)
            .keys()
            .cloned()
            .collect();
        if exchanges_with_pair.len() < MIN_CONSENSUS_EXCHANGES {
            return Vec::new();
        }

        let mut metrics: HashMap<String, FeedSnapshot> = HashMap::new();
        for exchange in &exchanges_with_pair {
            let threshold = ctx.config.staleness_threshold_for(exchange);
            if let Some(snap) = self.snapshot(exchange, &tick.pair, tick.ts, threshold) {
                metrics.insert(exchange.clone(), snap);
            }
        }
        if metrics.len() < 2 {
            return Vec::new();
        }

        let stale_exchanges: Vec<&String> = metrics
            .iter()
            .filter(|(_, m)| m.is_stale || m.stale_duration_ms > ctx.config.min_staleness_ms)
            .map(|(ex, _)| ex)
            .collect();
        let fast_exchanges: Vec<&String> = metrics
            .iter()
            .filter(|(_, m)| !m.is_stale && m.stale_duration_ms < ctx.config.min_staleness_ms)
            .map(|(ex, _)| ex)
            .collect();

        if stale_exchanges.is_empty() || fast_exchanges.is_empty() {
            return Vec::new();
        }

        let fast_prices: Vec<f64> = fast_exchanges.iter().map(|ex| metrics[*ex].price).collect();
        let consensus_price = fast_prices.iter().sum::<f64>() / fast_prices.len() as f64;

        let best_fast_exchange = fast_exchanges
            .iter()
            .min_by(|a, b| metrics[**a].stale_duration_ms.cmp(&metrics[**b].stale_duration_ms))
            .map(|e| (*e).clone())
            .unwrap_or_else(|| fast_exchanges[0].clone());

        let mut events = Vec::new();
        for stale_exchange in stale_exchanges {
            let m = &metrics[stale_exchange];
            let stale_price = m.price;
            if stale_price == 0.0 {
                continue;
            }

            let price_diff = consensus_price - stale_price;
            let diff_pct = price_diff / stale_price * 100.0;
            if diff_pct.abs() < ctx.config.min_latency_price_diff_percent {
                continue;
            }

            let direction = if price_diff > 0.0 { LatencyDirection::Long } else { LatencyDirection::Short };

            let expected_update_ms = if m.update_frequency_hz > 0.0 { 1000.0 / m.update_frequency_hz } else { 1000.0 };
            let time_window_ms = (expected_update_ms * 1.5 - m.stale_duration_ms as f64).max(0.0) as i64;
            if time_window_ms > ctx.config.max_latency_time_window_ms {
                continue;
            }

            let opp = LatencyOpportunity {
                stale_exchange: stale_exchange.clone(),
                fast_exchange: best_fast_exchange.clone(),
                pair: tick.pair.clone(),
                stale_price,
                consensus_price,
                predicted_move_pct: diff_pct,
                staleness_ms: m.stale_duration_ms,
                time_window_ms,
                direction,
                confidence: confidence(fast_exchanges.len(), diff_pct, m.stale_duration_ms, &fast_prices),
                risk_score: risk_score(time_window_ms, diff_pct, m.avg_latency_ms),
                ts: tick.ts,
            };

            info!(pair = %opp.pair, stale = %opp.stale_exchange, move_pct = opp.predicted_move_pct, "latency opportunity");
            events.push(BusEvent::LatencyOpp(opp));
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
    use crate::types::ExchangeQuote;

    fn ctx<'a>(market: &'a MarketStateStore, ticks: &'a TickRingStore, config: &'a RuntimeConfig) -> EngineContext<'a> {
        EngineContext { market, ticks, config }
    }

    #[test]
    fn matches_spec_worked_example() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.min_latency_price_diff_percent = 0.05;
        config.max_latency_time_window_ms = 10_000;

        let mut engine = LatencyEngine::new();

        // coinbase last updated at t=-1200ms with price 64900, then goes silent.
        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("coinbase", "BTC/USDT", 64899.0, 64901.0, -1200)));
        for i in 0..10 {
            let ts = -1200 + i * 100;
            engine.on_tick(&ctx(&market, &ticks, &config), &PriceUpdate::new("coinbase", "BTC/USDT", 64899.0, 64901.0, ts));
        }

        // binance ticks every 100ms up to t=0 with price 65000.
        let mut last_events = Vec::new();
        for i in 0..=12 {
            let ts = i * 100;
            let tick = PriceUpdate::new("binance", "BTC/USDT", 64999.0, 65001.0, ts);
            market.update_and_snapshot(ExchangeQuote::from(&tick));
            last_events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        }

        let opp = last_events
            .iter()
            .find_map(|e| if let BusEvent::LatencyOpp(o) = e { Some(o) } else { None })
            .expect("expected a latency opportunity");
        assert_eq!(opp.stale_exchange, "coinbase");
        assert_eq!(opp.direction, LatencyDirection::Long);
        assert!(opp.predicted_move_pct > 0.0);
    }

    #[test]
    fn single_exchange_yields_nothing() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        let mut engine = LatencyEngine::new();
        let mut events = Vec::new();
        for i in 0..15 {
            let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, i * 100);
            market.update_and_snapshot(ExchangeQuote::from(&tick));
            events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        }
        assert!(events.is_empty());
    }
}
