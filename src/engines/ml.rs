// =============================================================================
// ML Feature/Prediction Engine (rule-based fallback)
// =============================================================================
//
// Extracts a `FeatureVector` from the tick ring, indicator module, and
// Market State Store on every tick, then scores it with a deterministic
// weighted sum. This is the `rule_based` model required to always be
// available; an `onnx` variant can layer an external model file on top
// without changing the feature extraction, matching the source's
// `RuleBasedPredictor` / `ONNXPredictor` split in
// `original_source/engine_ml_advanced.py`.
// =============================================================================

use tracing::debug;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::macd::current_macd;
use crate::indicators::roc::current_roc;
use crate::indicators::rsi::current_rsi;
use crate::opportunities::{FeatureVector, Prediction};
use crate::tick_ring::TickSample;
use crate::types::PriceUpdate;

const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const ROC_PERIOD: usize = 12;
const SHORT_VOLATILITY_WINDOW: usize = 10;
const LONG_VOLATILITY_WINDOW: usize = 50;
const IMBALANCE_WINDOW: usize = 10;
const MIN_SAMPLES: usize = 20;

fn zscore(mids: &[f64]) -> f64 {
    if mids.len() < 2 {
        return 0.0;
    }
    let mean = mids.iter().sum::<f64>() / mids.len() as f64;
    let variance = mids.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (mids.len() - 1) as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        0.0
    } else {
        (mids.last().unwrap() - mean) / std
    }
}

/// Realized volatility (stddev of simple returns) over the trailing `window`
/// mids, or the whole series if shorter.
fn realized_volatility(mids: &[f64], window: usize) -> f64 {
    let slice = if mids.len() > window { &mids[mids.len() - window..] } else { mids };
    if slice.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = slice.windows(2).map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] }).collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Most recent tick-over-tick change in mid price.
fn price_velocity(mids: &[f64]) -> f64 {
    if mids.len() < 2 {
        return 0.0;
    }
    mids[mids.len() - 1] - mids[mids.len() - 2]
}

/// Change in velocity between the last two ticks, i.e. the discrete second
/// derivative of the mid-price series.
fn price_acceleration(mids: &[f64]) -> f64 {
    let n = mids.len();
    if n < 3 {
        return 0.0;
    }
    mids[n - 1] - 2.0 * mids[n - 2] + mids[n - 3]
}

/// Directional pressure from bid/ask drift over the trailing window, in
/// `[-1, 1]`. The ingestion pipeline carries top-of-book quotes only (see
/// `TickSample`), so this proxies order-book imbalance from quote movement
/// rather than resting bid/ask volume.
fn order_book_imbalance(samples: &[TickSample]) -> f64 {
    let slice = if samples.len() > IMBALANCE_WINDOW { &samples[samples.len() - IMBALANCE_WINDOW..] } else { samples };
    if slice.len() < 2 {
        return 0.0;
    }
    let first = slice.first().unwrap();
    let last = slice.last().unwrap();
    let bid_change = last.bid - first.bid;
    let ask_change = last.ask - first.ask;
    let denom = bid_change.abs() + ask_change.abs();
    if denom == 0.0 {
        0.0
    } else {
        ((bid_change - ask_change) / denom).clamp(-1.0, 1.0)
    }
}

/// Coefficient of variation of mid prices across every exchange currently
/// quoting `pair`.
fn cross_exchange_dispersion(mids: &[f64]) -> f64 {
    if mids.len() < 2 {
        return 0.0;
    }
    let mean = mids.iter().sum::<f64>() / mids.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = mids.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / mids.len() as f64;
    variance.sqrt() / mean
}

fn extract_features(ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Option<FeatureVector> {
    let samples = ctx.ticks.snapshot(&tick.exchange, &tick.pair);
    if samples.len() < MIN_SAMPLES {
        return None;
    }
    let mids: Vec<f64> = samples.iter().map(|s| s.mid).collect();

    let rsi = current_rsi(&mids, RSI_PERIOD).map(|(v, _)| v).unwrap_or(50.0);
    let macd_histogram = current_macd(&mids).map(|m| m.histogram).unwrap_or(0.0);
    let bollinger = calculate_bollinger(&mids, BOLLINGER_PERIOD, 2.0);
    let bollinger_bandwidth = bollinger.map(|b| b.width).unwrap_or(0.0);
    let bollinger_position = bollinger.map(|b| b.position(*mids.last().unwrap())).unwrap_or(0.5);
    let roc = current_roc(&mids, ROC_PERIOD).unwrap_or(0.0);
    let z_score = zscore(&mids);
    let short_volatility = realized_volatility(&mids, SHORT_VOLATILITY_WINDOW);
    let long_volatility = realized_volatility(&mids, LONG_VOLATILITY_WINDOW);
    let quotes = ctx.market.quotes_for(&tick.pair);
    let exchange_count = quotes.len() as u32;
    let spread_pct = tick.spread_pct();
    let dispersion_mids: Vec<f64> = quotes.values().map(|q| q.mid).collect();

    Some(FeatureVector {
        exchange_count,
        spread_pct,
        rsi,
        macd_histogram,
        bollinger_bandwidth,
        bollinger_position,
        roc,
        short_volatility,
        long_volatility,
        z_score,
        price_velocity: price_velocity(&mids),
        price_acceleration: price_acceleration(&mids),
        order_book_imbalance: order_book_imbalance(&samples),
        cross_exchange_dispersion: cross_exchange_dispersion(&dispersion_mids),
    })
}

/// Weighted-sum score over normalized features, clamped to `[0, 1]`.
/// Weights were chosen to mirror the emphasis of the source's
/// `RuleBasedPredictor` — momentum and spread extremity dominate, volatility
/// and dispersion contribute less.
fn rule_based_probability(f: &FeatureVector) -> f64 {
    let rsi_extremity = ((f.rsi - 50.0).abs() / 50.0).min(1.0);
    let macd_factor = (f.macd_histogram.abs() * 10.0).min(1.0);
    let bollinger_width_factor = (f.bollinger_bandwidth / 10.0).min(1.0);
    let bollinger_position_factor = (f.bollinger_position - 0.5).abs().min(1.0) * 2.0;
    let roc_factor = (f.roc.abs() / 5.0).min(1.0);
    let z_factor = (f.z_score.abs() / 3.0).min(1.0);
    let short_volatility_factor = (f.short_volatility * 100.0).min(1.0);
    let long_volatility_factor = (f.long_volatility * 100.0).min(1.0);
    let spread_factor = (f.spread_pct / 1.0).min(1.0);
    let velocity_factor = (f.price_velocity.abs() / (f.spread_pct.max(0.01))).min(1.0);
    let acceleration_factor = (f.price_acceleration.abs() / (f.spread_pct.max(0.01))).min(1.0);
    let imbalance_factor = f.order_book_imbalance.abs().min(1.0);
    let dispersion_factor = (f.cross_exchange_dispersion * 100.0).min(1.0);

    let score = 0.12 * rsi_extremity
        + 0.12 * macd_factor
        + 0.08 * bollinger_width_factor
        + 0.05 * bollinger_position_factor
        + 0.10 * roc_factor
        + 0.15 * z_factor
        + 0.08 * short_volatility_factor
        + 0.07 * long_volatility_factor
        + 0.08 * spread_factor
        + 0.05 * velocity_factor
        + 0.03 * acceleration_factor
        + 0.04 * imbalance_factor
        + 0.03 * dispersion_factor;

    score.clamp(0.0, 1.0)
}

fn confidence(f: &FeatureVector) -> f64 {
    let exchange_factor = (f.exchange_count as f64 / 5.0).min(1.0);
    let z_factor = (f.z_score.abs() / 3.0).min(1.0);
    let stability_factor = 1.0 - (f.short_volatility * 200.0).min(1.0);
    (0.4 * exchange_factor + 0.3 * z_factor + 0.3 * stability_factor).clamp(0.0, 1.0)
}

pub struct MlEngine {
    model: &'static str,
}

impl MlEngine {
    pub fn new() -> Self {
        Self { model: "rule_based" }
    }
}

impl Default for MlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MlEngine {
    fn name(&self) -> &'static str {
        "ml"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let Some(features) = extract_features(ctx, tick) else { return Vec::new() };

        let prediction = Prediction {
            pair: tick.pair.clone(),
            probability: rule_based_probability(&features),
            confidence: confidence(&features),
            features,
            model: self.model,
            ts: tick.ts,
        };

        debug!(pair = %prediction.pair, probability = prediction.probability, "ml prediction");
        vec![BusEvent::Prediction(prediction)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::market_state::MarketStateStore;
    use crate::tick_ring::TickRingStore;

    fn ctx<'a>(market: &'a MarketStateStore, ticks: &'a TickRingStore, config: &'a RuntimeConfig) -> EngineContext<'a> {
        EngineContext { market, ticks, config }
    }

    #[test]
    fn insufficient_history_yields_no_prediction() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(500);
        let config = RuntimeConfig::default();

        let mut engine = MlEngine::new();
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        ticks.push("binance", "BTC/USDT", TickSample { ts: 0, mid: tick.mid(), bid: tick.bid, ask: tick.ask });

        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }

    #[test]
    fn emits_prediction_within_bounds_once_warm() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(500);
        let config = RuntimeConfig::default();

        let mut engine = MlEngine::new();
        let mut events = Vec::new();
        for i in 0..40 {
            let price = 65000.0 + (i as f64 * 3.0).sin() * 50.0;
            let tick = PriceUpdate::new("binance", "BTC/USDT", price - 1.0, price + 1.0, i);
            ticks.push("binance", "BTC/USDT", TickSample { ts: i, mid: tick.mid(), bid: tick.bid, ask: tick.ask });
            market.update_and_snapshot(crate::types::ExchangeQuote::from(&tick));
            events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        }

        let prediction = events
            .iter()
            .find_map(|e| if let BusEvent::Prediction(p) = e { Some(p) } else { None })
            .expect("expected a prediction once warm");
        assert!(prediction.probability >= 0.0 && prediction.probability <= 1.0);
        assert!(prediction.confidence >= 0.0 && prediction.confidence <= 1.0);
        assert_eq!(prediction.model, "rule_based");
        assert!(prediction.features.bollinger_position.is_finite());
        assert!(prediction.features.order_book_imbalance >= -1.0 && prediction.features.order_book_imbalance <= 1.0);
    }

    #[test]
    fn cross_exchange_dispersion_is_zero_for_a_single_venue() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(500);
        let config = RuntimeConfig::default();

        let mut engine = MlEngine::new();
        let mut events = Vec::new();
        for i in 0..25 {
            let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, i);
            ticks.push("binance", "BTC/USDT", TickSample { ts: i, mid: tick.mid(), bid: tick.bid, ask: tick.ask });
            market.update_and_snapshot(crate::types::ExchangeQuote::from(&tick));
            events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        }

        let prediction = events
            .iter()
            .find_map(|e| if let BusEvent::Prediction(p) = e { Some(p) } else { None })
            .expect("expected a prediction once warm");
        assert_eq!(prediction.features.cross_exchange_dispersion, 0.0);
    }
}
