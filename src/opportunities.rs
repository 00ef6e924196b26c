// =============================================================================
// Opportunity value types — the payloads every detection engine emits
// =============================================================================
//
// One struct per engine output, plus the enums that qualify them. These are
// the event bodies carried by `bus::BusEvent` and returned verbatim by the
// `/api/<engine>` snapshot routes and the CSV export routes.
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuturesDirection {
    CashAndCarry,
    ReverseCashCarry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexCexDirection {
    DexToCex,
    CexToDex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MevRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyDirection {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatArbDirection {
    LongSpread,
    ShortSpread,
    Neutral,
}

/// Simple cross-exchange spot arbitrage: buy on one venue, sell on another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub pair: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub profit_pct: f64,
    pub ts: i64,
}

/// One `buy`/`sell` leg of a triangular or cross-exchange-triangular cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub side: Side,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangularOpportunity {
    pub exchange: String,
    pub base_currency: String,
    pub pair_steps: [String; 3],
    pub side_steps: [Side; 3],
    pub start_amount: f64,
    pub end_amount: f64,
    pub profit_pct: f64,
    pub prices_used: [f64; 3],
    pub ts: i64,
}

/// One leg of a cross-exchange triangular cycle — carries the exchange it
/// executed on, since unlike `TriangularOpportunity` the cycle can span
/// venues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossLeg {
    pub exchange: String,
    pub pair: String,
    pub side: Side,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossExchangeOpportunity {
    pub root_currency: String,
    pub legs: Vec<CrossLeg>,
    pub num_exchanges: usize,
    pub transfer_time_ms: u64,
    pub start_amount: f64,
    pub end_amount: f64,
    pub profit_pct: f64,
    pub risk_score: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatArbSignal {
    pub pair_a: String,
    pub pair_b: String,
    pub exchange: String,
    pub z_score: f64,
    pub spread: f64,
    pub mean_spread: f64,
    pub std_spread: f64,
    pub half_life: Option<f64>,
    pub correlation: f64,
    pub signal: StatArbDirection,
    pub confidence: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturesSpotOpportunity {
    pub exchange: String,
    pub symbol: String,
    pub direction: FuturesDirection,
    pub spot_price: f64,
    pub futures_price: f64,
    pub basis_pct: f64,
    pub funding_rate: f64,
    pub annualized_rate: f64,
    pub z_score: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexCexOpportunity {
    pub dex: String,
    pub chain: String,
    pub cex: String,
    pub pair: String,
    pub direction: DexCexDirection,
    pub trade_size_usd: f64,
    pub gross_profit_usd: f64,
    pub gas_cost_usd: f64,
    pub net_profit_usd: f64,
    pub price_impact: f64,
    pub slippage: f64,
    pub liquidity_usd: f64,
    pub mev_risk: MevRisk,
    pub confidence: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyOpportunity {
    pub stale_exchange: String,
    pub fast_exchange: String,
    pub pair: String,
    pub stale_price: f64,
    pub consensus_price: f64,
    pub predicted_move_pct: f64,
    pub staleness_ms: i64,
    pub time_window_ms: i64,
    pub direction: LatencyDirection,
    pub confidence: f64,
    pub risk_score: f64,
    pub ts: i64,
}

/// Input to the ML engine's predictor, pulled from the Tick Buffer Ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub exchange_count: u32,
    pub spread_pct: f64,
    pub rsi: f64,
    pub macd_histogram: f64,
    pub bollinger_bandwidth: f64,
    /// Position of the current mid within the Bollinger band, 0 (lower) to
    /// 1 (upper); can fall outside that range when price pierces a band.
    pub bollinger_position: f64,
    pub roc: f64,
    /// Realized volatility over a short trailing window.
    pub short_volatility: f64,
    /// Realized volatility over a longer trailing window.
    pub long_volatility: f64,
    pub z_score: f64,
    /// Most recent tick-over-tick change in mid price.
    pub price_velocity: f64,
    /// Change in `price_velocity` between the last two ticks.
    pub price_acceleration: f64,
    /// Directional pressure inferred from bid/ask drift over a short window
    /// (no L2 depth is ingested, so this approximates order-book imbalance
    /// from top-of-book quote movement rather than resting volume).
    pub order_book_imbalance: f64,
    /// Coefficient of variation of mid prices across exchanges quoting the
    /// pair right now.
    pub cross_exchange_dispersion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub pair: String,
    pub probability: f64,
    pub confidence: f64,
    pub features: FeatureVector,
    #[serde(skip_deserializing, default = "default_prediction_model")]
    pub model: &'static str,
    pub ts: i64,
}

fn default_prediction_model() -> &'static str {
    ""
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub exchange: String,
    pub pair: String,
    pub kind: String,
    pub detail: String,
    pub ts: i64,
}

impl ArbitrageOpportunity {
    /// `profit_pct` for buying at `buy_price` and selling at `sell_price`.
    pub fn profit_pct(buy_price: f64, sell_price: f64) -> f64 {
        (sell_price - buy_price) / buy_price * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_profit_pct_matches_spec_example() {
        let profit = ArbitrageOpportunity::profit_pct(65010.0, 65150.0);
        assert!((profit - 0.2153514843870174).abs() < 1e-9);
    }

    #[test]
    fn opportunity_round_trips_through_json() {
        let opp = ArbitrageOpportunity {
            pair: "BTC/USDT".into(),
            buy_exchange: "binance".into(),
            sell_exchange: "coinbase".into(),
            buy_price: 65010.0,
            sell_price: 65150.0,
            profit_pct: 0.2154,
            ts: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&opp).unwrap();
        let back: ArbitrageOpportunity = serde_json::from_str(&json).unwrap();
        assert_eq!(opp, back);
    }
}
