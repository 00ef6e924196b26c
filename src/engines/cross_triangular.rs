// =============================================================================
// Cross-Exchange Triangular Arbitrage Engine
// =============================================================================
//
// Like the single-exchange triangular engine, but each leg of the cycle may
// execute on a different venue. A leg that changes exchange from the
// previous one counts as an implicit transfer with an estimated time drawn
// from a static table; paths whose total transfer time exceeds
// `max_transfer_time_ms` are rejected. Grounded in
// `original_source/engine_cross_triangular.py`.
// =============================================================================

use std::collections::HashSet;

use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{CrossExchangeOpportunity, CrossLeg, Side};
use crate::types::{split_pair, PriceUpdate};

const ROOT_CURRENCIES: [&str; 4] = ["USDT", "USD", "USDC", "BUSD"];

/// Estimated wire time (ms) to move funds between two venues. Same-exchange
/// legs are free; cross-exchange legs fall back to a flat default when the
/// pair isn't in the table, matching the spec's "e.g., Binance<->Kraken =
/// 60s" example.
fn transfer_time_ms(a: &str, b: &str) -> u64 {
    if a == b {
        return 0;
    }
    let pair = {
        let mut v = [a, b];
        v.sort();
        v
    };
    match pair {
        ["binance", "kraken"] => 60_000,
        ["binance", "coinbase"] => 45_000,
        ["coinbase", "kraken"] => 50_000,
        _ => 60_000,
    }
}

struct Edge {
    exchange: String,
    pair: String,
    side: Side,
    to_currency: String,
    price: f64,
}

fn build_edges(snapshot: &std::collections::HashMap<String, std::collections::HashMap<String, crate::types::ExchangeQuote>>) -> Vec<Edge> {
    let mut edges = Vec::new();
    for (pair, by_exchange) in snapshot {
        let Some((base, quote)) = split_pair(pair) else { continue };
        for (exchange, q) in by_exchange {
            edges.push(Edge {
                exchange: exchange.clone(),
                pair: pair.clone(),
                side: Side::Buy,
                to_currency: base.to_string(),
                price: q.ask,
            });
            edges.push(Edge {
                exchange: exchange.clone(),
                pair: pair.clone(),
                side: Side::Sell,
                to_currency: quote.to_string(),
                price: q.bid,
            });
        }
    }
    edges
}

fn from_currency(edge: &Edge) -> Option<&str> {
    let (base, quote) = split_pair(&edge.pair)?;
    Some(match edge.side {
        Side::Buy => quote,
        Side::Sell => base,
    })
}

pub struct CrossTriangularEngine;

impl CrossTriangularEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CrossTriangularEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for CrossTriangularEngine {
    fn name(&self) -> &'static str {
        "cross_triangular"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let snapshot = ctx.market.full_snapshot();
        let edges = build_edges(&snapshot);

        let mut events = Vec::new();

        for root in ROOT_CURRENCIES {
            for e1 in &edges {
                if from_currency(e1) != Some(root) {
                    continue;
                }
                for e2 in &edges {
                    if from_currency(e2) != Some(e1.to_currency.as_str()) {
                        continue;
                    }
                    for e3 in &edges {
                        if from_currency(e3) != Some(e2.to_currency.as_str()) || e3.to_currency != root {
                            continue;
                        }

                        // Only evaluate paths touching >= 2 exchanges and
                        // that include the venue of the tick that triggered
                        // this evaluation (avoids re-emitting every path on
                        // every unrelated tick).
                        let exchanges: HashSet<&str> =
                            [e1.exchange.as_str(), e2.exchange.as_str(), e3.exchange.as_str()].into_iter().collect();
                        if exchanges.len() < 2 || !exchanges.contains(tick.exchange.as_str()) {
                            continue;
                        }

                        let legs = [e1, e2, e3];
                        let transfer_time = transfer_time_ms(&legs[0].exchange, &legs[1].exchange)
                            + transfer_time_ms(&legs[1].exchange, &legs[2].exchange);
                        if transfer_time > ctx.config.max_transfer_time_ms {
                            continue;
                        }

                        let mut amount = ctx.config.triangular_start_amount;
                        for leg in &legs {
                            let fee = ctx.config.fee_for(&leg.exchange) / 100.0;
                            amount = match leg.side {
                                Side::Buy => (amount / leg.price) * (1.0 - fee),
                                Side::Sell => (amount * leg.price) * (1.0 - fee),
                            };
                        }

                        let profit_pct = (amount - ctx.config.triangular_start_amount) / ctx.config.triangular_start_amount * 100.0;
                        if profit_pct < ctx.config.min_cross_triangular_threshold {
                            continue;
                        }

                        let risk_score = (0.3 * (exchanges.len() as f64 / 3.0)
                            + 0.4 * (transfer_time as f64 / ctx.config.max_transfer_time_ms as f64)
                            + 0.3 * (1.0 - profit_pct / 1.0).max(0.0))
                        .clamp(0.0, 1.0);

                        let opp = CrossExchangeOpportunity {
                            root_currency: root.to_string(),
                            legs: legs
                                .iter()
                                .map(|l| CrossLeg {
                                    exchange: l.exchange.clone(),
                                    pair: l.pair.clone(),
                                    side: l.side,
                                    price: l.price,
                                })
                                .collect(),
                            num_exchanges: exchanges.len(),
                            transfer_time_ms: transfer_time,
                            start_amount: ctx.config.triangular_start_amount,
                            end_amount: amount,
                            profit_pct,
                            risk_score,
                            ts: tick.ts,
                        };

                        info!(root = %opp.root_currency, profit_pct = opp.profit_pct, exchanges = opp.num_exchanges, "cross-exchange triangular opportunity");
                        events.push(BusEvent::CrossTriangularOpp(opp));
                    }
                }
            }
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
    fn finds_cycle_spanning_two_exchanges() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.min_cross_triangular_threshold = -1000.0;
        config.max_transfer_time_ms = 120_000;

        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0)));
        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("kraken", "ETH/BTC", 0.054, 0.0541, 0)));
        let tick = PriceUpdate::new("binance", "ETH/USDT", 3510.0, 3511.0, 1);
        market.update_and_snapshot(ExchangeQuote::from(&tick));

        let mut engine = CrossTriangularEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);

        assert!(events.iter().any(|e| matches!(e, BusEvent::CrossTriangularOpp(_))));
    }

    #[test]
    fn rejects_path_exceeding_max_transfer_time() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.min_cross_triangular_threshold = -1000.0;
        config.max_transfer_time_ms = 1;

        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0)));
        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("kraken", "ETH/BTC", 0.054, 0.0541, 0)));
        let tick = PriceUpdate::new("binance", "ETH/USDT", 3510.0, 3511.0, 1);
        market.update_and_snapshot(ExchangeQuote::from(&tick));

        let mut engine = CrossTriangularEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }
}
