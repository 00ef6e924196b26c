// =============================================================================
// Simple Cross-Exchange Arbitrage Engine
// =============================================================================
//
// Buy on the exchange with the lowest ask, sell on the exchange with the
// highest bid, for every pair of venues quoting the same pair. Grounded in
// `original_source/engine.py`'s `ArbitrageEngine._check_arbitrage`.
// =============================================================================

use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::ArbitrageOpportunity;
use crate::types::PriceUpdate;

#[derive(Default)]
pub struct SimpleCrossEngine;

impl SimpleCrossEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for SimpleCrossEngine {
    fn name(&self) -> &'static str {
        "simple_cross"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let quotes = ctx.market.quotes_for(&tick.pair);
        if quotes.len() < 2 {
            return Vec::new();
        }

        let mut events = Vec::new();
        let exchanges: Vec<&String> = quotes.keys().collect();

        for (i, ex1) in exchanges.iter().enumerate() {
            for ex2 in &exchanges[i + 1..] {
                let q1 = &quotes[*ex1];
                let q2 = &quotes[*ex2];

                if let Some(opp) = evaluate(&tick.pair, *ex1, q1.ask, *ex2, q2.bid, ctx.config.min_profit_threshold, tick.ts) {
                    events.push(BusEvent::SimpleOpp(opp));
                }
                if let Some(opp) = evaluate(&tick.pair, *ex2, q2.ask, *ex1, q1.bid, ctx.config.min_profit_threshold, tick.ts) {
                    events.push(BusEvent::SimpleOpp(opp));
                }
            }
        }

        for event in &events {
            if let BusEvent::SimpleOpp(opp) = event {
                info!(pair = %opp.pair, buy = %opp.buy_exchange, sell = %opp.sell_exchange, profit_pct = opp.profit_pct, "simple cross-exchange opportunity");
            }
        }

        events
    }
}

fn evaluate(
    pair: &str,
    buy_exchange: &str,
    buy_price: f64,
    sell_exchange: &str,
    sell_price: f64,
    min_profit_threshold: f64,
    ts: i64,
) -> Option<ArbitrageOpportunity> {
    if buy_price <= 0.0 || sell_price <= buy_price {
        return None;
    }
    let profit_pct = ArbitrageOpportunity::profit_pct(buy_price, sell_price);
    if profit_pct < min_profit_threshold {
        return None;
    }
    Some(ArbitrageOpportunity {
        pair: pair.to_string(),
        buy_exchange: buy_exchange.to_string(),
        sell_exchange: sell_exchange.to_string(),
        buy_price,
        sell_price,
        profit_pct,
        ts,
    })
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
    fn emits_opportunity_matching_spec_example() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0)));
        let tick = PriceUpdate::new("coinbase", "BTC/USDT", 65150.0, 65160.0, 1);
        market.update_and_snapshot(ExchangeQuote::from(&tick));

        let mut engine = SimpleCrossEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);

        let opp = events
            .iter()
            .find_map(|e| if let BusEvent::SimpleOpp(o) = e { Some(o) } else { None })
            .expect("expected a simple cross opportunity");
        assert_eq!(opp.buy_exchange, "binance");
        assert_eq!(opp.sell_exchange, "coinbase");
        assert!((opp.buy_price - 65010.0).abs() < 1e-9);
        assert!((opp.sell_price - 65150.0).abs() < 1e-9);
        assert!((opp.profit_pct - 0.2153514843870174).abs() < 1e-6);
    }

    #[test]
    fn no_opportunity_below_threshold() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.min_profit_threshold = 1.0;

        market.update_and_snapshot(ExchangeQuote::from(&PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0)));
        let tick = PriceUpdate::new("coinbase", "BTC/USDT", 65005.0, 65015.0, 1);
        market.update_and_snapshot(ExchangeQuote::from(&tick));

        let mut engine = SimpleCrossEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }

    #[test]
    fn single_exchange_produces_nothing() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        market.update_and_snapshot(ExchangeQuote::from(&tick));

        let mut engine = SimpleCrossEngine::new();
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }
}
