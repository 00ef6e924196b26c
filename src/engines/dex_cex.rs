// =============================================================================
// DEX/CEX Arbitrage Engine
// =============================================================================
//
// Compares a centralized exchange's quote against a synthetic constant-
// product AMM pool for the same asset. A real integration would source pool
// reserves from on-chain state through a `DexPoolFeed`; the simulated
// default mirrors a pool deterministically off the CEX mid so tests are
// reproducible. Grounded in `original_source/engine_dex_cex.py`.
// =============================================================================

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{DexCexDirection, DexCexOpportunity, MevRisk};
use crate::types::PriceUpdate;

const MIN_TRADE_SIZE_USD: f64 = 100.0;
const MAX_TRADE_SIZE_USD: f64 = 50_000.0;
const LIQUIDITY_FRACTION: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct DexPool {
    pub token0_reserve: f64,
    pub token1_reserve: f64,
    pub fee_tier: f64,
    pub liquidity_usd: f64,
}

impl DexPool {
    pub fn price(&self) -> f64 {
        if self.token0_reserve == 0.0 {
            0.0
        } else {
            self.token1_reserve / self.token0_reserve
        }
    }

    /// Constant-product swap output for `input_amount` of token0, net of the
    /// pool fee.
    pub fn amount_out(&self, input_amount: f64) -> f64 {
        let input_with_fee = input_amount * (1.0 - self.fee_tier);
        (self.token1_reserve * input_with_fee) / (self.token0_reserve + input_with_fee)
    }

    pub fn price_impact(&self, input_amount_token0: f64) -> f64 {
        if self.token0_reserve == 0.0 {
            return f64::INFINITY;
        }
        input_amount_token0 / self.token0_reserve
    }
}

struct DexProfile {
    name: &'static str,
    chain: &'static str,
    fee_tier: f64,
}

const DEX_PROFILES: [DexProfile; 3] = [
    DexProfile { name: "uniswap_v3", chain: "ethereum", fee_tier: 0.0005 },
    DexProfile { name: "quickswap", chain: "polygon", fee_tier: 0.003 },
    DexProfile { name: "pancakeswap", chain: "bsc", fee_tier: 0.0025 },
];

const DEFAULT_SWAP_COST_USD: f64 = 10.0;

/// Flat per-swap gas cost in USD for `chain`, from the configured
/// `gas_params_usd` table (see `config.rs`'s defaults for ethereum,
/// arbitrum, polygon), falling back to a flat default for an unconfigured
/// chain.
fn swap_cost_usd(chain: &str, gas_params_usd: &HashMap<String, f64>) -> f64 {
    gas_params_usd.get(chain).copied().unwrap_or(DEFAULT_SWAP_COST_USD)
}

fn dex_token_pair(cex_pair: &str) -> Option<&'static str> {
    match cex_pair {
        "BTC/USDT" => Some("WBTC/USDC"),
        "ETH/USDT" => Some("WETH/USDC"),
        "SOL/USDT" => Some("SOL/USDC"),
        "XRP/USDT" => Some("XRP/USDC"),
        _ => None,
    }
}

pub trait DexPoolFeed: Send {
    fn pool(&mut self, dex: &'static str, dex_pair: &'static str, cex_mid: f64) -> DexPool;
}

/// Deterministic simulated pool: price deviates from the CEX mid by a
/// seeded, bounded random walk instead of an unconditioned PRNG draw, and
/// reserves are derived from a seeded liquidity figure in the source's
/// $500K-$5M range.
pub struct SimulatedDexPoolFeed {
    rngs: HashMap<(&'static str, &'static str), StdRng>,
    seed: u64,
}

impl SimulatedDexPoolFeed {
    pub fn new(seed: u64) -> Self {
        Self { rngs: HashMap::new(), seed }
    }

    fn rng_for(&mut self, key: (&'static str, &'static str)) -> &mut StdRng {
        let seed = self.seed;
        self.rngs.entry(key).or_insert_with(|| {
            let mut hasher_seed = seed;
            for byte in key.0.bytes().chain(key.1.bytes()) {
                hasher_seed = hasher_seed.wrapping_mul(31).wrapping_add(byte as u64);
            }
            StdRng::seed_from_u64(hasher_seed)
        })
    }
}

impl DexPoolFeed for SimulatedDexPoolFeed {
    fn pool(&mut self, dex: &'static str, dex_pair: &'static str, cex_mid: f64) -> DexPool {
        let fee_tier = DEX_PROFILES.iter().find(|p| p.name == dex).map(|p| p.fee_tier).unwrap_or(0.003);
        let rng = self.rng_for((dex, dex_pair));

        let price_deviation = rng.gen_range(-0.006..0.006); // ~3 std dev bound on N(0, 0.002)
        let dex_price = cex_mid * (1.0 + price_deviation);
        let liquidity_usd = rng.gen_range(500_000.0..5_000_000.0);

        let reserve1 = liquidity_usd / 2.0;
        let reserve0 = if dex_price > 0.0 { reserve1 / dex_price } else { 0.0 };

        DexPool { token0_reserve: reserve0, token1_reserve: reserve1, fee_tier, liquidity_usd }
    }
}

fn optimal_trade_size(pool: &DexPool, max_trade_size_usd: f64) -> f64 {
    let from_liquidity = pool.liquidity_usd * LIQUIDITY_FRACTION;
    from_liquidity.min(max_trade_size_usd).max(MIN_TRADE_SIZE_USD)
}

fn assess_mev_risk(profit: f64, chain: &str, price_diff_pct: f64) -> MevRisk {
    if profit > 500.0 {
        return MevRisk::High;
    }
    match chain {
        "ethereum" => {
            if profit > 100.0 || price_diff_pct.abs() > 0.5 {
                MevRisk::High
            } else {
                MevRisk::Medium
            }
        }
        "arbitrum" | "polygon" => {
            if profit < 200.0 {
                MevRisk::Low
            } else {
                MevRisk::Medium
            }
        }
        _ => MevRisk::Medium,
    }
}

fn confidence(profit_pct: f64, price_impact: f64, liquidity_usd: f64, mev_risk: MevRisk, max_price_impact: f64) -> f64 {
    let profit_factor = (profit_pct / 1.0).min(1.0);
    let impact_factor = 1.0 - (price_impact / max_price_impact).min(1.0);
    let liquidity_factor = (liquidity_usd / 1_000_000.0).min(1.0);
    let mev_factor = match mev_risk {
        MevRisk::Low => 1.0,
        MevRisk::Medium => 0.6,
        MevRisk::High => 0.3,
    };
    (0.3 * profit_factor + 0.2 * impact_factor + 0.2 * liquidity_factor + 0.3 * mev_factor).clamp(0.0, 1.0)
}

pub struct DexCexEngine {
    feed: Box<dyn DexPoolFeed>,
    slippage_default: f64,
}

impl DexCexEngine {
    pub fn new(feed: Box<dyn DexPoolFeed>) -> Self {
        Self { feed, slippage_default: 0.005 }
    }

    pub fn simulated(seed: u64) -> Self {
        Self::new(Box::new(SimulatedDexPoolFeed::new(seed)))
    }
}

impl Engine for DexCexEngine {
    fn name(&self) -> &'static str {
        "dex_cex"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let Some(dex_pair) = dex_token_pair(&tick.pair) else { return Vec::new() };
        let cex_mid = tick.mid();
        let mut events = Vec::new();

        for dex in &DEX_PROFILES {
            let pool = self.feed.pool(dex.name, dex_pair, cex_mid);
            let dex_price = pool.price();
            if dex_price == 0.0 {
                continue;
            }

            let price_diff_pct = (dex_price - cex_mid) / cex_mid * 100.0;

            let trade_size = optimal_trade_size(&pool, MAX_TRADE_SIZE_USD);
            if trade_size < MIN_TRADE_SIZE_USD {
                continue;
            }

            let price_impact = pool.price_impact(trade_size / cex_mid);
            if price_impact > ctx.config.max_price_impact {
                continue;
            }

            let gas_cost = swap_cost_usd(dex.chain, &ctx.config.gas_params_usd);

            // Gross profit prices each leg at the side actually crossed: buying on
            // the DEX and selling into the CEX bid, or buying the CEX ask and
            // selling into the DEX — never the mid.
            let (direction, gross_profit) = if dex_price < cex_mid {
                let effective_dex_price = dex_price * (1.0 + pool.fee_tier + price_impact);
                (DexCexDirection::DexToCex, trade_size * ((tick.bid / effective_dex_price) - 1.0))
            } else {
                let effective_dex_price = dex_price * (1.0 - pool.fee_tier - price_impact);
                (DexCexDirection::CexToDex, trade_size * ((effective_dex_price / tick.ask) - 1.0))
            };

            let net_profit = gross_profit - gas_cost;
            let net_profit_pct = net_profit / trade_size * 100.0;
            if net_profit_pct < ctx.config.min_dex_cex_profit_percent {
                continue;
            }

            let mev_risk = assess_mev_risk(net_profit, dex.chain, price_diff_pct);
            let opp_confidence = confidence(net_profit_pct, price_impact, pool.liquidity_usd, mev_risk, ctx.config.max_price_impact);

            let opp = DexCexOpportunity {
                dex: dex.name.to_string(),
                chain: dex.chain.to_string(),
                cex: tick.exchange.clone(),
                pair: tick.pair.clone(),
                direction,
                trade_size_usd: trade_size,
                gross_profit_usd: gross_profit,
                gas_cost_usd: gas_cost,
                net_profit_usd: net_profit,
                price_impact,
                slippage: self.slippage_default,
                liquidity_usd: pool.liquidity_usd,
                mev_risk,
                confidence: opp_confidence,
                ts: tick.ts,
            };

            info!(dex = %opp.dex, cex = %opp.cex, pair = %opp.pair, net_profit_usd = opp.net_profit_usd, "dex/cex opportunity");
            events.push(BusEvent::DexCexOpp(opp));
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

    struct FixedPoolFeed {
        price_deviation: f64,
        liquidity_usd: f64,
        fee_tier: f64,
    }

    impl DexPoolFeed for FixedPoolFeed {
        fn pool(&mut self, _dex: &'static str, _dex_pair: &'static str, cex_mid: f64) -> DexPool {
            let dex_price = cex_mid * (1.0 + self.price_deviation);
            let reserve1 = self.liquidity_usd / 2.0;
            let reserve0 = if dex_price > 0.0 { reserve1 / dex_price } else { 0.0 };
            DexPool { token0_reserve: reserve0, token1_reserve: reserve1, fee_tier: self.fee_tier, liquidity_usd: self.liquidity_usd }
        }
    }

    fn ctx<'a>(market: &'a MarketStateStore, ticks: &'a TickRingStore, config: &'a RuntimeConfig) -> EngineContext<'a> {
        EngineContext { market, ticks, config }
    }

    #[test]
    fn dex_cheaper_emits_dex_to_cex() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.min_dex_cex_profit_percent = -1000.0;
        config.max_price_impact = 1.0;

        let mut engine = DexCexEngine::new(Box::new(FixedPoolFeed { price_deviation: -0.01, liquidity_usd: 2_000_000.0, fee_tier: 0.003 }));
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);

        let opp = events
            .iter()
            .find_map(|e| if let BusEvent::DexCexOpp(o) = e { Some(o) } else { None })
            .expect("expected a dex/cex opportunity");
        assert_eq!(opp.direction, DexCexDirection::DexToCex);
    }

    #[test]
    fn unmapped_pair_yields_nothing() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let config = RuntimeConfig::default();

        let mut engine = DexCexEngine::simulated(1);
        let tick = PriceUpdate::new("binance", "DOGE/USDT", 0.1, 0.1001, 0);
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }

    #[test]
    fn price_impact_over_max_suppresses_opportunity() {
        let market = MarketStateStore::new();
        let ticks = TickRingStore::new(10);
        let mut config = RuntimeConfig::default();
        config.max_price_impact = 0.0000001;

        let mut engine = DexCexEngine::new(Box::new(FixedPoolFeed { price_deviation: -0.01, liquidity_usd: 2_000_000.0, fee_tier: 0.003 }));
        let tick = PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0);
        let events = engine.on_tick(&ctx(&market, &ticks, &config), &tick);
        assert!(events.is_empty());
    }
}
