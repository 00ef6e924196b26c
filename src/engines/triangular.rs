// =============================================================================
// Triangular Arbitrage Engine (single exchange)
// =============================================================================
//
// Builds the currency graph for each exchange from the pairs it quotes,
// enumerates every 3-step cycle starting and ending at a recognized
// fiat/stable root, and re-evaluates the cached paths whenever a pair on
// that exchange updates. Grounded in
// `original_source/engine_triangular.py`'s `_compute_triangular_paths` /
// `_calculate_triangular_profit`.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::info;

use super::{Engine, EngineContext};
use crate::bus::BusEvent;
use crate::opportunities::{Side, TriangularOpportunity};
use crate::types::{split_pair, PriceUpdate};

const ROOT_CURRENCIES: [&str; 4] = ["USDT", "USD", "USDC", "BUSD"];
const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone)]
struct Path {
    base_currency: String,
    pairs: [String; 3],
    sides: [Side; 3],
}

pub struct TriangularEngine {
    known_pairs: HashMap<String, HashSet<String>>,
    paths: HashMap<String, Vec<Path>>,
    history: VecDeque<TriangularOpportunity>,
}

impl TriangularEngine {
    pub fn new() -> Self {
        Self {
            known_pairs: HashMap::new(),
            paths: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    fn ensure_paths(&mut self, exchange: &str, all_pairs_for_exchange: &HashSet<String>) {
        let stale = self
            .known_pairs
            .get(exchange)
            .map(|known| known != all_pairs_for_exchange)
            .unwrap_or(true);

        if !stale {
            return;
        }

        self.known_pairs.insert(exchange.to_string(), all_pairs_for_exchange.clone());
        self.paths.insert(exchange.to_string(), compute_paths(all_pairs_for_exchange));
    }

    fn record(&mut self, opp: TriangularOpportunity) {
        self.history.push_back(opp);
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<TriangularOpportunity> {
        &self.history
    }
}

impl Default for TriangularEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Build every `edges[currency] -> (other_currency, pair, side)` transition
/// and BFS 3-step cycles back to one of the recognized roots.
fn compute_paths(pairs: &HashSet<String>) -> Vec<Path> {
    let mut currencies: HashSet<&str> = HashSet::new();
    let mut edges: HashMap<&str, Vec<(&str, &str, Side)>> = HashMap::new();

    for pair in pairs {
        let Some((base, quote)) = split_pair(pair) else { continue };
        currencies.insert(base);
        currencies.insert(quote);
        edges.entry(quote).or_default().push((base, pair, Side::Buy));
        edges.entry(base).or_default().push((quote, pair, Side::Sell));
    }

    let mut paths = Vec::new();
    for root in ROOT_CURRENCIES {
        if !currencies.contains(root) {
            continue;
        }
        let Some(step1) = edges.get(root) else { continue };
        for &(curr1, pair1, side1) in step1 {
            let Some(step2) = edges.get(curr1) else { continue };
            for &(curr2, pair2, side2) in step2 {
                let Some(step3) = edges.get(curr2) else { continue };
                for &(curr3, pair3, side3) in step3 {
                    if curr3 == root {
                        paths.push(Path {
                            base_currency: root.to_string(),
                            pairs: [pair1.to_string(), pair2.to_string(), pair3.to_string()],
                            sides: [side1, side2, side3],
                        });
                    }
                }
            }
        }
    }
    paths
}

fn evaluate_path(
    exchange: &str,
    path: &Path,
    market: &crate::market_state::MarketStateStore,
    start_amount: f64,
    fee: f64,
    min_threshold: f64,
    ts: i64,
) -> Option<TriangularOpportunity> {
    let mut amount = start_amount;
    let mut prices_used = [0.0; 3];

    for (i, (pair, side)) in path.pairs.iter().zip(path.sides.iter()).enumerate() {
        let quote = market.quotes_for(pair).remove(exchange)?;
        let price = match side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        };
        prices_used[i] = price;

        amount = match side {
            Side::Buy => (amount / price) * (1.0 - fee / 100.0),
            Side::Sell => (amount * price) * (1.0 - fee / 100.0),
        };
    }

    let profit_pct = (amount - start_amount) / start_amount * 100.0;
    if profit_pct < min_threshold {
        return None;
    }

    Some(TriangularOpportunity {
        exchange: exchange.to_string(),
        base_currency: path.base_currency.clone(),
        pair_steps: path.pairs.clone(),
        side_steps: path.sides,
        start_amount,
        end_amount: amount,
        profit_pct,
        prices_used,
        ts,
    })
}

impl Engine for TriangularEngine {
    fn name(&self) -> &'static str {
        "triangular"
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent> {
        let pairs_for_exchange: HashSet<String> = ctx
            .market
            .pairs()
            .into_iter()
            .filter(|pair| ctx.market.quotes_for(pair).contains_key(&tick.exchange))
            .collect();

        self.ensure_paths(&tick.exchange, &pairs_for_exchange);

        let paths = match self.paths.get(&tick.exchange) {
            Some(p) if !p.is_empty() => p.clone(),
            _ => return Vec::new(),
        };

        let fee = ctx.config.fee_for(&tick.exchange);
        let mut events = Vec::new();

        for path in &paths {
            if let Some(opp) = evaluate_path(
                &tick.exchange,
                path,
                ctx.market,
                ctx.config.triangular_start_amount,
                fee,
                ctx.config.min_triangular_threshold,
                tick.ts,
            ) {
                info!(exchange = %opp.exchange, base = %opp.base_currency, profit_pct = opp.profit_pct, "triangular opportunity");
                self.record(opp.clone());
                events.push(BusEvent::TriangularOpp(opp));
            }
        }

        events
    }
}
