// =============================================================================
// Dispatcher — single logical writer driving the five-step tick pipeline
// =============================================================================
//
// Generalizes the validate-then-process shape already used ad hoc in
// `market_data::trade_stream::run_trade_stream` (parse, validate, hand to a
// single owning processor) into the full pipeline spec §4.4 names: validate,
// commit to the Market State Store and Tick Buffer Ring, publish the raw
// tick, run every engine in a fixed order, publish whatever each one
// returns. Each engine call is isolated with `catch_unwind` and a wall-clock
// deadline so one engine's bug or slow path never blocks the others or the
// ingress loop, mirroring the `try/except`-per-callback shape the Python
// original used in `engine_metrics.py`.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::bus::{BusEvent, OpportunityBus};
use crate::config::RuntimeConfig;
use crate::engines::{Engine, EngineContext};
use crate::ingress::IngressQueue;
use crate::market_state::MarketStateStore;
use crate::tick_ring::{TickRingStore, TickSample};
use crate::types::{ExchangeQuote, PriceUpdate};

/// Per-engine counters rendered by `/metrics` as
/// `{engine}_{evaluations,opportunities,errors}_total` and
/// `{engine}_last_emit_timestamp_seconds`.
#[derive(Default)]
pub struct EngineCounters {
    pub evaluations_total: AtomicU64,
    pub opportunities_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub last_emit_timestamp_seconds: AtomicI64,
}

/// Process-wide dispatcher counters, the source for `/metrics` and
/// `/healthz`.
#[derive(Default)]
pub struct DispatcherMetrics {
    pub invalid_ticks_total: AtomicU64,
    pub engine_timeouts_total: AtomicU64,
    pub ticks_committed_total: AtomicU64,
    pub last_committed_tick_ms: AtomicI64,
    pub per_engine: HashMap<&'static str, EngineCounters>,
}

impl DispatcherMetrics {
    fn new(engine_names: &[&'static str]) -> Self {
        let mut per_engine = HashMap::new();
        for name in engine_names {
            per_engine.insert(*name, EngineCounters::default());
        }
        Self {
            per_engine,
            ..Default::default()
        }
    }
}

/// Drives the full validate -> commit -> publish -> evaluate pipeline for
/// every tick pulled off the `IngressQueue`. Owns no network I/O itself; the
/// adapters push into the queue, this drains it.
pub struct Dispatcher {
    market: Arc<MarketStateStore>,
    ticks: Arc<TickRingStore>,
    bus: Arc<OpportunityBus>,
    config: Arc<RwLock<RuntimeConfig>>,
    engines: Vec<Box<dyn Engine>>,
    pub metrics: Arc<DispatcherMetrics>,
}

impl Dispatcher {
    pub fn new(
        market: Arc<MarketStateStore>,
        ticks: Arc<TickRingStore>,
        bus: Arc<OpportunityBus>,
        config: Arc<RwLock<RuntimeConfig>>,
        engines: Vec<Box<dyn Engine>>,
    ) -> Self {
        let names: Vec<&'static str> = engines.iter().map(|e| e.name()).collect();
        let metrics = Arc::new(DispatcherMetrics::new(&names));
        Self { market, ticks, bus, config, engines, metrics }
    }

    /// Drain `ingress` until the queue is dropped (never returns in normal
    /// operation; intended to run as its own `tokio::spawn`ed task).
    pub async fn run(&mut self, ingress: Arc<IngressQueue>) {
        loop {
            let tick = ingress.pop().await;
            self.process_tick(tick);
        }
    }

    /// Spec §4.4's five steps for a single tick.
    pub fn process_tick(&mut self, tick: PriceUpdate) {
        // 1. Validate.
        if !tick.is_valid() {
            self.metrics.invalid_ticks_total.fetch_add(1, Ordering::Relaxed);
            warn!(exchange = %tick.exchange, pair = %tick.pair, bid = tick.bid, ask = tick.ask, "dropping invalid tick");
            return;
        }

        // 2. Commit to Market State Store and Tick Buffer Ring.
        self.market.update_and_snapshot(ExchangeQuote::from(&tick));
        self.ticks.push(&tick.exchange, &tick.pair, TickSample { ts: tick.ts, mid: tick.mid(), bid: tick.bid, ask: tick.ask });
        self.metrics.ticks_committed_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.last_committed_tick_ms.store(tick.ts, Ordering::Relaxed);

        // 3. Publish the raw tick.
        self.bus.publish(BusEvent::PriceTick(tick.clone()));

        // 4 & 5. Invoke each engine in fixed order, publishing whatever it emits.
        let config = self.config.read().clone();
        let deadline = std::time::Duration::from_millis(config.engine_deadline_ms);
        let ctx = EngineContext { market: &self.market, ticks: &self.ticks, config: &config };

        for engine in self.engines.iter_mut() {
            let name = engine.name();
            let counters = self.metrics.per_engine.get(name);
            if let Some(c) = counters {
                c.evaluations_total.fetch_add(1, Ordering::Relaxed);
            }

            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| engine.on_tick(&ctx, &tick)));
            let elapsed = started.elapsed();

            let events = match result {
                Ok(events) => events,
                Err(_) => {
                    error!(engine = name, pair = %tick.pair, "engine panicked, discarding its output for this tick");
                    if let Some(c) = counters {
                        c.errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                    continue;
                }
            };

            if elapsed > deadline {
                self.metrics.engine_timeouts_total.fetch_add(1, Ordering::Relaxed);
                warn!(engine = name, pair = %tick.pair, elapsed_ms = elapsed.as_millis() as u64, deadline_ms = config.engine_deadline_ms, "engine exceeded deadline, discarding its output for this tick");
                continue;
            }

            if !events.is_empty() {
                if let Some(c) = counters {
                    c.opportunities_total.fetch_add(events.len() as u64, Ordering::Relaxed);
                    c.last_emit_timestamp_seconds.store(tick.ts / 1000, Ordering::Relaxed);
                }
            }

            for event in events {
                self.bus.publish(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::SimpleCrossEngine;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MarketStateStore::new()),
            Arc::new(TickRingStore::new(500)),
            Arc::new(OpportunityBus::new()),
            Arc::new(RwLock::new(RuntimeConfig::default())),
            vec![Box::new(SimpleCrossEngine::new())],
        )
    }

    #[test]
    fn invalid_tick_is_dropped_and_counted() {
        let mut dispatcher = dispatcher();
        dispatcher.process_tick(PriceUpdate::new("binance", "BTC/USDT", -1.0, 1.0, 0));
        assert_eq!(dispatcher.metrics.invalid_ticks_total.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.metrics.ticks_committed_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn valid_tick_commits_and_runs_engines() {
        let mut dispatcher = dispatcher();
        dispatcher.process_tick(PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0));
        assert_eq!(dispatcher.metrics.ticks_committed_total.load(Ordering::Relaxed), 1);
        let counters = dispatcher.metrics.per_engine.get("simple_cross").unwrap();
        assert_eq!(counters.evaluations_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cross_exchange_tick_emits_opportunity_event_on_bus() {
        let mut dispatcher = dispatcher();
        let mut rx = dispatcher.bus.subscribe();
        dispatcher.process_tick(PriceUpdate::new("binance", "BTC/USDT", 65000.0, 65010.0, 0));
        dispatcher.process_tick(PriceUpdate::new("coinbase", "BTC/USDT", 65500.0, 65510.0, 1));

        let mut saw_opportunity = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, BusEvent::SimpleOpp(_)) {
                saw_opportunity = true;
            }
        }
        assert!(saw_opportunity);
    }
}
