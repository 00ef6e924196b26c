// =============================================================================
// Application State — shared handles the HTTP/WS surface reads, never writes
// =============================================================================
//
// Generalizes the teacher's single `AppState` god-struct (trading positions,
// risk engine, regime detector, balances) into the read side of the
// detection pipeline: the Market State Store, Tick Buffer Ring, Opportunity
// Bus, Subscriber Broker and per-engine metrics are all owned and written
// elsewhere (the dispatcher, the adapters); this struct only holds `Arc`
// handles to them plus the capped opportunity history the teacher's
// `recent_decisions`/`recent_errors` `VecDeque` fields generalize into one
// deque per engine kind, fed by `record` off the Opportunity Bus.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::adapters::replay::ReplayControl;
use crate::adapters::AdapterHandle;
use crate::broker::SubscriberBroker;
use crate::bus::{BusEvent, ConnectionStatusEvent, NotificationEvent, OpportunityBus};
use crate::config::RuntimeConfig;
use crate::dispatcher::DispatcherMetrics;
use crate::ingress::IngressQueue;
use crate::market_state::MarketStateStore;
use crate::opportunities::{
    Anomaly, ArbitrageOpportunity, CrossExchangeOpportunity, DexCexOpportunity,
    FuturesSpotOpportunity, LatencyOpportunity, Prediction, StatArbSignal, TriangularOpportunity,
};
use crate::tick_ring::TickRingStore;

/// One entry in the combined, cross-kind event log backing `/api/state`'s
/// `history` field and the `ConnectionStatus`/`Notification` trail operators
/// check after an incident.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    Opportunity { engine: &'static str, ts: i64, summary: String },
    ConnectionStatus(ConnectionStatusEvent),
    Notification(NotificationEvent),
}

fn push_capped<T>(deque: &mut VecDeque<T>, item: T, capacity: usize) {
    deque.push_back(item);
    while deque.len() > capacity {
        deque.pop_front();
    }
}

/// Per-engine capped history, generalizing `TriangularEngine::history`'s
/// `VecDeque` shape to every opportunity kind so `/api/<engine>` has
/// something to return beyond "whatever fired on the last tick".
pub struct OpportunityHistory {
    capacity: usize,
    simple_cross: Mutex<VecDeque<ArbitrageOpportunity>>,
    /// Current simple cross-exchange opportunity per `(pair, buy_exchange,
    /// sell_exchange)` triple — a re-emission for the same triple supersedes
    /// whatever was there before, per spec.
    current_simple_cross: Mutex<HashMap<(String, String, String), ArbitrageOpportunity>>,
    triangular: Mutex<VecDeque<TriangularOpportunity>>,
    cross_triangular: Mutex<VecDeque<CrossExchangeOpportunity>>,
    futures_spot: Mutex<VecDeque<FuturesSpotOpportunity>>,
    dex_cex: Mutex<VecDeque<DexCexOpportunity>>,
    latency: Mutex<VecDeque<LatencyOpportunity>>,
    stat_arb: Mutex<VecDeque<StatArbSignal>>,
    ml_predictions: Mutex<VecDeque<Prediction>>,
    anomalies: Mutex<VecDeque<Anomaly>>,
    combined: Mutex<VecDeque<HistoryRecord>>,
}

impl OpportunityHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            simple_cross: Mutex::new(VecDeque::new()),
            current_simple_cross: Mutex::new(HashMap::new()),
            triangular: Mutex::new(VecDeque::new()),
            cross_triangular: Mutex::new(VecDeque::new()),
            futures_spot: Mutex::new(VecDeque::new()),
            dex_cex: Mutex::new(VecDeque::new()),
            latency: Mutex::new(VecDeque::new()),
            stat_arb: Mutex::new(VecDeque::new()),
            ml_predictions: Mutex::new(VecDeque::new()),
            anomalies: Mutex::new(VecDeque::new()),
            combined: Mutex::new(VecDeque::new()),
        }
    }

    fn push_combined(&self, record: HistoryRecord) {
        push_capped(&mut self.combined.lock(), record, self.capacity);
    }

    /// Fold one bus event into the relevant per-kind deque (and the combined
    /// log, for opportunity-shaped events). Called from the history task
    /// spawned in `main.rs`; never on the dispatcher's hot path.
    pub fn record(&self, event: &BusEvent) {
        match event {
            BusEvent::SimpleOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "simple_cross",
                    ts: opp.ts,
                    summary: format!("{} {}->{} {:.4}%", opp.pair, opp.buy_exchange, opp.sell_exchange, opp.profit_pct),
                });
                push_capped(&mut self.simple_cross.lock(), opp.clone(), self.capacity);
                self.current_simple_cross
                    .lock()
                    .insert((opp.pair.clone(), opp.buy_exchange.clone(), opp.sell_exchange.clone()), opp.clone());
            }
            BusEvent::TriangularOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "triangular",
                    ts: opp.ts,
                    summary: format!("{} {} {:.4}%", opp.exchange, opp.base_currency, opp.profit_pct),
                });
                push_capped(&mut self.triangular.lock(), opp.clone(), self.capacity);
            }
            BusEvent::CrossTriangularOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "cross_triangular",
                    ts: opp.ts,
                    summary: format!("{} {:.4}%", opp.root_currency, opp.profit_pct),
                });
                push_capped(&mut self.cross_triangular.lock(), opp.clone(), self.capacity);
            }
            BusEvent::FuturesSpotOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "futures_spot",
                    ts: opp.ts,
                    summary: format!("{} {} basis {:.4}%", opp.exchange, opp.symbol, opp.basis_pct),
                });
                push_capped(&mut self.futures_spot.lock(), opp.clone(), self.capacity);
            }
            BusEvent::DexCexOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "dex_cex",
                    ts: opp.ts,
                    summary: format!("{}/{} net ${:.2}", opp.dex, opp.cex, opp.net_profit_usd),
                });
                push_capped(&mut self.dex_cex.lock(), opp.clone(), self.capacity);
            }
            BusEvent::LatencyOpp(opp) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "latency",
                    ts: opp.ts,
                    summary: format!("{} lags {} by {}ms", opp.stale_exchange, opp.fast_exchange, opp.staleness_ms),
                });
                push_capped(&mut self.latency.lock(), opp.clone(), self.capacity);
            }
            BusEvent::StatArbSignal(sig) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "stat_arb",
                    ts: sig.ts,
                    summary: format!("{}/{} z={:.2}", sig.pair_a, sig.pair_b, sig.z_score),
                });
                push_capped(&mut self.stat_arb.lock(), sig.clone(), self.capacity);
            }
            BusEvent::Prediction(pred) => {
                push_capped(&mut self.ml_predictions.lock(), pred.clone(), self.capacity);
            }
            BusEvent::Anomaly(anomaly) => {
                self.push_combined(HistoryRecord::Opportunity {
                    engine: "ml",
                    ts: anomaly.ts,
                    summary: anomaly.detail.clone(),
                });
                push_capped(&mut self.anomalies.lock(), anomaly.clone(), self.capacity);
            }
            BusEvent::ConnectionStatus(event) => self.push_combined(HistoryRecord::ConnectionStatus(event.clone())),
            BusEvent::Notification(event) => self.push_combined(HistoryRecord::Notification(event.clone())),
            BusEvent::PriceTick(_) | BusEvent::Quote(_) => {}
        }
    }

    pub fn simple_cross(&self) -> Vec<ArbitrageOpportunity> {
        self.simple_cross.lock().iter().cloned().collect()
    }

    /// One current opportunity per `(pair, buy_exchange, sell_exchange)`
    /// triple — supersedes any prior entry for the same triple.
    pub fn current_simple_cross(&self) -> Vec<ArbitrageOpportunity> {
        self.current_simple_cross.lock().values().cloned().collect()
    }

    /// The single best current simple cross-exchange opportunity: highest
    /// `profit_pct`, earliest `ts` breaking a tie.
    pub fn best_simple_cross(&self) -> Option<ArbitrageOpportunity> {
        self.current_simple_cross.lock().values().cloned().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(current) => {
                let candidate_is_better = candidate.profit_pct > current.profit_pct
                    || (candidate.profit_pct == current.profit_pct && candidate.ts < current.ts);
                Some(if candidate_is_better { candidate } else { current })
            }
        })
    }
    pub fn triangular(&self) -> Vec<TriangularOpportunity> {
        self.triangular.lock().iter().cloned().collect()
    }
    pub fn cross_triangular(&self) -> Vec<CrossExchangeOpportunity> {
        self.cross_triangular.lock().iter().cloned().collect()
    }
    pub fn futures_spot(&self) -> Vec<FuturesSpotOpportunity> {
        self.futures_spot.lock().iter().cloned().collect()
    }
    pub fn dex_cex(&self) -> Vec<DexCexOpportunity> {
        self.dex_cex.lock().iter().cloned().collect()
    }
    pub fn latency(&self) -> Vec<LatencyOpportunity> {
        self.latency.lock().iter().cloned().collect()
    }
    pub fn stat_arb(&self) -> Vec<StatArbSignal> {
        self.stat_arb.lock().iter().cloned().collect()
    }
    pub fn ml_predictions(&self) -> Vec<Prediction> {
        self.ml_predictions.lock().iter().cloned().collect()
    }
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.lock().iter().cloned().collect()
    }
    pub fn combined(&self) -> Vec<HistoryRecord> {
        self.combined.lock().iter().cloned().collect()
    }
}

/// Drains `rx` for the lifetime of the process, folding every event into
/// `history`. Intended to run as its own `tokio::spawn`ed task alongside
/// `sinks::run_sink_loop`.
pub async fn run_history_loop(mut rx: tokio::sync::broadcast::Receiver<BusEvent>, history: Arc<OpportunityHistory>) {
    loop {
        match rx.recv().await {
            Ok(event) => history.record(&event),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// JSON shape for `GET /api/state` (spec's external-interfaces section):
/// latest per-pair/per-exchange quotes, the most recent plain cross-exchange
/// opportunities, the combined event history, and the active config.
#[derive(Serialize)]
pub struct StateSnapshot {
    pub prices: std::collections::HashMap<String, std::collections::HashMap<String, crate::types::ExchangeQuote>>,
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub history: Vec<HistoryRecord>,
    pub config: RuntimeConfig,
    pub adapters: Vec<AdapterStatus>,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct AdapterStatus {
    pub exchange: &'static str,
    pub state: &'static str,
}

/// Every handle the HTTP/JSON and WebSocket surface needs, read-only from
/// this side. Constructed once in `main.rs` after the dispatcher, adapters
/// and broker are wired up.
pub struct AppState {
    pub market: Arc<MarketStateStore>,
    pub ticks: Arc<TickRingStore>,
    pub bus: Arc<OpportunityBus>,
    pub broker: Arc<SubscriberBroker>,
    pub ingress: Arc<IngressQueue>,
    pub config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,
    pub dispatcher_metrics: Arc<DispatcherMetrics>,
    pub adapters: Vec<Arc<AdapterHandle>>,
    pub replay_control: Option<Arc<ReplayControl>>,
    pub tick_sink_errors_total: Arc<AtomicU64>,
    pub history: Arc<OpportunityHistory>,
    start_time: Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<MarketStateStore>,
        ticks: Arc<TickRingStore>,
        bus: Arc<OpportunityBus>,
        broker: Arc<SubscriberBroker>,
        ingress: Arc<IngressQueue>,
        config: Arc<RwLock<RuntimeConfig>>,
        config_path: PathBuf,
        dispatcher_metrics: Arc<DispatcherMetrics>,
        adapters: Vec<Arc<AdapterHandle>>,
        replay_control: Option<Arc<ReplayControl>>,
        tick_sink_errors_total: Arc<AtomicU64>,
        history_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            market,
            ticks,
            bus,
            broker,
            ingress,
            config,
            config_path,
            dispatcher_metrics,
            adapters,
            replay_control,
            tick_sink_errors_total,
            history: Arc::new(OpportunityHistory::new(history_capacity)),
            start_time: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// `GET /healthz`: 200 iff the dispatcher committed at least one tick in
    /// the last 30s (spec §6).
    pub fn is_healthy(&self) -> bool {
        let last = self.dispatcher_metrics.last_committed_tick_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let age_ms = Utc::now().timestamp_millis() - last;
        age_ms >= 0 && age_ms <= 30_000
    }

    pub fn build_state_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            prices: self.market.full_snapshot(),
            opportunities: self.history.current_simple_cross(),
            history: self.history.combined(),
            config: self.config.read().clone(),
            adapters: self
                .adapters
                .iter()
                .map(|a| AdapterStatus { exchange: a.exchange(), state: a.state().as_str() })
                .collect(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceUpdate;

    fn history() -> OpportunityHistory {
        OpportunityHistory::new(2)
    }

    fn opp(ts: i64) -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            pair: "BTC/USDT".into(),
            buy_exchange: "binance".into(),
            sell_exchange: "coinbase".into(),
            buy_price: 1.0,
            sell_price: 1.1,
            profit_pct: 10.0,
            ts,
        }
    }

    #[test]
    fn per_kind_history_is_capped() {
        let h = history();
        for i in 0..5 {
            h.record(&BusEvent::SimpleOpp(opp(i)));
        }
        assert_eq!(h.simple_cross().len(), 2);
        assert_eq!(h.combined().len(), 2);
    }

    #[test]
    fn reemission_supersedes_prior_opportunity_for_same_triple() {
        let h = history();
        h.record(&BusEvent::SimpleOpp(opp(0)));
        let mut updated = opp(1);
        updated.profit_pct = 20.0;
        h.record(&BusEvent::SimpleOpp(updated.clone()));

        let current = h.current_simple_cross();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].profit_pct, 20.0);
        // The append-only log still carries both emissions.
        assert_eq!(h.simple_cross().len(), 2);
    }

    #[test]
    fn best_simple_cross_breaks_ties_on_earliest_ts() {
        let h = history();
        let mut a = opp(5);
        a.pair = "BTC/USDT".into();
        a.buy_exchange = "binance".into();
        a.sell_exchange = "coinbase".into();
        a.profit_pct = 1.0;

        let mut b = opp(2);
        b.pair = "ETH/USDT".into();
        b.buy_exchange = "kraken".into();
        b.sell_exchange = "coinbase".into();
        b.profit_pct = 1.0;

        h.record(&BusEvent::SimpleOpp(a));
        h.record(&BusEvent::SimpleOpp(b.clone()));

        let best = h.best_simple_cross().expect("expected a best opportunity");
        assert_eq!(best.ts, b.ts);
    }

    #[test]
    fn ticks_are_not_recorded() {
        let h = history();
        h.record(&BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0)));
        assert!(h.combined().is_empty());
    }

    #[test]
    fn connection_status_lands_in_combined_log_only() {
        let h = history();
        h.record(&BusEvent::ConnectionStatus(ConnectionStatusEvent {
            exchange: "binance".into(),
            state: "streaming".into(),
            detail: None,
            ts: 0,
        }));
        assert_eq!(h.combined().len(), 1);
        assert!(h.simple_cross().is_empty());
    }

    #[tokio::test]
    async fn is_healthy_false_with_no_committed_ticks() {
        let market = Arc::new(MarketStateStore::new());
        let ticks = Arc::new(TickRingStore::new(10));
        let bus = Arc::new(OpportunityBus::new());
        let broker = Arc::new(SubscriberBroker::new(8, 5));
        let ingress = Arc::new(IngressQueue::new(8));
        let config = Arc::new(RwLock::new(RuntimeConfig::default()));
        let metrics = Arc::new(DispatcherMetrics::default());
        let state = AppState::new(
            market,
            ticks,
            bus,
            broker,
            ingress,
            config,
            PathBuf::from("config.json"),
            metrics,
            Vec::new(),
            None,
            Arc::new(AtomicU64::new(0)),
            100,
        );
        assert!(!state.is_healthy());
    }
}
