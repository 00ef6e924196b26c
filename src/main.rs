// =============================================================================
// Core — Cross-Exchange Arbitrage Detection Engine — Main Entry Point
// =============================================================================
//
// Boot order mirrors spec §5's pipeline: load config, build the shared
// stores (Market State, Tick Ring, Opportunity Bus, Subscriber Broker,
// Ingress Queue), wire the eight detection engines into a `Dispatcher`,
// bring up adapters for the configured `RunMode`, spawn the bus fan-out
// tasks (subscriber broker, history, persistence/notification sinks), then
// serve the HTTP/JSON + WebSocket surface. `Ctrl+C` drains adapters and the
// ingress queue before exiting, honoring `graceful_shutdown_ms`.
// =============================================================================

mod adapters;
mod api;
mod app_state;
mod broker;
mod bus;
mod config;
mod dispatcher;
mod engines;
mod errors;
mod indicators;
mod ingress;
mod market_state;
mod opportunities;
mod sinks;
mod tick_ring;
mod types;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use adapters::replay::{ReplayAdapter, ReplayControl};
use adapters::simulator::SimulatorAdapter;
use adapters::{binance::BinanceAdapter, coinbase::CoinbaseAdapter, kraken::KrakenAdapter};
use adapters::{run_with_reconnect, AdapterHandle};
use app_state::AppState;
use broker::SubscriberBroker;
use bus::OpportunityBus;
use config::RuntimeConfig;
use dispatcher::Dispatcher;
use engines::{
    CrossTriangularEngine, DexCexEngine, FuturesSpotEngine, LatencyEngine, MlEngine,
    SimpleCrossEngine, StatisticalArbitrageEngine, TriangularEngine,
};
use ingress::IngressQueue;
use market_state::MarketStateStore;
use sinks::{JsonlFileSink, LogSink, NullTickSink};
use tick_ring::TickRingStore;
use types::RunMode;

const HISTORY_CAPACITY: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("cross-exchange arbitrage detection engine starting up");

    // ── 1. Config ─────────────────────────────────────────────────────────
    let config_path = std::env::var("CORE_CONFIG_PATH").unwrap_or_else(|_| "config.json".into());
    let config_path = std::path::PathBuf::from(config_path);
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(pairs) = std::env::var("CORE_PAIRS") {
        let pairs: Vec<String> = pairs.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
        if !pairs.is_empty() {
            config.pairs = pairs;
        }
    }
    if let Ok(mode) = std::env::var("CORE_RUN_MODE") {
        config.mode = match mode.to_lowercase().as_str() {
            "live" => RunMode::Live,
            "replay" => RunMode::Replay,
            _ => RunMode::Simulation,
        };
    }

    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    info!(pairs = ?config.pairs, mode = %config.mode, "runtime config loaded");

    let graceful_shutdown_ms = config.graceful_shutdown_ms;
    let reconnect_delay_s = config.reconnect_delay_s;
    let max_reconnect_attempts = config.max_reconnect_attempts;
    let config = Arc::new(RwLock::new(config));

    // ── 2. Shared stores ──────────────────────────────────────────────────
    let tick_ring_capacity = config.read().tick_ring_capacity;
    let ingress_depth = config.read().ingress_depth;
    let queue_depth = config.read().queue_depth;
    let disconnect_after_drops = config.read().disconnect_after_drops;
    let pairs = config.read().pairs.clone();
    let mode = config.read().mode;

    let market = Arc::new(MarketStateStore::new());
    let ticks = Arc::new(TickRingStore::new(tick_ring_capacity));
    let bus = Arc::new(OpportunityBus::new());
    let broker = Arc::new(SubscriberBroker::new(queue_depth, disconnect_after_drops));
    let ingress = Arc::new(IngressQueue::new(ingress_depth));

    // ── 3. Detection engines, fixed order per spec §4.4 ──────────────────
    let futures_seed = 0x636f7265u64; // "core" — deterministic across restarts
    let dex_seed = 0x61726269u64; // "arbi"
    let engines: Vec<Box<dyn engines::Engine>> = vec![
        Box::new(SimpleCrossEngine::new()),
        Box::new(TriangularEngine::new()),
        Box::new(CrossTriangularEngine::new()),
        Box::new(FuturesSpotEngine::simulated(futures_seed)),
        Box::new(DexCexEngine::simulated(dex_seed)),
        Box::new(LatencyEngine::new()),
        Box::new(StatisticalArbitrageEngine::new()),
        Box::new(MlEngine::new()),
    ];

    let mut dispatcher = Dispatcher::new(market.clone(), ticks.clone(), bus.clone(), config.clone(), engines);
    let dispatcher_metrics = dispatcher.metrics.clone();

    let dispatcher_ingress = ingress.clone();
    tokio::spawn(async move {
        dispatcher.run(dispatcher_ingress).await;
    });

    // ── 4. Adapters, per run mode ─────────────────────────────────────────
    let mut adapter_handles: Vec<Arc<AdapterHandle>> = Vec::new();
    let mut replay_control: Option<Arc<ReplayControl>> = None;

    match mode {
        RunMode::Live => {
            for (exchange, factory) in [
                ("binance", 0u8),
                ("coinbase", 1u8),
                ("kraken", 2u8),
            ] {
                let handle = AdapterHandle::new(exchange);
                adapter_handles.push(handle.clone());
                let ingress = ingress.clone();
                let bus = bus.clone();
                let pairs = pairs.clone();
                tokio::spawn(async move {
                    let adapter: Box<dyn adapters::ExchangeAdapter> = match factory {
                        0 => Box::new(BinanceAdapter::new(pairs, handle.clone())),
                        1 => Box::new(CoinbaseAdapter::new(pairs, handle.clone())),
                        _ => Box::new(KrakenAdapter::new(pairs, handle.clone())),
                    };
                    run_with_reconnect(adapter, ingress, bus, handle, reconnect_delay_s, max_reconnect_attempts).await;
                });
            }
        }
        RunMode::Simulation => {
            for (exchange, offset_percent) in [("binance", 0.0), ("coinbase", 0.02), ("kraken", -0.015)] {
                let handle = AdapterHandle::new(exchange);
                adapter_handles.push(handle.clone());
                let ingress = ingress.clone();
                let bus = bus.clone();
                let pairs = pairs.clone();
                tokio::spawn(async move {
                    let adapter: Box<dyn adapters::ExchangeAdapter> =
                        Box::new(SimulatorAdapter::new(exchange, pairs, handle.clone(), offset_percent));
                    run_with_reconnect(adapter, ingress, bus, handle, reconnect_delay_s, max_reconnect_attempts).await;
                });
            }
        }
        RunMode::Replay => {
            let replay_path = std::env::var("CORE_REPLAY_PATH").unwrap_or_else(|_| "replay.jsonl".into());
            let control = ReplayControl::new(1.0);
            replay_control = Some(control.clone());
            let handle = AdapterHandle::new("replay");
            adapter_handles.push(handle.clone());
            let ingress = ingress.clone();
            let bus = bus.clone();
            let pairs = pairs.clone();
            tokio::spawn(async move {
                let adapter: Box<dyn adapters::ExchangeAdapter> =
                    Box::new(ReplayAdapter::new(std::path::PathBuf::from(replay_path), pairs, handle.clone(), control));
                run_with_reconnect(adapter, ingress, bus, handle, reconnect_delay_s, max_reconnect_attempts).await;
            });
        }
    }

    // ── 5. Bus fan-out: subscriber broker ────────────────────────────────
    {
        let mut rx = bus.subscribe();
        let broker = broker.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        broker.broadcast(&event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broker fan-out lagged behind the opportunity bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    // ── 6. Bus fan-out: persistence + notification sinks ─────────────────
    let tick_sink_errors_total = Arc::new(AtomicU64::new(0));
    {
        let rx = bus.subscribe();
        let tick_sink: Arc<dyn sinks::TickSink> = match std::env::var("CORE_TICK_SINK_PATH") {
            Ok(path) => match JsonlFileSink::open(path) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    error!(error = %e, "failed to open tick sink, falling back to a no-op sink");
                    Arc::new(NullTickSink)
                }
            },
            Err(_) => Arc::new(NullTickSink),
        };
        let notification_sink: Arc<dyn sinks::NotificationSink> = Arc::new(LogSink);
        tokio::spawn(sinks::run_sink_loop(rx, tick_sink, notification_sink));
    }

    // ── 7. Shared state for the HTTP/JSON + WebSocket surface ────────────
    let state = AppState::new(
        market,
        ticks,
        bus.clone(),
        broker,
        ingress.clone(),
        config,
        config_path,
        dispatcher_metrics,
        adapter_handles,
        replay_control,
        tick_sink_errors_total,
        HISTORY_CAPACITY,
    );

    // ── 8. Bus fan-out: feed the app state's opportunity history ─────────
    tokio::spawn(app_state::run_history_loop(bus.subscribe(), state.history.clone()));

    // ── 9. Serve ──────────────────────────────────────────────────────────
    let bind_addr = std::env::var("CORE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    serve.await?;

    info!(graceful_shutdown_ms, "shut down complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    warn!("shutdown signal received, draining in-flight work");
}
