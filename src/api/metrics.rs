// =============================================================================
// Metrics — hand-rendered Prometheus text exposition
// =============================================================================
//
// Spec §6 calls for `GET /metrics` in Prometheus's `text/plain; version=0.0.4`
// format; per the expanded spec's explicit decision this is rendered by hand
// off the in-process atomics already held by `DispatcherMetrics`, the
// ingress queue, and the subscriber broker rather than pulling in the
// `prometheus` crate — there is exactly one process and one scrape target,
// so a registry with label cardinality management buys nothing here.
// =============================================================================

use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::app_state::AppState;

fn render(state: &AppState) -> String {
    let mut out = String::new();
    let m = &state.dispatcher_metrics;

    let _ = writeln!(out, "# HELP core_invalid_ticks_total Ticks dropped for bid<=0 or ask<bid.");
    let _ = writeln!(out, "# TYPE core_invalid_ticks_total counter");
    let _ = writeln!(out, "core_invalid_ticks_total {}", m.invalid_ticks_total.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP core_engine_timeouts_total Engine evaluations dropped for exceeding their deadline.");
    let _ = writeln!(out, "# TYPE core_engine_timeouts_total counter");
    let _ = writeln!(out, "core_engine_timeouts_total {}", m.engine_timeouts_total.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP core_ticks_committed_total Ticks committed to the market state store.");
    let _ = writeln!(out, "# TYPE core_ticks_committed_total counter");
    let _ = writeln!(out, "core_ticks_committed_total {}", m.ticks_committed_total.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP core_last_committed_tick_timestamp_ms Epoch ms of the last committed tick.");
    let _ = writeln!(out, "# TYPE core_last_committed_tick_timestamp_ms gauge");
    let _ = writeln!(out, "core_last_committed_tick_timestamp_ms {}", m.last_committed_tick_ms.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP core_engine_evaluations_total Per-engine tick evaluations.");
    let _ = writeln!(out, "# TYPE core_engine_evaluations_total counter");
    let _ = writeln!(out, "# HELP core_engine_opportunities_total Per-engine opportunities emitted.");
    let _ = writeln!(out, "# TYPE core_engine_opportunities_total counter");
    let _ = writeln!(out, "# HELP core_engine_errors_total Per-engine panics caught by the dispatcher.");
    let _ = writeln!(out, "# TYPE core_engine_errors_total counter");
    let _ = writeln!(out, "# HELP core_engine_last_emit_timestamp_seconds Unix seconds of an engine's last emitted opportunity.");
    let _ = writeln!(out, "# TYPE core_engine_last_emit_timestamp_seconds gauge");
    let mut names: Vec<&&str> = m.per_engine.keys().collect();
    names.sort();
    for name in names {
        let counters = &m.per_engine[*name];
        let _ = writeln!(out, "core_engine_evaluations_total{{engine=\"{name}\"}} {}", counters.evaluations_total.load(Ordering::Relaxed));
        let _ = writeln!(out, "core_engine_opportunities_total{{engine=\"{name}\"}} {}", counters.opportunities_total.load(Ordering::Relaxed));
        let _ = writeln!(out, "core_engine_errors_total{{engine=\"{name}\"}} {}", counters.errors_total.load(Ordering::Relaxed));
        let _ = writeln!(out, "core_engine_last_emit_timestamp_seconds{{engine=\"{name}\"}} {}", counters.last_emit_timestamp_seconds.load(Ordering::Relaxed));
    }

    let _ = writeln!(out, "# HELP core_ingress_dropped_total Ticks dropped by the adapter-to-dispatcher queue under back-pressure.");
    let _ = writeln!(out, "# TYPE core_ingress_dropped_total counter");
    let _ = writeln!(out, "core_ingress_dropped_total {}", state.ingress.dropped_total());

    let _ = writeln!(out, "# HELP core_subscriber_count Currently connected websocket subscribers.");
    let _ = writeln!(out, "# TYPE core_subscriber_count gauge");
    let _ = writeln!(out, "core_subscriber_count {}", state.broker.subscriber_count());

    let _ = writeln!(out, "# HELP core_sink_errors_total Persistence sink write failures.");
    let _ = writeln!(out, "# TYPE core_sink_errors_total counter");
    let _ = writeln!(out, "core_sink_errors_total {}", state.tick_sink_errors_total.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP core_uptime_seconds Seconds since process start.");
    let _ = writeln!(out, "# TYPE core_uptime_seconds counter");
    let _ = writeln!(out, "core_uptime_seconds {}", state.uptime_seconds());

    out
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], render(&state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SubscriberBroker;
    use crate::bus::OpportunityBus;
    use crate::config::RuntimeConfig;
    use crate::dispatcher::DispatcherMetrics;
    use crate::ingress::IngressQueue;
    use crate::market_state::MarketStateStore;
    use crate::tick_ring::TickRingStore;
    use parking_lot::RwLock;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn render_includes_core_counters_and_per_engine_series() {
        let mut per_engine = std::collections::HashMap::new();
        per_engine.insert("simple_cross", Default::default());
        let metrics = Arc::new(DispatcherMetrics { per_engine, ..Default::default() });
        metrics.invalid_ticks_total.store(3, Ordering::Relaxed);

        let state = AppState::new(
            Arc::new(MarketStateStore::new()),
            Arc::new(TickRingStore::new(10)),
            Arc::new(OpportunityBus::new()),
            Arc::new(SubscriberBroker::new(8, 5)),
            Arc::new(IngressQueue::new(8)),
            Arc::new(RwLock::new(RuntimeConfig::default())),
            PathBuf::from("config.json"),
            metrics,
            Vec::new(),
            None,
            Arc::new(AtomicU64::new(0)),
            100,
        );

        let text = render(&state);
        assert!(text.contains("core_invalid_ticks_total 3"));
        assert!(text.contains("core_engine_evaluations_total{engine=\"simple_cross\"} 0"));
    }
}
