// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The detection endpoints spec §6 names (`/api/state`, `/api/<engine>`,
// `/healthz`) are all read-only snapshots over state the dispatcher and
// history task already maintain, so none of them take the admin extractor.
// Only the replay-control and config-mutation routes — able to change what
// the running system does — are gated behind `CoreAdminBearer`, a narrower
// scope than the teacher's blanket auth-everything router.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::CoreAdminBearer;
use crate::app_state::AppState;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health & full state (public) ───────────────────────────────
        .route("/healthz", get(healthz))
        .route("/metrics", get(crate::api::metrics::metrics_handler))
        .route("/api/state", get(full_state))
        // ── Per-engine snapshots (public, per spec §6) ─────────────────
        .route("/api/simple-cross", get(simple_cross))
        .route("/api/triangular", get(triangular))
        .route("/api/cross-triangular", get(cross_triangular))
        .route("/api/futures-spot", get(futures_spot))
        .route("/api/dex-cex", get(dex_cex))
        .route("/api/latency", get(latency))
        .route("/api/ml/predictions", get(ml_predictions))
        .route("/api/orderbook/{pair}", get(orderbook))
        // ── CSV export (public) ─────────────────────────────────────────
        .route("/api/export/opportunities/csv", get(crate::api::export::opportunities_csv))
        .route("/api/export/triangular/csv", get(crate::api::export::triangular_csv))
        // ── Replay control (admin) ─────────────────────────────────────
        .route("/api/admin/replay/pause", post(replay_pause))
        .route("/api/admin/replay/resume", post(replay_resume))
        .route("/api/admin/replay/stop", post(replay_stop))
        .route("/api/admin/replay/speed", post(replay_speed))
        // ── Config mutation (admin) ─────────────────────────────────────
        .route("/api/admin/config", get(get_config))
        .route("/api/admin/config", post(patch_config))
        // ── WebSocket (handled in ws module, mounted here) ─────────────
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_state_snapshot())
}

/// `GET /api/simple-cross`: one entry per `(pair, buy_exchange,
/// sell_exchange)` triple still current (a re-emission supersedes the prior
/// entry), plus the single best one by `profit_pct`/earliest-`ts` tie-break.
async fn simple_cross(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "current": state.history.current_simple_cross(),
        "best": state.history.best_simple_cross(),
    }))
}

async fn triangular(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.triangular())
}

async fn cross_triangular(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.cross_triangular())
}

async fn futures_spot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.futures_spot())
}

async fn dex_cex(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.dex_cex())
}

async fn latency(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.latency())
}

async fn ml_predictions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "predictions": state.history.ml_predictions(),
        "anomalies": state.history.anomalies(),
    }))
}

/// `GET /api/orderbook/{pair}`: accepts either `BTC/USDT` (URL-encoded) or
/// the friendlier `BTC-USDT` path form; both resolve to the same canonical
/// `Market State Store` key.
async fn orderbook(State(state): State<Arc<AppState>>, Path(pair): Path<String>) -> impl IntoResponse {
    let canonical = if pair.contains('/') { pair } else { pair.replacen('-', "/", 1) };
    let quotes = state.market.quotes_for(&canonical);
    let samples = quotes
        .keys()
        .map(|exchange| (exchange.clone(), state.ticks.snapshot(exchange, &canonical)))
        .collect::<std::collections::HashMap<_, _>>();
    Json(serde_json::json!({ "pair": canonical, "quotes": quotes, "recent_ticks": samples }))
}

async fn replay_pause(_auth: CoreAdminBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.replay_control {
        Some(control) => {
            control.pause();
            info!("replay paused via API");
            (StatusCode::OK, Json(serde_json::json!({ "status": "paused" }))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(serde_json::json!({ "error": "not running in replay mode" }))).into_response(),
    }
}

async fn replay_resume(_auth: CoreAdminBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.replay_control {
        Some(control) => {
            control.resume();
            info!("replay resumed via API");
            (StatusCode::OK, Json(serde_json::json!({ "status": "running" }))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(serde_json::json!({ "error": "not running in replay mode" }))).into_response(),
    }
}

async fn replay_stop(_auth: CoreAdminBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.replay_control {
        Some(control) => {
            control.stop();
            warn!("replay stopped via API");
            (StatusCode::OK, Json(serde_json::json!({ "status": "stopped" }))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(serde_json::json!({ "error": "not running in replay mode" }))).into_response(),
    }
}

#[derive(Deserialize)]
struct SpeedRequest {
    speed: f64,
}

async fn replay_speed(
    _auth: CoreAdminBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeedRequest>,
) -> impl IntoResponse {
    match &state.replay_control {
        Some(control) => {
            control.set_speed(req.speed);
            info!(speed = req.speed, "replay speed changed via API");
            (StatusCode::OK, Json(serde_json::json!({ "speed": control.speed() }))).into_response()
        }
        None => (StatusCode::CONFLICT, Json(serde_json::json!({ "error": "not running in replay mode" }))).into_response(),
    }
}

async fn get_config(_auth: CoreAdminBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.read().clone())
}

/// Threshold fields an operator is allowed to tune at runtime without a
/// restart. Structural fields (pairs, queue depths, reconnect policy) still
/// require editing the config file and restarting, the same split the
/// teacher's `set_feature_flags` draws between hot-swappable flags and
/// startup-only settings.
#[derive(Deserialize, Default, Serialize)]
struct ConfigPatch {
    #[serde(default)]
    min_profit_threshold: Option<f64>,
    #[serde(default)]
    min_triangular_threshold: Option<f64>,
    #[serde(default)]
    min_cross_triangular_threshold: Option<f64>,
    #[serde(default)]
    min_funding_rate: Option<f64>,
    #[serde(default)]
    min_funding_annualized: Option<f64>,
    #[serde(default)]
    max_basis_percent: Option<f64>,
    #[serde(default)]
    max_price_impact: Option<f64>,
    #[serde(default)]
    min_dex_cex_profit_percent: Option<f64>,
    #[serde(default)]
    min_latency_price_diff_percent: Option<f64>,
    #[serde(default)]
    z_entry: Option<f64>,
    #[serde(default)]
    z_exit: Option<f64>,
    #[serde(default)]
    min_correlation: Option<f64>,
}

async fn patch_config(
    _auth: CoreAdminBearer,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<ConfigPatch>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let candidate = {
        let mut cfg = state.config.read().clone();
        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = patch.$field {
                    cfg.$field = v;
                }
            };
        }
        apply!(min_profit_threshold);
        apply!(min_triangular_threshold);
        apply!(min_cross_triangular_threshold);
        apply!(min_funding_rate);
        apply!(min_funding_annualized);
        apply!(max_basis_percent);
        apply!(max_price_impact);
        apply!(min_dex_cex_profit_percent);
        apply!(min_latency_price_diff_percent);
        apply!(z_entry);
        apply!(z_exit);
        apply!(min_correlation);
        cfg
    };

    if let Err(e) = candidate.validate() {
        return Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))));
    }

    *state.config.write() = candidate.clone();
    if let Err(e) = candidate.save(&state.config_path) {
        warn!(error = %e, "failed to persist runtime config after admin patch");
    }
    info!("runtime config updated via admin API");

    Ok(Json(candidate))
}
