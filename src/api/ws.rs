// =============================================================================
// WebSocket Handler — event-driven multi-subscriber push
// =============================================================================
//
// Replaces the teacher's single-connection, 500ms-poll `handle_ws_connection`
// loop with true fan-out: each connection registers its own
// `SubscriberHandle` with the `SubscriberBroker` and pushes whatever lands on
// it, so a subscriber only ever observes a tick's opportunities after the
// Market State Store already reflects that tick (the bus is only published
// to post-commit, per the dispatcher's ordering guarantee).
//
// Every frame is `{"type": <event_kind>, "data": <payload>}`, with the first
// frame on every connection always a `state` snapshot (spec §6).
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::bus::{BusEvent, EventFilter};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Map a bus event onto the wire's `event_kind` vocabulary (spec §6). Not a
/// 1:1 rename of `BusEvent::kind()` — `ConnectionStatus` has no dedicated
/// wire kind and folds into `notification`.
fn frame_for(event: &BusEvent) -> Option<(&'static str, serde_json::Value)> {
    let (kind, data) = match event {
        BusEvent::PriceTick(tick) => ("price", json!(tick)),
        BusEvent::Quote(quote) => ("price", json!(quote)),
        BusEvent::SimpleOpp(opp) => ("opportunity", json!(opp)),
        BusEvent::TriangularOpp(opp) => ("triangular_opportunity", json!(opp)),
        BusEvent::CrossTriangularOpp(opp) => ("cross_triangular_opportunity", json!(opp)),
        BusEvent::FuturesSpotOpp(opp) => ("futures_spot_opportunity", json!(opp)),
        BusEvent::DexCexOpp(opp) => ("dex_cex_opportunity", json!(opp)),
        BusEvent::LatencyOpp(opp) => ("latency_opportunity", json!(opp)),
        BusEvent::StatArbSignal(sig) => ("stat_arb_signal", json!(sig)),
        BusEvent::Prediction(pred) => ("ml_prediction", json!(pred)),
        BusEvent::Anomaly(anomaly) => ("anomaly", json!(anomaly)),
        BusEvent::ConnectionStatus(event) => ("notification", json!(event)),
        BusEvent::Notification(event) => ("notification", json!(event)),
    };
    Some((kind, data))
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let handle = state.broker.register(EventFilter::all());
    info!(subscriber_id = %handle.id, "websocket subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    let initial = json!({ "type": "state", "data": state.build_state_snapshot() });
    if let Err(e) = sender.send(Message::Text(initial.to_string().into())).await {
        warn!(error = %e, "failed to send initial state frame, dropping subscriber");
        state.broker.unregister(handle.id);
        return;
    }

    loop {
        tokio::select! {
            event = handle.recv() => {
                let Some((kind, data)) = frame_for(&event) else { continue };
                let frame = json!({ "type": kind, "data": data });
                if let Err(e) = sender.send(Message::Text(frame.to_string().into())).await {
                    debug!(error = %e, "websocket send failed, disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim().eq_ignore_ascii_case("ping") {
                            if let Err(e) = sender.send(Message::Text("pong".into())).await {
                                debug!(error = %e, "failed to send pong, disconnecting");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }

    state.broker.unregister(handle.id);
    info!(subscriber_id = %handle.id, "websocket subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceUpdate;

    #[test]
    fn frame_for_maps_opportunity_kinds_to_spec_vocabulary() {
        let tick = PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0);
        let (kind, _) = frame_for(&BusEvent::PriceTick(tick)).unwrap();
        assert_eq!(kind, "price");
    }

    #[test]
    fn frame_for_folds_connection_status_into_notification() {
        let event = crate::bus::connection_status("binance", "streaming", None);
        let (kind, _) = frame_for(&event).unwrap();
        assert_eq!(kind, "notification");
    }
}
