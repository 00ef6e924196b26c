// =============================================================================
// Kraken Adapter — WebSocket v1 `ticker` channel
// =============================================================================
//
// Kraken's public feed replies to a subscribe event with an array-shaped
// message: `[channelID, payload, "ticker", pair]` rather than a JSON object,
// and spells Bitcoin's base currency `XBT` instead of `BTC`. Same
// connect/split/read-loop shape as `binance.rs` and `coinbase.rs`; only the
// subscribe frame and message decoding differ.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use super::{AdapterHandle, ExchangeAdapter};
use crate::errors::DetectionError;
use crate::ingress::IngressQueue;
use crate::types::PriceUpdate;

const WS_URL: &str = "wss://ws.kraken.com";

pub struct KrakenAdapter {
    pairs: Vec<String>,
    handle: Arc<AdapterHandle>,
}

impl KrakenAdapter {
    pub fn new(pairs: Vec<String>, handle: Arc<AdapterHandle>) -> Self {
        Self { pairs, handle }
    }

    /// Kraken spells Bitcoin `XBT`; our internal pairs use `BTC`.
    fn kraken_pairs(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.replace("BTC", "XBT")).collect()
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn name(&self) -> &'static str {
        "kraken"
    }

    fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
        let (ws_stream, _response) = connect_async(WS_URL).await.map_err(|e| DetectionError::MalformedMessage {
            exchange: "kraken".into(),
            reason: format!("connect failed: {e}"),
        })?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "event": "subscribe",
            "pair": self.kraken_pairs(),
            "subscription": {"name": "ticker"},
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| DetectionError::MalformedMessage { exchange: "kraken".into(), reason: format!("subscribe failed: {e}") })?;
        self.handle.set(super::AdapterState::Subscribed);
        self.handle.set(super::AdapterState::Streaming);

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| DetectionError::MalformedMessage { exchange: "kraken".into(), reason: e.to_string() })?;
            if let Message::Text(text) = msg {
                match parse_ticker(&text) {
                    Ok(Some(tick)) => ingress.push(tick),
                    Ok(None) => {}
                    Err(e) => warn!(exchange = "kraken", error = %e, "failed to parse ticker message"),
                }
            }
        }

        Ok(())
    }
}

/// Decodes a Kraken `[channelID, {"a": [...], "b": [...], ...}, "ticker", pair]`
/// message. Non-ticker events (subscription acks, heartbeats, system status)
/// are JSON objects rather than arrays and are skipped.
fn parse_ticker(text: &str) -> Result<Option<PriceUpdate>, serde_json::Error> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let Some(arr) = root.as_array() else { return Ok(None) };
    if arr.len() < 4 {
        return Ok(None);
    }
    if arr.get(2).and_then(|v| v.as_str()) != Some("ticker") {
        return Ok(None);
    }

    let payload = &arr[1];
    let Some(bid) = payload.get("b").and_then(|v| v.get(0)).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else {
        return Ok(None);
    };
    let Some(ask) = payload.get("a").and_then(|v| v.get(0)).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else {
        return Ok(None);
    };
    let Some(kraken_pair) = arr.get(3).and_then(|v| v.as_str()) else { return Ok(None) };

    let pair = kraken_pair.replace("XBT", "BTC");
    let ts = chrono::Utc::now().timestamp_millis();
    Ok(Some(PriceUpdate::new("kraken", pair, bid, ask, ts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_array_payload() {
        let payload = r#"[340,{"a":["65001.20","1","1.0"],"b":["64990.10","2","2.0"]},"ticker","XBT/USD"]"#;
        let tick = parse_ticker(payload).unwrap().expect("expected a tick");
        assert_eq!(tick.pair, "BTC/USD");
        assert!((tick.bid - 64990.10).abs() < 1e-9);
        assert!((tick.ask - 65001.20).abs() < 1e-9);
    }

    #[test]
    fn ignores_non_array_system_messages() {
        let payload = r#"{"event":"systemStatus","status":"online"}"#;
        assert!(parse_ticker(payload).unwrap().is_none());
    }

    #[test]
    fn ignores_heartbeat_array() {
        let payload = r#"{"event":"heartbeat"}"#;
        assert!(parse_ticker(payload).unwrap().is_none());
    }
}
