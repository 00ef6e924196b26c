// =============================================================================
// Coinbase Adapter — Exchange WebSocket `ticker` channel
// =============================================================================
//
// Unlike Binance's combined-stream URL, Coinbase requires an explicit
// subscribe frame after connecting, so this adapter exercises the websocket
// sink half that `binance.rs` discards. Same connect/split/read-loop shape
// otherwise, grounded in `market_data::trade_stream::run_trade_stream`.
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

const WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

pub struct CoinbaseAdapter {
    pairs: Vec<String>,
    handle: Arc<AdapterHandle>,
}

impl CoinbaseAdapter {
    pub fn new(pairs: Vec<String>, handle: Arc<AdapterHandle>) -> Self {
        Self { pairs, handle }
    }

    fn product_ids(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.replace('/', "-")).collect()
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
        let (ws_stream, _response) = connect_async(WS_URL).await.map_err(|e| DetectionError::MalformedMessage {
            exchange: "coinbase".into(),
            reason: format!("connect failed: {e}"),
        })?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "type": "subscribe",
            "product_ids": self.product_ids(),
            "channels": ["ticker"],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| DetectionError::MalformedMessage { exchange: "coinbase".into(), reason: format!("subscribe failed: {e}") })?;
        self.handle.set(super::AdapterState::Subscribed);
        self.handle.set(super::AdapterState::Streaming);

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| DetectionError::MalformedMessage { exchange: "coinbase".into(), reason: e.to_string() })?;
            if let Message::Text(text) = msg {
                match parse_ticker(&text) {
                    Ok(Some(tick)) => ingress.push(tick),
                    Ok(None) => {}
                    Err(e) => warn!(exchange = "coinbase", error = %e, "failed to parse ticker message"),
                }
            }
        }

        Ok(())
    }
}

fn parse_ticker(text: &str) -> Result<Option<PriceUpdate>, serde_json::Error> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    if root.get("type").and_then(|v| v.as_str()) != Some("ticker") {
        return Ok(None);
    }

    let Some(product_id) = root.get("product_id").and_then(|v| v.as_str()) else { return Ok(None) };
    let Some(bid) = root.get("best_bid").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else { return Ok(None) };
    let Some(ask) = root.get("best_ask").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else { return Ok(None) };

    let pair = product_id.replace('-', "/");
    let ts = chrono::Utc::now().timestamp_millis();
    Ok(Some(PriceUpdate::new("coinbase", pair, bid, ask, ts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_payload() {
        let payload = r#"{"type":"ticker","product_id":"BTC-USD","best_bid":"64990.10","best_ask":"65001.20"}"#;
        let tick = parse_ticker(payload).unwrap().expect("expected a tick");
        assert_eq!(tick.pair, "BTC/USD");
        assert!((tick.bid - 64990.10).abs() < 1e-9);
    }

    #[test]
    fn ignores_non_ticker_messages() {
        let payload = r#"{"type":"subscriptions","channels":[]}"#;
        assert!(parse_ticker(payload).unwrap().is_none());
    }
}
