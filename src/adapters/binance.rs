// =============================================================================
// Binance Adapter — combined bookTicker stream
// =============================================================================
//
// Connects to Binance's combined-stream endpoint for `<symbol>@bookTicker`
// per configured pair, which pushes best bid/ask on every order book change.
// Grounded in `market_data::trade_stream::run_trade_stream`'s
// connect/split/read-loop shape, re-pointed at bookTicker instead of
// aggTrade and generalized to many symbols over one connection.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::warn;

use super::{AdapterHandle, ExchangeAdapter};
use crate::errors::DetectionError;
use crate::ingress::IngressQueue;
use crate::types::{normalize_pair, PriceUpdate};

const KNOWN_QUOTES: [&str; 4] = ["USDT", "USDC", "BUSD", "BTC"];

pub struct BinanceAdapter {
    pairs: Vec<String>,
    handle: Arc<AdapterHandle>,
}

impl BinanceAdapter {
    pub fn new(pairs: Vec<String>, handle: Arc<AdapterHandle>) -> Self {
        Self { pairs, handle }
    }

    fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .pairs
            .iter()
            .map(|p| format!("{}@bookTicker", p.replace('/', "").to_lowercase()))
            .collect();
        format!("wss://stream.binance.com:9443/stream?streams={}", streams.join("/"))
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
        let url = self.stream_url();
        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| DetectionError::MalformedMessage {
            exchange: "binance".into(),
            reason: format!("connect failed: {e}"),
        })?;

        self.handle.set(super::AdapterState::Subscribed);
        let (_write, mut read) = ws_stream.split();
        self.handle.set(super::AdapterState::Streaming);

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| DetectionError::MalformedMessage { exchange: "binance".into(), reason: e.to_string() })?;
            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_book_ticker(&text) {
                    Ok(Some(tick)) => ingress.push(tick),
                    Ok(None) => {}
                    Err(e) => warn!(exchange = "binance", error = %e, "failed to parse bookTicker message"),
                }
            }
        }

        Ok(())
    }
}

fn parse_book_ticker(text: &str) -> Result<Option<PriceUpdate>, serde_json::Error> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let data = root.get("data").unwrap_or(&root);

    let Some(symbol) = data.get("s").and_then(|v| v.as_str()) else { return Ok(None) };
    let Some(bid) = data.get("b").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else { return Ok(None) };
    let Some(ask) = data.get("a").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else { return Ok(None) };

    let Some(pair) = normalize_pair(symbol, &KNOWN_QUOTES) else { return Ok(None) };
    let ts = chrono::Utc::now().timestamp_millis();
    Ok(Some(PriceUpdate::new("binance", pair, bid, ask, ts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combined_stream_payload() {
        let payload = r#"{"stream":"btcusdt@bookTicker","data":{"s":"BTCUSDT","b":"65000.10","a":"65000.50"}}"#;
        let tick = parse_book_ticker(payload).unwrap().expect("expected a tick");
        assert_eq!(tick.exchange, "binance");
        assert_eq!(tick.pair, "BTC/USDT");
        assert!((tick.bid - 65000.10).abs() < 1e-9);
        assert!((tick.ask - 65000.50).abs() < 1e-9);
    }

    #[test]
    fn ignores_malformed_payload() {
        let payload = r#"{"data":{"s":"BTCUSDT"}}"#;
        assert!(parse_book_ticker(payload).unwrap().is_none());
    }
}
