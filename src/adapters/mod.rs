// =============================================================================
// Exchange Adapters — one long-lived task per venue
// =============================================================================
//
// Generalizes the connect/read-loop shape of
// `market_data::trade_stream::run_trade_stream` (tokio-tungstenite,
// `StreamExt::next`, parse-or-warn) from a single hardcoded Binance trade
// stream into a pluggable `ExchangeAdapter` trait with a uniform
// connect -> subscribe -> stream -> reconnect lifecycle, plus a synthetic
// simulator and a file-backed replay source for environments with no network
// access to real venues.
// =============================================================================

pub mod binance;
pub mod coinbase;
pub mod kraken;
pub mod replay;
pub mod simulator;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::bus::{connection_status, OpportunityBus};
use crate::errors::DetectionError;
use crate::ingress::IngressQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
    Reconnecting,
    GaveUp,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::GaveUp => "gave_up",
        }
    }
}

/// Shared, externally-observable lifecycle state for one adapter instance.
/// `/api/status` and the `ConnectionStatus` bus events both read through
/// this handle.
pub struct AdapterHandle {
    exchange: &'static str,
    state: RwLock<AdapterState>,
}

impl AdapterHandle {
    pub fn new(exchange: &'static str) -> Arc<Self> {
        Arc::new(Self { exchange, state: RwLock::new(AdapterState::Disconnected) })
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    pub fn exchange(&self) -> &'static str {
        self.exchange
    }

    fn set(&self, state: AdapterState) {
        *self.state.write() = state;
    }
}

/// Async source of `PriceUpdate`. One implementation per venue plus a
/// synthetic simulator and a replay source (spec §4.1).
#[async_trait]
pub trait ExchangeAdapter: Send {
    fn name(&self) -> &'static str;
    fn pairs(&self) -> &[String];

    /// Run a single connect -> subscribe -> stream session, pushing every
    /// decoded tick onto `ingress`. Returns on clean stream end; propagates
    /// `DetectionError` on a connection failure so the caller can retry.
    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError>;
}

/// Drives `adapter.run_once` in the connect -> subscribe -> stream ->
/// reconnect loop from spec §4.1: on failure, wait `reconnect_delay_s` and
/// retry, up to `max_attempts`, then fail terminally with `AdapterGaveUp`.
pub async fn run_with_reconnect(
    mut adapter: Box<dyn ExchangeAdapter>,
    ingress: Arc<IngressQueue>,
    bus: Arc<OpportunityBus>,
    handle: Arc<AdapterHandle>,
    reconnect_delay_s: u64,
    max_attempts: u32,
) {
    let exchange = adapter.name();
    let mut attempts: u32 = 0;

    loop {
        handle.set(AdapterState::Connecting);
        bus.publish(connection_status(exchange, AdapterState::Connecting.as_str(), None));

        match adapter.run_once(ingress.clone()).await {
            Ok(()) => {
                info!(exchange, "adapter stream ended cleanly, reconnecting");
                attempts = 0;
                handle.set(AdapterState::Disconnected);
            }
            Err(e) => {
                attempts += 1;
                warn!(exchange, attempt = attempts, max_attempts, error = %e, "adapter connection failed");
                handle.set(AdapterState::Reconnecting);
                bus.publish(connection_status(exchange, AdapterState::Reconnecting.as_str(), Some(e.to_string())));

                if attempts >= max_attempts {
                    handle.set(AdapterState::GaveUp);
                    let err = DetectionError::AdapterGaveUp { exchange: exchange.to_string(), attempts };
                    error!(exchange, attempts, "adapter exhausted reconnect attempts, giving up");
                    bus.publish(connection_status(exchange, AdapterState::GaveUp.as_str(), Some(err.to_string())));
                    return;
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(reconnect_delay_s)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceUpdate;

    struct FlakyAdapter {
        pairs: Vec<String>,
        fail_times: u32,
        calls: u32,
    }

    #[async_trait]
    impl ExchangeAdapter for FlakyAdapter {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn pairs(&self) -> &[String] {
            &self.pairs
        }
        async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
            self.calls += 1;
            if self.calls <= self.fail_times {
                return Err(DetectionError::MalformedMessage { exchange: "flaky".into(), reason: "boom".into() });
            }
            ingress.push(PriceUpdate::new("flaky", "BTC/USDT", 1.0, 1.1, 0));
            Ok(())
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let ingress = Arc::new(IngressQueue::new(4));
        let bus = Arc::new(OpportunityBus::new());
        let handle = AdapterHandle::new("flaky");
        let adapter = Box::new(FlakyAdapter { pairs: vec!["BTC/USDT".into()], fail_times: 100, calls: 0 });

        run_with_reconnect(adapter, ingress, bus, handle.clone(), 0, 3).await;
        assert_eq!(handle.state(), AdapterState::GaveUp);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let ingress = Arc::new(IngressQueue::new(4));
        let bus = Arc::new(OpportunityBus::new());
        let handle = AdapterHandle::new("flaky");
        let mut adapter = FlakyAdapter { pairs: vec!["BTC/USDT".into()], fail_times: 1, calls: 0 };

        // First attempt fails, second succeeds and pushes one tick, then the
        // loop treats the clean return as a reconnect-worthy event too; run
        // only until the tick lands to keep the test bounded.
        assert!(adapter.run_once(ingress.clone()).await.is_err());
        assert!(adapter.run_once(ingress.clone()).await.is_ok());
        assert_eq!(ingress.len(), 1);
    }
}
