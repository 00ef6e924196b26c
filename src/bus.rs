// =============================================================================
// Opportunity Bus — typed one-to-many pub/sub over every engine's output
// =============================================================================
//
// Generalizes the single-subscriber push loop in `api::ws` (one `AppState`,
// one connection, a 500ms interval) into true fan-out: every detection
// engine and the adapter state machine publish `BusEvent`s here, and an
// arbitrary number of WebSocket clients plus the optional persistence sink
// subscribe independently. `tokio::sync::broadcast` is new to this crate
// relative to the original codebase, which never needed more than one
// consumer of its state.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::opportunities::{
    Anomaly, ArbitrageOpportunity, CrossExchangeOpportunity, DexCexOpportunity,
    FuturesSpotOpportunity, LatencyOpportunity, Prediction, StatArbSignal, TriangularOpportunity,
};
use crate::types::{ExchangeQuote, PriceUpdate};

/// State transition published by an exchange adapter's reconnect loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
    pub exchange: String,
    pub state: String,
    pub detail: Option<String>,
    pub ts: i64,
}

/// Free-text operator-facing event, published through a `NotificationSink`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub level: String,
    pub message: String,
    pub ts: i64,
}

/// Every event type that can cross the bus. `PriceTick` and `Prediction` are
/// the lowest-priority variants the subscriber broker drops first under
/// back-pressure (see `broker::priority_rank`); every opportunity/signal
/// variant outranks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    PriceTick(PriceUpdate),
    Quote(ExchangeQuote),
    SimpleOpp(ArbitrageOpportunity),
    TriangularOpp(TriangularOpportunity),
    CrossTriangularOpp(CrossExchangeOpportunity),
    FuturesSpotOpp(FuturesSpotOpportunity),
    DexCexOpp(DexCexOpportunity),
    LatencyOpp(LatencyOpportunity),
    StatArbSignal(StatArbSignal),
    Anomaly(Anomaly),
    Prediction(Prediction),
    ConnectionStatus(ConnectionStatusEvent),
    Notification(NotificationEvent),
}

impl BusEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::PriceTick(_) => "price_tick",
            BusEvent::Quote(_) => "quote",
            BusEvent::SimpleOpp(_) => "simple_opp",
            BusEvent::TriangularOpp(_) => "triangular_opp",
            BusEvent::CrossTriangularOpp(_) => "cross_triangular_opp",
            BusEvent::FuturesSpotOpp(_) => "futures_spot_opp",
            BusEvent::DexCexOpp(_) => "dex_cex_opp",
            BusEvent::LatencyOpp(_) => "latency_opp",
            BusEvent::StatArbSignal(_) => "stat_arb_signal",
            BusEvent::Anomaly(_) => "anomaly",
            BusEvent::Prediction(_) => "prediction",
            BusEvent::ConnectionStatus(_) => "connection_status",
            BusEvent::Notification(_) => "notification",
        }
    }
}

/// Client-side subscription filter: an empty set means "everything".
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Vec<&'static str>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self { kinds: Vec::new() }
    }

    pub fn only(kinds: Vec<&'static str>) -> Self {
        Self { kinds }
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.kind())
    }
}

const DEFAULT_CAPACITY: usize = 4096;

/// Thin wrapper over `broadcast::Sender<BusEvent>` giving the rest of the
/// crate a fire-and-forget `publish` that never errors on zero subscribers.
pub struct OpportunityBus {
    sender: broadcast::Sender<BusEvent>,
}

impl OpportunityBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber. A "no receivers" error
    /// is expected and harmless (nobody is connected yet) so it is swallowed
    /// rather than logged as a failure.
    pub fn publish(&self, event: BusEvent) {
        if self.sender.send(event).is_err() {
            trace!("published bus event with zero subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for OpportunityBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn connection_status(exchange: impl Into<String>, state: impl Into<String>, detail: Option<String>) -> BusEvent {
    BusEvent::ConnectionStatus(ConnectionStatusEvent {
        exchange: exchange.into(),
        state: state.into(),
        detail,
        ts: Utc::now().timestamp_millis(),
    })
}

pub fn notification(level: impl Into<String>, message: impl Into<String>) -> BusEvent {
    BusEvent::Notification(NotificationEvent {
        level: level.into(),
        message: message.into(),
        ts: Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = OpportunityBus::new();
        bus.publish(BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0)));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = OpportunityBus::new();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "price_tick");
    }

    #[test]
    fn event_filter_all_matches_everything() {
        let filter = EventFilter::all();
        assert!(filter.matches(&BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0))));
    }

    #[test]
    fn event_filter_only_restricts_kinds() {
        let filter = EventFilter::only(vec!["simple_opp"]);
        assert!(!filter.matches(&BusEvent::PriceTick(PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0))));
    }
}
