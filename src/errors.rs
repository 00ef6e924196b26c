// =============================================================================
// Error kinds — spec-level taxonomy shared across the detection pipeline
// =============================================================================
//
// Only `ConfigError` ever aborts startup. Everything else is local: counted
// on an `AppState` atomic, logged with `tracing`, and the owning subsystem
// keeps running on the next tick. See `AppState` for the counters these
// variants correspond to.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("adapter for {exchange} exhausted {attempts} reconnect attempts")]
    AdapterGaveUp { exchange: String, attempts: u32 },

    #[error("malformed message from {exchange}: {reason}")]
    MalformedMessage { exchange: String, reason: String },

    #[error("invalid tick from {exchange} {pair}: bid={bid} ask={ask}")]
    InvalidTick {
        exchange: String,
        pair: String,
        bid: f64,
        ask: f64,
    },

    #[error("engine {engine} errored on {pair}: {reason}")]
    EngineError {
        engine: &'static str,
        pair: String,
        reason: String,
    },

    #[error("engine {engine} exceeded its {deadline_ms}ms deadline on {pair}")]
    EngineTimeout {
        engine: &'static str,
        pair: String,
        deadline_ms: u64,
    },

    #[error("subscriber queue full: {reason}")]
    SubscriberSlow { reason: String },

    #[error("persistence sink failed: {0}")]
    SinkError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),
}
