// =============================================================================
// Sinks — pluggable collaborators for persistence and notification delivery
// =============================================================================
//
// Two trait/impl pairs standing in for the out-of-scope external services
// named in spec §1 (a durable tick database, outbound email/Telegram/Discord
// delivery): a `TickSink` the dispatcher can optionally hand every committed
// tick to, and a `NotificationSink` the adapter lifecycle and anomaly paths
// publish operator-facing events through. Grounded in
// `original_source/src/notifications/service.py`'s dispatch-by-channel shape,
// minus the channel-specific HTTP/SMTP clients, which remain external
// collaborators per spec §1.
// =============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::bus::{BusEvent, ConnectionStatusEvent, NotificationEvent};
use crate::errors::DetectionError;
use crate::types::PriceUpdate;

/// Durable persistence collaborator (spec §6 "Persistence (optional
/// collaborator)"). Sink errors are counted and never block the dispatcher.
#[async_trait]
pub trait TickSink: Send + Sync {
    async fn write_tick(&self, tick: &PriceUpdate) -> Result<(), DetectionError>;
}

/// No-op default: the core works with zero persistence configured.
pub struct NullTickSink;

#[async_trait]
impl TickSink for NullTickSink {
    async fn write_tick(&self, _tick: &PriceUpdate) -> Result<(), DetectionError> {
        Ok(())
    }
}

/// Append-only JSON-lines sink. Writes the same shape `adapters::replay`
/// reads, so `export -> replay` round-trips per spec §8.
pub struct JsonlFileSink {
    file: Mutex<std::fs::File>,
    errors_total: AtomicU64,
}

impl JsonlFileSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DetectionError> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DetectionError::SinkError(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self { file: Mutex::new(file), errors_total: AtomicU64::new(0) })
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TickSink for JsonlFileSink {
    async fn write_tick(&self, tick: &PriceUpdate) -> Result<(), DetectionError> {
        let line = serde_json::to_string(tick).map_err(|e| DetectionError::SinkError(e.to_string()))?;
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{line}") {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
            return Err(DetectionError::SinkError(e.to_string()));
        }
        Ok(())
    }
}

/// Operator-facing notification collaborator for `ConnectionStatus` and
/// `Anomaly` events. A real deployment plugs in email/Telegram/Discord
/// delivery behind this trait; those channel-specific HTTP clients remain
/// out-of-scope external collaborators per spec §1.
pub trait NotificationSink: Send + Sync {
    fn notify_connection_status(&self, event: &ConnectionStatusEvent);
    fn notify(&self, event: &NotificationEvent);
}

/// Reference implementation: routes every notification through `tracing`.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify_connection_status(&self, event: &ConnectionStatusEvent) {
        warn!(exchange = %event.exchange, state = %event.state, detail = ?event.detail, "connection status changed");
    }

    fn notify(&self, event: &NotificationEvent) {
        warn!(level = %event.level, message = %event.message, "notification");
    }
}

/// Drains `bus` and forwards `ConnectionStatus`/`Notification` events to
/// `sink`, and every `PriceTick` to `tick_sink`. Intended to run as its own
/// `tokio::spawn`ed task for the lifetime of the process.
pub async fn run_sink_loop(
    mut rx: tokio::sync::broadcast::Receiver<BusEvent>,
    tick_sink: std::sync::Arc<dyn TickSink>,
    notification_sink: std::sync::Arc<dyn NotificationSink>,
) {
    loop {
        match rx.recv().await {
            Ok(BusEvent::PriceTick(tick)) => {
                if let Err(e) = tick_sink.write_tick(&tick).await {
                    warn!(error = %e, "tick sink write failed");
                }
            }
            Ok(BusEvent::ConnectionStatus(event)) => notification_sink.notify_connection_status(&event),
            Ok(BusEvent::Notification(event)) => notification_sink.notify(&event),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "sink loop lagged behind the opportunity bus");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_tick() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = JsonlFileSink::open(file.path()).unwrap();
        sink.write_tick(&PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0)).await.unwrap();
        sink.write_tick(&PriceUpdate::new("binance", "BTC/USDT", 2.0, 2.1, 1)).await.unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(sink.errors_total(), 0);
    }

    #[tokio::test]
    async fn null_sink_always_succeeds() {
        let sink = NullTickSink;
        assert!(sink.write_tick(&PriceUpdate::new("binance", "BTC/USDT", 1.0, 1.1, 0)).await.is_ok());
    }
}
