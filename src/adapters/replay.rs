// =============================================================================
// Replay Adapter — file-backed, speed-controlled tick playback
// =============================================================================
//
// Generalizes `original_source/engine_replay.py`'s `ReplaySession.play`: load
// a time-ordered tick log, sleep between ticks scaled by the recorded
// inter-tick delta and a speed multiplier, and feed the result through the
// same `ExchangeAdapter` interface live adapters use. Stored ticks are
// JSON-lines `PriceUpdate`s, the same shape `sinks::JsonlFileSink` writes, so
// export -> replay round-trips. Pause/resume/speed-change are exposed through
// `ReplayControl`, a shared handle the API layer mutates at runtime.
// =============================================================================

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{AdapterHandle, ExchangeAdapter};
use crate::errors::DetectionError;
use crate::ingress::IngressQueue;
use crate::types::PriceUpdate;

const MAX_GAP_MS: i64 = 60_000;
const GAP_REPLACEMENT_MS: u64 = 10;

/// Runtime-mutable replay controls, shared between the adapter task and the
/// API's replay-control endpoints.
pub struct ReplayControl {
    paused: AtomicBool,
    stopped: AtomicBool,
    speed_millis: AtomicU64,
}

impl ReplayControl {
    pub fn new(initial_speed: f64) -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            speed_millis: AtomicU64::new((initial_speed.max(0.1) * 1000.0) as u64),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed_millis.store((speed.clamp(0.1, 10_000.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn speed(&self) -> f64 {
        self.speed_millis.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

pub struct ReplayAdapter {
    path: PathBuf,
    pairs: Vec<String>,
    handle: Arc<AdapterHandle>,
    control: Arc<ReplayControl>,
}

impl ReplayAdapter {
    pub fn new(path: PathBuf, pairs: Vec<String>, handle: Arc<AdapterHandle>, control: Arc<ReplayControl>) -> Self {
        Self { path, pairs, handle, control }
    }

    fn load_ticks(&self) -> Result<Vec<PriceUpdate>, DetectionError> {
        let file = std::fs::File::open(&self.path).map_err(|e| DetectionError::MalformedMessage {
            exchange: "replay".into(),
            reason: format!("failed to open {}: {e}", self.path.display()),
        })?;

        let mut ticks = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| DetectionError::MalformedMessage { exchange: "replay".into(), reason: e.to_string() })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PriceUpdate>(&line) {
                Ok(tick) => ticks.push(tick),
                Err(e) => warn!(error = %e, "skipping malformed replay line"),
            }
        }
        ticks.sort_by_key(|t| t.ts);
        Ok(ticks)
    }
}

#[async_trait]
impl ExchangeAdapter for ReplayAdapter {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn run_once(&mut self, ingress: Arc<IngressQueue>) -> Result<(), DetectionError> {
        let ticks = self.load_ticks()?;
        self.handle.set(super::AdapterState::Subscribed);
        self.handle.set(super::AdapterState::Streaming);

        let mut last_ts: Option<i64> = None;
        for tick in ticks {
            if self.control.is_stopped() {
                break;
            }
            while self.control.is_paused() {
                if self.control.is_stopped() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            if let Some(prev) = last_ts {
                let gap_ms = (tick.ts - prev).max(0);
                let effective_gap_ms = if gap_ms > MAX_GAP_MS { GAP_REPLACEMENT_MS } else { gap_ms as u64 };
                let speed = self.control.speed().max(0.1);
                let delay_ms = (effective_gap_ms as f64 / speed) as u64;
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }

            last_ts = Some(tick.ts);
            ingress.push(tick);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jsonl(ticks: &[PriceUpdate]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for tick in ticks {
            writeln!(file, "{}", serde_json::to_string(tick).unwrap()).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn replays_ticks_in_timestamp_order() {
        let ticks = vec![
            PriceUpdate::new("binance", "BTC/USDT", 100.0, 101.0, 2),
            PriceUpdate::new("binance", "BTC/USDT", 99.0, 100.0, 0),
        ];
        let file = write_jsonl(&ticks);
        let control = ReplayControl::new(10_000.0);
        let handle = AdapterHandle::new("replay");
        let mut adapter = ReplayAdapter::new(file.path().to_path_buf(), vec!["BTC/USDT".into()], handle, control);

        let ingress = Arc::new(IngressQueue::new(10));
        adapter.run_once(ingress.clone()).await.unwrap();

        let first = ingress.pop().await;
        let second = ingress.pop().await;
        assert_eq!(first.ts, 0);
        assert_eq!(second.ts, 2);
    }

    #[tokio::test]
    async fn stop_flag_halts_playback_immediately() {
        let ticks = vec![
            PriceUpdate::new("binance", "BTC/USDT", 100.0, 101.0, 0),
            PriceUpdate::new("binance", "BTC/USDT", 100.0, 101.0, 100_000),
        ];
        let file = write_jsonl(&ticks);
        let control = ReplayControl::new(1.0);
        control.stop();
        let handle = AdapterHandle::new("replay");
        let mut adapter = ReplayAdapter::new(file.path().to_path_buf(), vec!["BTC/USDT".into()], handle, control);

        let ingress = Arc::new(IngressQueue::new(10));
        adapter.run_once(ingress.clone()).await.unwrap();
        assert!(ingress.is_empty());
    }
}
