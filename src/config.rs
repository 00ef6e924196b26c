// =============================================================================
// Runtime Configuration — hot-loadable detection thresholds and operational knobs
// =============================================================================
//
// Every tunable named in the external interface lives here, following
// `RuntimeConfig`'s original shape: a flat, `#[serde(default = "...")]`
// struct loaded from JSON with an atomic tmp+rename save, so that adding a
// field never breaks an existing config file on disk.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DetectionError;
use crate::types::RunMode;

fn default_pairs() -> Vec<String> {
    vec![
        "BTC/USDT".to_string(),
        "ETH/USDT".to_string(),
        "ETH/BTC".to_string(),
    ]
}

fn default_min_profit_threshold() -> f64 {
    0.01
}

fn default_min_triangular_threshold() -> f64 {
    0.1
}

fn default_min_cross_triangular_threshold() -> f64 {
    0.3
}

fn default_min_funding_rate() -> f64 {
    0.0001
}

fn default_min_funding_annualized() -> f64 {
    5.0
}

fn default_max_basis_percent() -> f64 {
    5.0
}

fn default_max_price_impact() -> f64 {
    2.0
}

fn default_min_dex_cex_profit_percent() -> f64 {
    0.3
}

fn default_min_latency_price_diff_percent() -> f64 {
    0.05
}

fn default_z_entry() -> f64 {
    2.0
}

fn default_z_exit() -> f64 {
    0.5
}

fn default_min_correlation() -> f64 {
    0.7
}

fn default_min_history() -> usize {
    30
}

fn default_engine_deadline_ms() -> u64 {
    25
}

fn default_ingress_depth() -> usize {
    4096
}

fn default_queue_depth() -> usize {
    256
}

fn default_disconnect_after_drops() -> u32 {
    20
}

fn default_graceful_shutdown_ms() -> u64 {
    5000
}

fn default_reconnect_delay_s() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_trading_fee() -> f64 {
    0.1
}

fn default_triangular_start_amount() -> f64 {
    10_000.0
}

fn default_tick_ring_capacity() -> usize {
    500
}

fn default_max_transfer_time_ms() -> u64 {
    120_000
}

fn default_funding_history_len() -> usize {
    50
}

fn default_min_staleness_ms() -> i64 {
    500
}

fn default_max_latency_time_window_ms() -> i64 {
    2000
}

fn default_staleness_thresholds_ms() -> HashMap<String, i64> {
    let mut thresholds = HashMap::new();
    thresholds.insert("binance".to_string(), 500);
    thresholds.insert("bybit".to_string(), 500);
    thresholds.insert("okx".to_string(), 500);
    thresholds.insert("kraken".to_string(), 1000);
    thresholds.insert("coinbase".to_string(), 1000);
    thresholds
}

fn default_exchange_fees() -> HashMap<String, f64> {
    HashMap::new()
}

fn default_gas_params() -> HashMap<String, f64> {
    let mut params = HashMap::new();
    params.insert("ethereum".to_string(), 8.0);
    params.insert("arbitrum".to_string(), 0.5);
    params.insert("polygon".to_string(), 0.05);
    params
}

/// Transfer time (ms) assumed when a cross-exchange triangular path hops
/// between two venues, used when no explicit override is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: RunMode,

    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,

    #[serde(default = "default_min_profit_threshold")]
    pub min_profit_threshold: f64,
    #[serde(default = "default_min_triangular_threshold")]
    pub min_triangular_threshold: f64,
    #[serde(default = "default_min_cross_triangular_threshold")]
    pub min_cross_triangular_threshold: f64,
    #[serde(default = "default_min_funding_rate")]
    pub min_funding_rate: f64,
    #[serde(default = "default_min_funding_annualized")]
    pub min_funding_annualized: f64,
    #[serde(default = "default_max_basis_percent")]
    pub max_basis_percent: f64,
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: f64,
    #[serde(default = "default_min_dex_cex_profit_percent")]
    pub min_dex_cex_profit_percent: f64,
    #[serde(default = "default_min_latency_price_diff_percent")]
    pub min_latency_price_diff_percent: f64,
    #[serde(default = "default_z_entry")]
    pub z_entry: f64,
    #[serde(default = "default_z_exit")]
    pub z_exit: f64,
    #[serde(default = "default_min_correlation")]
    pub min_correlation: f64,
    #[serde(default = "default_min_history")]
    pub min_history: usize,

    #[serde(default = "default_engine_deadline_ms")]
    pub engine_deadline_ms: u64,
    #[serde(default = "default_ingress_depth")]
    pub ingress_depth: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_disconnect_after_drops")]
    pub disconnect_after_drops: u32,
    #[serde(default = "default_graceful_shutdown_ms")]
    pub graceful_shutdown_ms: u64,
    #[serde(default = "default_reconnect_delay_s")]
    pub reconnect_delay_s: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_trading_fee")]
    pub trading_fee: f64,
    #[serde(default = "default_exchange_fees")]
    pub exchange_fees: HashMap<String, f64>,
    #[serde(default = "default_gas_params")]
    pub gas_params_usd: HashMap<String, f64>,

    #[serde(default = "default_triangular_start_amount")]
    pub triangular_start_amount: f64,
    #[serde(default = "default_tick_ring_capacity")]
    pub tick_ring_capacity: usize,
    #[serde(default = "default_max_transfer_time_ms")]
    pub max_transfer_time_ms: u64,
    #[serde(default = "default_funding_history_len")]
    pub funding_history_len: usize,

    #[serde(default = "default_min_staleness_ms")]
    pub min_staleness_ms: i64,
    #[serde(default = "default_max_latency_time_window_ms")]
    pub max_latency_time_window_ms: i64,
    #[serde(default = "default_staleness_thresholds_ms")]
    pub staleness_thresholds_ms: HashMap<String, i64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            pairs: default_pairs(),
            min_profit_threshold: default_min_profit_threshold(),
            min_triangular_threshold: default_min_triangular_threshold(),
            min_cross_triangular_threshold: default_min_cross_triangular_threshold(),
            min_funding_rate: default_min_funding_rate(),
            min_funding_annualized: default_min_funding_annualized(),
            max_basis_percent: default_max_basis_percent(),
            max_price_impact: default_max_price_impact(),
            min_dex_cex_profit_percent: default_min_dex_cex_profit_percent(),
            min_latency_price_diff_percent: default_min_latency_price_diff_percent(),
            z_entry: default_z_entry(),
            z_exit: default_z_exit(),
            min_correlation: default_min_correlation(),
            min_history: default_min_history(),
            engine_deadline_ms: default_engine_deadline_ms(),
            ingress_depth: default_ingress_depth(),
            queue_depth: default_queue_depth(),
            disconnect_after_drops: default_disconnect_after_drops(),
            graceful_shutdown_ms: default_graceful_shutdown_ms(),
            reconnect_delay_s: default_reconnect_delay_s(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            trading_fee: default_trading_fee(),
            exchange_fees: default_exchange_fees(),
            gas_params_usd: default_gas_params(),
            triangular_start_amount: default_triangular_start_amount(),
            tick_ring_capacity: default_tick_ring_capacity(),
            max_transfer_time_ms: default_max_transfer_time_ms(),
            funding_history_len: default_funding_history_len(),
            min_staleness_ms: default_min_staleness_ms(),
            max_latency_time_window_ms: default_max_latency_time_window_ms(),
            staleness_thresholds_ms: default_staleness_thresholds_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `path`. A missing file falls back to defaults (with a log
    /// line); a file that exists but fails to parse or validate is a hard
    /// `ConfigError` — unlike a missing file, an operator-supplied config
    /// that's broken should never be silently ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                info!(path = %path.display(), "no runtime config found, using defaults");
                return Ok(Self::default());
            }
        };

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("invalid runtime config at {}", path.display()))?;

        info!(path = %path.display(), pairs = ?config.pairs, mode = %config.mode, "runtime config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Startup validation: malformed pairs, negative thresholds. Unknown
    /// exchange names are validated by the adapter registry at wiring time,
    /// not here (this struct has no notion of which adapters are compiled in).
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.pairs.is_empty() {
            return Err(DetectionError::ConfigError("pairs must not be empty".into()));
        }
        for pair in &self.pairs {
            if crate::types::split_pair(pair).is_none() {
                return Err(DetectionError::ConfigError(format!("malformed pair: {pair}")));
            }
        }
        if self.min_profit_threshold < 0.0 {
            return Err(DetectionError::ConfigError("min_profit_threshold must be >= 0".into()));
        }
        if self.trading_fee < 0.0 || self.trading_fee > 100.0 {
            return Err(DetectionError::ConfigError("trading_fee must be within [0, 100]".into()));
        }
        if self.z_entry <= 0.0 {
            return Err(DetectionError::ConfigError("z_entry must be > 0".into()));
        }
        if self.queue_depth == 0 || self.ingress_depth == 0 {
            return Err(DetectionError::ConfigError("queue_depth and ingress_depth must be > 0".into()));
        }
        Ok(())
    }

    pub fn fee_for(&self, exchange: &str) -> f64 {
        self.exchange_fees.get(exchange).copied().unwrap_or(self.trading_fee)
    }

    pub fn staleness_threshold_for(&self, exchange: &str) -> i64 {
        self.staleness_thresholds_ms.get(exchange).copied().unwrap_or(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_literals() {
        let cfg = RuntimeConfig::default();
        assert!((cfg.min_profit_threshold - 0.01).abs() < 1e-12);
        assert!((cfg.min_triangular_threshold - 0.1).abs() < 1e-12);
        assert!((cfg.min_cross_triangular_threshold - 0.3).abs() < 1e-12);
        assert!((cfg.trading_fee - 0.1).abs() < 1e-12);
        assert!((cfg.triangular_start_amount - 10_000.0).abs() < 1e-12);
        assert_eq!(cfg.queue_depth, 256);
        assert_eq!(cfg.ingress_depth, 4096);
        assert_eq!(cfg.graceful_shutdown_ms, 5000);
        assert!((cfg.z_entry - 2.0).abs() < 1e-12);
        assert!((cfg.min_correlation - 0.7).abs() < 1e-12);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.pairs, default_pairs());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "pairs": ["BTC/USDT"], "min_profit_threshold": 0.5 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.pairs, vec!["BTC/USDT".to_string()]);
        assert!((cfg.min_profit_threshold - 0.5).abs() < 1e-12);
        assert_eq!(cfg.queue_depth, 256);
    }

    #[test]
    fn validate_rejects_malformed_pair() {
        let mut cfg = RuntimeConfig::default();
        cfg.pairs = vec!["BTCUSDT".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_threshold() {
        let mut cfg = RuntimeConfig::default();
        cfg.min_profit_threshold = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fee_for_falls_back_to_trading_fee() {
        let mut cfg = RuntimeConfig::default();
        cfg.trading_fee = 0.2;
        assert!((cfg.fee_for("binance") - 0.2).abs() < 1e-12);
        cfg.exchange_fees.insert("binance".to_string(), 0.05);
        assert!((cfg.fee_for("binance") - 0.05).abs() < 1e-12);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.pairs, back.pairs);
        assert!((cfg.min_profit_threshold - back.min_profit_threshold).abs() < 1e-12);
    }
}
