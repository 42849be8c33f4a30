// Configuration Management for the Candle Join Engine
// JSON file sections with environment overrides

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use super::time::DEFAULT_BUCKET_WIDTH_MS;
use super::types::SourceKind;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub api_key: String,
    pub spot_base_url: String,
    pub futures_base_url: String,

    // Connection settings
    pub request_timeout_seconds: u32,
    pub requests_per_minute: u32,

    // Page sizes per endpoint
    pub agg_trades_limit: u32,
    pub open_interest_limit: u32,
    pub funding_rate_limit: u32,

    // openInterestHist sampling period
    pub open_interest_period: String,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            spot_base_url: "https://api.binance.com".to_string(),
            futures_base_url: "https://fapi.binance.com".to_string(),
            request_timeout_seconds: 10,
            requests_per_minute: 1200,
            agg_trades_limit: 1000,
            open_interest_limit: 500,
            funding_rate_limit: 1000,
            open_interest_period: "5m".to_string(),
        }
    }
}

/// What the aggregator does with a window no source contributed to while
/// some source still has later data pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Emit a candle with every field unset and move on
    EmitEmpty,
    /// Stop the run with `AggregationError::DataGap`
    Fail,
}

impl Default for GapPolicy {
    fn default() -> Self {
        GapPolicy::EmitEmpty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleConfig {
    pub symbol: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub bucket_width_ms: i64,
    pub backoff_secs: u64,
    pub gap_policy: GapPolicy,

    // Run every loader in its own task behind a bounded channel
    pub concurrent_sources: bool,
    pub channel_capacity: usize,

    pub sources: Vec<SourceKind>,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            start_time_ms: 0,
            end_time_ms: 0,
            bucket_width_ms: DEFAULT_BUCKET_WIDTH_MS,
            backoff_secs: 42,
            gap_policy: GapPolicy::EmitEmpty,
            concurrent_sources: false,
            channel_capacity: 4096,
            sources: SourceKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: false,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbol: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub bucket_width_ms: i64,
    pub sources: Vec<SourceKind>,
    pub concurrent_sources: bool,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    binance: Arc<RwLock<BinanceConfig>>,
    candles: Arc<RwLock<CandleConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            binance: Arc::new(RwLock::new(BinanceConfig::default())),
            candles: Arc::new(RwLock::new(CandleConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from JSON file
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(binance_data) = config_data.get("binance") {
            *self.binance.write() = serde_json::from_value::<BinanceConfig>(binance_data.clone())?;
        }

        if let Some(candle_data) = config_data.get("candles") {
            *self.candles.write() = serde_json::from_value::<CandleConfig>(candle_data.clone())?;
        }

        if let Some(monitoring_data) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value::<MonitoringConfig>(monitoring_data.clone())?;
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Load overrides from environment variables
    pub fn load_from_env(&mut self) {
        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            self.binance.write().api_key = api_key;
        }
        if let Ok(symbol) = std::env::var("CANDLE_SYMBOL") {
            self.candles.write().symbol = symbol.to_uppercase();
        }
        if let Ok(level) = std::env::var("CANDLE_LOG_LEVEL") {
            self.monitoring.write().log_level = level;
        }
    }

    /// Save configuration to JSON file (excludes the API key)
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let mut binance = self.binance.read().clone();
        binance.api_key = String::new();

        let mut config_map = HashMap::new();
        config_map.insert("binance", serde_json::to_value(&binance)?);
        config_map.insert("candles", serde_json::to_value(&*self.candles.read())?);
        config_map.insert("monitoring", serde_json::to_value(&*self.monitoring.read())?);

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&config_map)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration, returning every problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let candles = self.candles.read();
        let binance = self.binance.read();

        if candles.symbol.is_empty() {
            errors.push("symbol must not be empty".to_string());
        }
        if candles.end_time_ms < candles.start_time_ms {
            errors.push("end_time_ms must not precede start_time_ms".to_string());
        }
        if candles.bucket_width_ms <= 0 {
            errors.push("bucket_width_ms must be positive".to_string());
        }
        if candles.concurrent_sources && candles.channel_capacity == 0 {
            errors.push("channel_capacity must be positive".to_string());
        }
        if candles.sources.is_empty() {
            errors.push("at least one source must be enabled".to_string());
        }
        if binance.requests_per_minute == 0 {
            errors.push("requests_per_minute must be positive".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    pub fn get_summary(&self) -> ConfigSummary {
        let candles = self.candles.read();
        let monitoring = self.monitoring.read();

        ConfigSummary {
            symbol: candles.symbol.clone(),
            start_time_ms: candles.start_time_ms,
            end_time_ms: candles.end_time_ms,
            bucket_width_ms: candles.bucket_width_ms,
            sources: candles.sources.clone(),
            concurrent_sources: candles.concurrent_sources,
            log_level: monitoring.log_level.clone(),
        }
    }

    pub fn binance(&self) -> BinanceConfig {
        self.binance.read().clone()
    }

    pub fn candles(&self) -> CandleConfig {
        self.candles.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }

    /// Apply an in-place edit to the candle section (CLI overrides)
    pub fn update_candles<F: FnOnce(&mut CandleConfig)>(&self, f: F) {
        f(&mut self.candles.write());
    }

    pub fn update_monitoring<F: FnOnce(&mut MonitoringConfig)>(&self, f: F) {
        f(&mut self.monitoring.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let binance = BinanceConfig::default();
        assert_eq!(binance.futures_base_url, "https://fapi.binance.com");
        assert_eq!(binance.spot_base_url, "https://api.binance.com");
        assert_eq!(binance.open_interest_period, "5m");

        let candles = CandleConfig::default();
        assert_eq!(candles.bucket_width_ms, 300_000);
        assert_eq!(candles.backoff_secs, 42);
        assert_eq!(candles.gap_policy, GapPolicy::EmitEmpty);
        assert_eq!(candles.sources.len(), 4);
    }

    #[test]
    fn test_validation_rejects_inverted_range() {
        let manager = ConfigManager::new(None).unwrap();
        manager.update_candles(|c| {
            c.start_time_ms = 600_000;
            c.end_time_ms = 0;
        });

        match manager.validate() {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("end_time_ms")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_accepts_defaults() {
        let manager = ConfigManager::new(None).unwrap();
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let path = path.to_str().unwrap();

        let manager = ConfigManager::new(None).unwrap();
        manager.update_candles(|c| {
            c.symbol = "ETHUSDT".to_string();
            c.gap_policy = GapPolicy::Fail;
            c.sources = vec![SourceKind::SpotTrades, SourceKind::FundingRate];
        });
        manager.save_to_file(path).unwrap();

        let mut loaded = ConfigManager::new(None).unwrap();
        loaded.load_from_file(path).unwrap();
        let candles = loaded.candles();
        assert_eq!(candles.symbol, "ETHUSDT");
        assert_eq!(candles.gap_policy, GapPolicy::Fail);
        assert_eq!(candles.sources, vec![SourceKind::SpotTrades, SourceKind::FundingRate]);
        assert_eq!(loaded.binance().api_key, "");
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"candles": {"symbol": "SOLUSDT", "backoff_secs": 5}}"#).unwrap();

        let mut manager = ConfigManager::new(None).unwrap();
        manager.load_from_file(path.to_str().unwrap()).unwrap();
        let candles = manager.candles();
        assert_eq!(candles.symbol, "SOLUSDT");
        assert_eq!(candles.backoff_secs, 5);
        assert_eq!(candles.bucket_width_ms, 300_000);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let mut manager = ConfigManager::new(None).unwrap();
        assert!(manager.load_from_file("/definitely/not/here.json").is_ok());
    }
}
