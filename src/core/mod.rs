// Core Module - Foundational types, config, logging, errors

pub mod types;
pub mod errors;
pub mod time;
pub mod config;
pub mod logger;

// Re-export commonly used items for convenience
pub use types::*;
pub use errors::{AggregationError, SourceError};
pub use time::{bucket_floor, reached_end, END_TOLERANCE_MS, DEFAULT_BUCKET_WIDTH_MS};
pub use config::{
    BinanceConfig, CandleConfig, MonitoringConfig, GapPolicy,
    ConfigManager, ConfigSummary, ConfigError,
};
pub use logger::setup_logging;
