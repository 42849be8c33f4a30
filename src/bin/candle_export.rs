//! Candle Export CLI
//!
//! Builds 5-minute (or custom width) candles for one symbol over a closed
//! historical range and writes them as JSON lines.
//!
//! Usage:
//!   # From Binance public endpoints
//!   cargo run --release --bin candle_export -- \
//!     --symbol BTCUSDT --start 2024-09-12T07:00:00Z --end 2024-09-12T09:00:00Z \
//!     --output candles.jsonl
//!
//!   # From recorded events (<dir>/spot_trades.jsonl, perp_trades.jsonl, ...)
//!   cargo run --release --bin candle_export -- --replay-dir ./recorded \
//!     --start 2024-09-12T07:00:00Z --end 2024-09-12T09:00:00Z

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use candle_join::core::time::parse_rfc3339_millis;
use candle_join::core::{setup_logging, ConfigError, ConfigManager, GapPolicy};
use candle_join::layer1::{PaginatedSource, RecordedSource};
use candle_join::layer3::{CandlePipeline, CandleSink, JsonlCandleWriter};

#[derive(Parser, Debug)]
#[command(name = "candle_export")]
#[command(about = "Merge spot trades, perp trades, open interest and funding into fixed-width candles")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<String>,

    #[arg(long, env = "CANDLE_SYMBOL")]
    symbol: Option<String>,

    /// Range start, RFC 3339 (inclusive)
    #[arg(long)]
    start: Option<String>,

    /// Range end, RFC 3339 (inclusive)
    #[arg(long)]
    end: Option<String>,

    #[arg(long)]
    bucket_minutes: Option<i64>,

    /// Output file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// Read recorded events instead of calling the exchange
    #[arg(long)]
    replay_dir: Option<PathBuf>,

    /// Load every source on its own task
    #[arg(long)]
    concurrent: bool,

    /// Abort on a window with no data instead of emitting an empty candle
    #[arg(long)]
    fail_on_gap: bool,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

const REPLAY_PAGE_SIZE: usize = 1000;

/// Parse an optional RFC 3339 flag into epoch milliseconds
fn parse_time_arg(flag: &str, value: Option<&str>) -> Result<Option<i64>> {
    value
        .map(|v| parse_rfc3339_millis(v).with_context(|| format!("invalid {} timestamp '{}'", flag, v)))
        .transpose()
}

fn bucket_width_ms(minutes: i64) -> Result<i64, ConfigError> {
    minutes
        .checked_mul(60_000)
        .ok_or_else(|| ConfigError::Validation(format!("--bucket-minutes {} is out of range", minutes)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigManager::new(args.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", args.config))?;

    let start = parse_time_arg("--start", args.start.as_deref())?;
    let end = parse_time_arg("--end", args.end.as_deref())?;
    let width = args.bucket_minutes.map(bucket_width_ms).transpose()?;
    config.update_candles(|c| {
        if let Some(symbol) = &args.symbol {
            c.symbol = symbol.to_uppercase();
        }
        if let Some(start) = start {
            c.start_time_ms = start;
        }
        if let Some(end) = end {
            c.end_time_ms = end;
        }
        if let Some(width) = width {
            c.bucket_width_ms = width;
        }
        if args.concurrent {
            c.concurrent_sources = true;
        }
        if args.fail_on_gap {
            c.gap_policy = GapPolicy::Fail;
        }
    });
    config.update_monitoring(|m| {
        if let Some(level) = &args.log_level {
            m.log_level = level.clone();
        }
        if args.json_logs {
            m.json_logs = true;
        }
    });

    let monitoring = config.monitoring();
    setup_logging(Some(&monitoring.log_level), Some(monitoring.json_logs), Some(true));
    config.validate().context("invalid configuration")?;
    info!(summary = ?config.get_summary(), "Configuration ready");

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current window");
            ctrl_c_token.cancel();
        }
    });

    let candles = config.candles();
    let pipeline = match &args.replay_dir {
        Some(dir) => {
            let mut sources: Vec<Arc<dyn PaginatedSource>> = Vec::new();
            for kind in &candles.sources {
                let path = dir.join(format!("{}.jsonl", kind));
                if !path.exists() {
                    warn!(path = %path.display(), source = %kind, "No recording for source, skipping");
                    continue;
                }
                let source = RecordedSource::from_jsonl(&path, *kind, &candles.symbol, REPLAY_PAGE_SIZE)
                    .with_context(|| format!("failed to load recording {}", path.display()))?;
                sources.push(Arc::new(source));
            }
            CandlePipeline::new(candles, sources, cancel)
        }
        None => CandlePipeline::with_binance(candles, &config.binance(), cancel)
            .context("failed to build Binance client")?,
    };

    let mut sink: Box<dyn CandleSink> = match &args.output {
        Some(path) => Box::new(
            JsonlCandleWriter::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(JsonlCandleWriter::new(std::io::stdout())),
    };

    let stats = pipeline.run(sink.as_mut()).await.context("candle export failed")?;
    info!(stats = %stats, "Export complete");
    Ok(())
}
