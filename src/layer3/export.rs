// Candle Export - flat candle rows and the sinks that persist them

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::core::errors::AggregationError;
use crate::core::types::Candle;

// ============================================================================
// Candle Record
// ============================================================================

/// One exported row. Internal open/close timestamps are not part of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp: i64,

    pub open_spot: Option<f64>,
    pub open_perp: Option<f64>,
    pub high_spot: Option<f64>,
    pub high_perp: Option<f64>,
    pub low_spot: Option<f64>,
    pub low_perp: Option<f64>,
    pub close_spot: Option<f64>,
    pub close_perp: Option<f64>,

    pub volume_total: Option<f64>,
    pub volume_spot: Option<f64>,
    pub volume_perp: Option<f64>,
    pub buy_volume_total: Option<f64>,
    pub buy_volume_spot: Option<f64>,
    pub buy_volume_perp: Option<f64>,
    pub sell_volume_total: Option<f64>,
    pub sell_volume_spot: Option<f64>,
    pub sell_volume_perp: Option<f64>,

    pub trades_total: Option<u64>,
    pub trades_spot: Option<u64>,
    pub trades_perp: Option<u64>,
    pub buy_trades_total: Option<u64>,
    pub buy_trades_spot: Option<u64>,
    pub buy_trades_perp: Option<u64>,
    pub sell_trades_total: Option<u64>,
    pub sell_trades_spot: Option<u64>,
    pub sell_trades_perp: Option<u64>,

    pub open_interest: Option<f64>,
    pub funding_rate: Option<f64>,
}

impl From<&Candle> for CandleRecord {
    fn from(c: &Candle) -> Self {
        Self {
            timestamp: c.bucket_start,
            open_spot: c.spot.open,
            open_perp: c.perp.open,
            high_spot: c.spot.high,
            high_perp: c.perp.high,
            low_spot: c.spot.low,
            low_perp: c.perp.low,
            close_spot: c.spot.close,
            close_perp: c.perp.close,
            volume_total: c.total.volume,
            volume_spot: c.spot.flow.volume,
            volume_perp: c.perp.flow.volume,
            buy_volume_total: c.total.buy_volume,
            buy_volume_spot: c.spot.flow.buy_volume,
            buy_volume_perp: c.perp.flow.buy_volume,
            sell_volume_total: c.total.sell_volume,
            sell_volume_spot: c.spot.flow.sell_volume,
            sell_volume_perp: c.perp.flow.sell_volume,
            trades_total: c.total.trades,
            trades_spot: c.spot.flow.trades,
            trades_perp: c.perp.flow.trades,
            buy_trades_total: c.total.buy_trades,
            buy_trades_spot: c.spot.flow.buy_trades,
            buy_trades_perp: c.perp.flow.buy_trades,
            sell_trades_total: c.total.sell_trades,
            sell_trades_spot: c.spot.flow.sell_trades,
            sell_trades_perp: c.perp.flow.sell_trades,
            open_interest: c.open_interest,
            funding_rate: c.funding_rate,
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for emitted candles
#[async_trait]
pub trait CandleSink: Send {
    async fn write_candle(&mut self, candle: &Candle) -> Result<(), AggregationError>;

    async fn flush(&mut self) -> Result<(), AggregationError>;

    /// Sink name for logging
    fn sink_type(&self) -> &'static str;
}

/// Collects candles in memory
#[async_trait]
impl CandleSink for Vec<Candle> {
    async fn write_candle(&mut self, candle: &Candle) -> Result<(), AggregationError> {
        self.push(candle.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AggregationError> {
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "memory"
    }
}

/// Writes one `CandleRecord` JSON object per line
pub struct JsonlCandleWriter<W: Write + Send> {
    writer: W,
    rows: u64,
}

impl<W: Write + Send> JsonlCandleWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0 }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonlCandleWriter<BufWriter<File>> {
    /// Create (or truncate) `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, AggregationError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        info!(path = %path.display(), "Writing candles");
        Ok(Self::new(BufWriter::new(file)))
    }
}

#[async_trait]
impl<W: Write + Send> CandleSink for JsonlCandleWriter<W> {
    async fn write_candle(&mut self, candle: &Candle) -> Result<(), AggregationError> {
        let json = serde_json::to_string(&CandleRecord::from(candle))?;
        writeln!(self.writer, "{}", json)?;
        self.rows += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AggregationError> {
        self.writer.flush()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "jsonl"
    }
}
