// Recorded Source - serves previously captured events with the same
// start-inclusive pagination contract as the exchange endpoints

use async_trait::async_trait;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::core::errors::{AggregationError, SourceError};
use crate::core::types::{MarketEvent, SourceKind};
use super::sources::PaginatedSource;

/// In-memory paginated source over timestamp-sorted events
pub struct RecordedSource {
    kind: SourceKind,
    symbol: String,
    events: Vec<MarketEvent>,
    page_size: usize,
}

impl RecordedSource {
    pub fn new(kind: SourceKind, symbol: &str, mut events: Vec<MarketEvent>, page_size: usize) -> Self {
        // stable: equal timestamps keep their recorded order
        events.sort_by_key(|e| e.timestamp());
        Self {
            kind,
            symbol: symbol.to_string(),
            events,
            page_size: page_size.max(1),
        }
    }

    /// Read one JSON event per line. Blank lines are skipped.
    pub fn from_jsonl<P: AsRef<Path>>(
        path: P,
        kind: SourceKind,
        symbol: &str,
        page_size: usize,
    ) -> Result<Self, AggregationError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(decode_event(&line)?);
        }

        info!(path = %path.display(), source = %kind, events = events.len(), "Loaded recorded events");
        Ok(Self::new(kind, symbol, events, page_size))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Decode one tagged event, naming the variant when no handler exists for it
pub fn decode_event(line: &str) -> Result<MarketEvent, AggregationError> {
    let value: Value = serde_json::from_str(line)?;
    let kind = value
        .get("kind")
        .and_then(|k| k.as_str())
        .ok_or_else(|| AggregationError::UnsupportedEventType("<missing kind>".to_string()))?;

    if !MarketEvent::KINDS.contains(&kind) {
        return Err(AggregationError::UnsupportedEventType(kind.to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl PaginatedSource for RecordedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<MarketEvent>, SourceError> {
        if !symbol.eq_ignore_ascii_case(&self.symbol) {
            return Err(SourceError::UnknownSymbol(symbol.to_string()));
        }

        let first = self.events.partition_point(|e| e.timestamp() < start_time);
        let page: Vec<MarketEvent> = self.events[first..]
            .iter()
            .take_while(|e| e.timestamp() <= end_time)
            .take(self.page_size)
            .cloned()
            .collect();

        debug!(source = %self.kind, start_time = start_time, events = page.len(), "Served recorded page");
        Ok(page)
    }
}
