// Incremental Loader - turns a paginated source into one continuous ordered stream
// Re-queries with an advancing cursor, retries transient failures with a fixed backoff

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::AggregationError;
use crate::core::time::reached_end;
use crate::core::types::{MarketEvent, SourceKind};
use crate::layer1::sources::PaginatedSource;
use super::cursor::PullStream;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(42);

// ============================================================================
// Loader Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    pub pages_fetched: u64,
    pub events_yielded: u64,
    pub duplicates_skipped: u64,
    pub transient_failures: u64,
}

impl fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LoaderStats(pages={}, events={}, dups={}, retries={})",
            self.pages_fetched, self.events_yielded, self.duplicates_skipped, self.transient_failures
        )
    }
}

/// Why a loader stopped producing events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEnd {
    /// Cursor reached the end of the requested range
    RangeCovered,
    /// A page did not advance the cursor
    Quiescent,
    /// The source returned an event past the end of the range
    PastEnd,
    Cancelled,
}

// ============================================================================
// Incremental Loader
// ============================================================================

pub struct IncrementalLoader {
    source: Arc<dyn PaginatedSource>,
    symbol: String,
    end_time: i64,
    cursor: i64,
    backoff: Duration,
    cancel: CancellationToken,

    page: VecDeque<MarketEvent>,
    // Events already yielded at the cursor timestamp; a start-inclusive re-query returns them again
    boundary: Vec<MarketEvent>,
    finished: Option<LoadEnd>,

    stats: LoaderStats,
}

impl IncrementalLoader {
    pub fn new(
        source: Arc<dyn PaginatedSource>,
        symbol: &str,
        start_time: i64,
        end_time: i64,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        debug!(source = %source.kind(), symbol = symbol, start_time, end_time, "Creating loader");
        Self {
            source,
            symbol: symbol.to_string(),
            end_time,
            cursor: start_time,
            backoff,
            cancel,
            page: VecDeque::new(),
            boundary: Vec::new(),
            finished: None,
            stats: LoaderStats::default(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn finished(&self) -> Option<LoadEnd> {
        self.finished
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    fn finish(&mut self, reason: LoadEnd) {
        if self.finished.is_none() {
            info!(
                source = %self.source.kind(),
                reason = ?reason,
                cursor = self.cursor,
                stats = %self.stats,
                "Loader finished"
            );
            self.finished = Some(reason);
        }
    }

    /// Fetch pages until one yields something, the load ends, or a fatal error occurs
    async fn fill_page(&mut self) -> Result<(), AggregationError> {
        loop {
            if self.cancel.is_cancelled() {
                self.finish(LoadEnd::Cancelled);
                return Ok(());
            }
            if reached_end(self.cursor, self.end_time) {
                self.finish(LoadEnd::RangeCovered);
                return Ok(());
            }

            let events = match self.source.fetch(&self.symbol, self.cursor, self.end_time).await {
                Ok(events) => events,
                Err(e) if e.is_transient() => {
                    self.stats.transient_failures += 1;
                    warn!(
                        source = %self.source.kind(),
                        cursor = self.cursor,
                        error = %e,
                        backoff_secs = self.backoff.as_secs(),
                        "Transient upstream failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        _ = self.cancel.cancelled() => {
                            self.finish(LoadEnd::Cancelled);
                            return Ok(());
                        }
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.stats.pages_fetched += 1;
            self.accept_page(events);

            if !self.page.is_empty() || self.finished.is_some() {
                return Ok(());
            }
        }
    }

    fn accept_page(&mut self, events: Vec<MarketEvent>) {
        let previous_cursor = self.cursor;
        let mut max_timestamp = previous_cursor;
        let mut past_end = false;

        for event in events {
            let ts = event.timestamp();
            if ts > self.end_time {
                past_end = true;
                break;
            }
            if ts == previous_cursor && self.boundary.contains(&event) {
                self.stats.duplicates_skipped += 1;
                continue;
            }
            max_timestamp = max_timestamp.max(ts);
            self.page.push_back(event);
        }

        debug!(
            source = %self.source.kind(),
            cursor = previous_cursor,
            max_timestamp,
            queued = self.page.len(),
            "Accepted page"
        );

        if max_timestamp > previous_cursor {
            self.cursor = max_timestamp;
            self.boundary.clear();
        }
        let cursor = self.cursor;
        self.boundary
            .extend(self.page.iter().filter(|e| e.timestamp() == cursor).cloned());

        if past_end {
            self.finish(LoadEnd::PastEnd);
        } else if max_timestamp == previous_cursor {
            self.finish(LoadEnd::Quiescent);
        }
    }
}

#[async_trait]
impl PullStream for IncrementalLoader {
    type Item = MarketEvent;

    async fn pull(&mut self) -> Result<Option<MarketEvent>, AggregationError> {
        loop {
            if let Some(event) = self.page.pop_front() {
                self.stats.events_yielded += 1;
                return Ok(Some(event));
            }
            if self.finished.is_some() {
                return Ok(None);
            }
            self.fill_page().await?;
        }
    }
}
