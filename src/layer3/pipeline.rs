// Candle Pipeline - Sources -> Loaders -> (Producers) -> Aggregator -> Sink
// Assembles one aggregation run from configuration

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::{BinanceConfig, CandleConfig};
use crate::core::errors::AggregationError;
use crate::layer1::rest_client::{BinanceRestClient, RestClientError};
use crate::layer1::sources::{BinanceSource, PaginatedSource};
use crate::layer2::channel::spawn_producer;
use crate::layer2::cursor::EventStream;
use crate::layer2::loader::IncrementalLoader;
use super::aggregator::{BucketAggregator, SourceLane};
use super::export::CandleSink;

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub symbol: String,
    pub sources: usize,
    pub candles_written: u64,
    pub empty_candles: u64,
    pub events_folded: u64,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(symbol={}, sources={}, candles={}, empty={}, events={}, elapsed={}ms, cancelled={})",
            self.symbol,
            self.sources,
            self.candles_written,
            self.empty_candles,
            self.events_folded,
            self.elapsed_ms,
            self.cancelled
        )
    }
}

pub struct CandlePipeline {
    config: CandleConfig,
    sources: Vec<Arc<dyn PaginatedSource>>,
    cancel: CancellationToken,
}

impl CandlePipeline {
    /// Sources whose kind is not enabled in `config.sources` are dropped
    pub fn new(config: CandleConfig, sources: Vec<Arc<dyn PaginatedSource>>, cancel: CancellationToken) -> Self {
        let (enabled, disabled): (Vec<_>, Vec<_>) = sources
            .into_iter()
            .partition(|s| config.sources.contains(&s.kind()));
        for source in &disabled {
            warn!(source = %source.kind(), "Source not enabled, skipping");
        }

        Self {
            config,
            sources: enabled,
            cancel,
        }
    }

    /// One Binance source per enabled kind, sharing a rate-limited client
    pub fn with_binance(
        config: CandleConfig,
        binance: &BinanceConfig,
        cancel: CancellationToken,
    ) -> Result<Self, RestClientError> {
        let client = Arc::new(BinanceRestClient::from_config(binance)?);
        let sources = BinanceSource::all(client, &config.sources, binance);
        Ok(Self::new(config, sources, cancel))
    }

    fn build_lanes(&self) -> Vec<SourceLane> {
        let backoff = Duration::from_secs(self.config.backoff_secs);

        self.sources
            .iter()
            .map(|source| {
                let loader = IncrementalLoader::new(
                    source.clone(),
                    &self.config.symbol,
                    self.config.start_time_ms,
                    self.config.end_time_ms,
                    backoff,
                    self.cancel.clone(),
                );
                let stream: EventStream = if self.config.concurrent_sources {
                    Box::new(spawn_producer(Box::new(loader), self.config.channel_capacity, self.cancel.clone()))
                } else {
                    Box::new(loader)
                };
                SourceLane::new(source.kind(), stream)
            })
            .collect()
    }

    /// Build the aggregator without running it, for callers that pull candles themselves.
    /// Needs a Tokio runtime when `concurrent_sources` is set, since producers are spawned here.
    pub fn aggregator(&self) -> Result<BucketAggregator, AggregationError> {
        BucketAggregator::new(
            self.build_lanes(),
            &self.config.symbol,
            self.config.start_time_ms,
            self.config.end_time_ms,
            self.config.bucket_width_ms,
            self.config.gap_policy,
            self.cancel.clone(),
        )
    }

    /// Drive the run to completion, writing every candle to `sink`
    pub async fn run<S: CandleSink + ?Sized>(&self, sink: &mut S) -> Result<PipelineStats, AggregationError> {
        let started = Instant::now();
        info!(
            symbol = %self.config.symbol,
            start = self.config.start_time_ms,
            end = self.config.end_time_ms,
            sources = self.sources.len(),
            concurrent = self.config.concurrent_sources,
            sink = sink.sink_type(),
            "Starting candle pipeline"
        );

        let mut aggregator = self.aggregator()?;
        let mut written: u64 = 0;
        while let Some(candle) = aggregator.next_candle().await? {
            sink.write_candle(&candle).await?;
            written += 1;
        }
        sink.flush().await?;

        let agg_stats = aggregator.stats();
        let stats = PipelineStats {
            symbol: self.config.symbol.clone(),
            sources: self.sources.len(),
            candles_written: written,
            empty_candles: agg_stats.empty_candles,
            events_folded: agg_stats.events_folded,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(stats = %stats, "Candle pipeline finished");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AggTrade, Candle, MarketEvent, OpenInterestSample, SourceKind};
    use crate::core::errors::SourceError;
    use crate::layer1::replay::RecordedSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(concurrent: bool) -> CandleConfig {
        CandleConfig {
            start_time_ms: 0,
            end_time_ms: 600_000,
            concurrent_sources: concurrent,
            channel_capacity: 2,
            ..CandleConfig::default()
        }
    }

    fn sources() -> Vec<Arc<dyn PaginatedSource>> {
        let spot: Vec<MarketEvent> = (0..20)
            .map(|i| MarketEvent::SpotTrade(AggTrade::new(i, 100.0 + i as f64, 1.0, i * 30_000, i % 2 == 0)))
            .collect();
        let oi = vec![
            MarketEvent::OpenInterest(OpenInterestSample::new("BTCUSDT".to_string(), 1.0, 0.0, 0)),
            MarketEvent::OpenInterest(OpenInterestSample::new("BTCUSDT".to_string(), 2.0, 0.0, 300_000)),
        ];
        vec![
            Arc::new(RecordedSource::new(SourceKind::SpotTrades, "BTCUSDT", spot, 7)),
            Arc::new(RecordedSource::new(SourceKind::OpenInterest, "BTCUSDT", oi, 5)),
        ]
    }

    #[tokio::test]
    async fn test_run_into_memory_sink() {
        let pipeline = CandlePipeline::new(config(false), sources(), CancellationToken::new());
        let mut candles: Vec<Candle> = Vec::new();
        let stats = pipeline.run(&mut candles).await.unwrap();

        assert_eq!(stats.candles_written, 2);
        assert_eq!(stats.events_folded, 22);
        assert!(!stats.cancelled);
        assert_eq!(candles[0].spot.flow.trades, Some(10));
        assert_eq!(candles[1].spot.flow.trades, Some(10));
        assert_eq!(candles[1].open_interest, Some(2.0));
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let mut sequential: Vec<Candle> = Vec::new();
        CandlePipeline::new(config(false), sources(), CancellationToken::new())
            .run(&mut sequential)
            .await
            .unwrap();

        let mut concurrent: Vec<Candle> = Vec::new();
        CandlePipeline::new(config(true), sources(), CancellationToken::new())
            .run(&mut concurrent)
            .await
            .unwrap();

        assert_eq!(sequential, concurrent);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_dropped() {
        let mut cfg = config(false);
        cfg.sources = vec![SourceKind::OpenInterest];
        let pipeline = CandlePipeline::new(cfg, sources(), CancellationToken::new());

        let mut candles: Vec<Candle> = Vec::new();
        let stats = pipeline.run(&mut candles).await.unwrap();
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.events_folded, 2);
        assert!(candles.iter().all(|c| c.spot.flow.trades.is_none()));
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = CandlePipeline::new(config(true), sources(), cancel);

        let mut candles: Vec<Candle> = Vec::new();
        let stats = pipeline.run(&mut candles).await.unwrap();
        assert!(candles.is_empty());
        assert!(stats.cancelled);
    }

    /// Serves one in-window trade, then fails transiently on every later call
    struct StallingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PaginatedSource for StallingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::SpotTrades
        }

        async fn fetch(&self, _symbol: &str, _start_time: i64, _end_time: i64) -> Result<Vec<MarketEvent>, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![MarketEvent::SpotTrade(AggTrade::new(1, 100.0, 1.0, 1_000, false))])
            } else {
                Err(SourceError::Transient("HTTP 503".to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_window_discards_partial_candle() {
        let cancel = CancellationToken::new();
        let source = Arc::new(StallingSource { calls: AtomicU32::new(0) });
        let pipeline = CandlePipeline::new(config(false), vec![source.clone() as Arc<dyn PaginatedSource>], cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let mut candles: Vec<Candle> = Vec::new();
        let stats = pipeline.run(&mut candles).await.unwrap();
        canceller.await.unwrap();

        // the trade at 1_000 was folded, but its window never completed
        assert_eq!(stats.events_folded, 1);
        assert_eq!(stats.candles_written, 0);
        assert!(candles.is_empty());
        assert!(stats.cancelled);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
