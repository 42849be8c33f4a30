// Bucket Aggregator - walks fixed-width windows across every source cursor
// A candle is emitted only after each source has been drained up to the window end

use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::GapPolicy;
use crate::core::errors::AggregationError;
use crate::core::time::{bucket_floor, END_TOLERANCE_MS};
use crate::core::types::{Candle, SourceKind};
use crate::layer2::cursor::{EventStream, LookaheadCursor};
use super::accumulator::CandleFiller;

// ============================================================================
// Aggregator Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AggregatorStats {
    pub candles_emitted: u64,
    pub empty_candles: u64,
    pub events_folded: u64,
}

impl fmt::Display for AggregatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggregatorStats(candles={}, empty={}, events={})",
            self.candles_emitted, self.empty_candles, self.events_folded
        )
    }
}

/// One source lane: its kind and the cursor over its event stream
pub struct SourceLane {
    pub kind: SourceKind,
    pub cursor: LookaheadCursor<EventStream>,
}

impl SourceLane {
    pub fn new(kind: SourceKind, stream: EventStream) -> Self {
        Self {
            kind,
            cursor: LookaheadCursor::new(stream),
        }
    }
}

/// What draining one lane against the current window found
enum Drain {
    Contributed,
    Ahead,
    Exhausted,
}

// ============================================================================
// Bucket Aggregator
// ============================================================================

pub struct BucketAggregator {
    lanes: Vec<SourceLane>,
    symbol: String,
    end_time: i64,
    width_ms: i64,
    gap_policy: GapPolicy,
    cancel: CancellationToken,

    current_start: i64,
    finished: bool,

    stats: AggregatorStats,
}

impl BucketAggregator {
    /// Lanes are drained in ascending `SourceKind` order whatever order they are given in
    pub fn new(
        mut lanes: Vec<SourceLane>,
        symbol: &str,
        start_time: i64,
        end_time: i64,
        width_ms: i64,
        gap_policy: GapPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, AggregationError> {
        if width_ms <= 0 {
            return Err(AggregationError::IllegalState(format!("bucket width must be positive, got {}", width_ms)));
        }
        if end_time < start_time {
            return Err(AggregationError::IllegalState(format!(
                "end_time {} precedes start_time {}",
                end_time, start_time
            )));
        }
        lanes.sort_by_key(|lane| lane.kind);

        let current_start = bucket_floor(start_time, width_ms);
        info!(
            symbol = symbol,
            sources = lanes.len(),
            first_bucket = current_start,
            end_time,
            width_ms,
            "Starting aggregation"
        );

        Ok(Self {
            lanes,
            symbol: symbol.to_string(),
            end_time,
            width_ms,
            gap_policy,
            cancel,
            current_start,
            finished: false,
            stats: AggregatorStats::default(),
        })
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Start of the window the next call will work on
    pub fn current_bucket_start(&self) -> i64 {
        self.current_start
    }

    fn finish(&mut self, reason: &str) {
        if !self.finished {
            info!(symbol = %self.symbol, reason = reason, stats = %self.stats, "Aggregation finished");
            self.finished = true;
        }
    }

    /// Produce the next completed candle, or `None` once the range is covered,
    /// every source is exhausted, or the run was cancelled.
    pub async fn next_candle(&mut self) -> Result<Option<Candle>, AggregationError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                self.finish("cancelled");
                return Ok(None);
            }
            if self.current_start - self.end_time >= END_TOLERANCE_MS {
                self.finish("range covered");
                return Ok(None);
            }

            let window_start = self.current_start;
            let window_end = window_start + self.width_ms;
            let mut candle = Candle::new(window_start);
            let mut contributed = false;
            let mut all_exhausted = true;

            for i in 0..self.lanes.len() {
                match self.drain_lane(i, window_start, window_end, &mut candle).await? {
                    Drain::Contributed => {
                        contributed = true;
                        all_exhausted &= self.lanes[i].cursor.is_exhausted();
                    }
                    Drain::Ahead => all_exhausted = false,
                    Drain::Exhausted => {}
                }
            }

            // Loaders stop quietly on cancellation, so a drained lane may only mean we were interrupted
            if self.cancel.is_cancelled() {
                debug!(bucket = window_start, "Discarding partial candle after cancellation");
                self.finish("cancelled");
                return Ok(None);
            }

            if contributed {
                self.current_start = window_end;
                self.stats.candles_emitted += 1;
                debug!(bucket = window_start, candle = %candle, "Emitting candle");
                return Ok(Some(candle));
            }

            if all_exhausted {
                self.finish("sources exhausted");
                return Ok(None);
            }

            match self.gap_policy {
                GapPolicy::EmitEmpty => {
                    warn!(symbol = %self.symbol, bucket = window_start, "No data for window, emitting empty candle");
                    self.current_start = window_end;
                    self.stats.candles_emitted += 1;
                    self.stats.empty_candles += 1;
                    return Ok(Some(candle));
                }
                GapPolicy::Fail => {
                    self.finished = true;
                    return Err(AggregationError::DataGap { bucket_start: window_start });
                }
            }
        }
    }

    /// Commit and fold every event of lane `i` that falls in `[window_start, window_end)`
    async fn drain_lane(
        &mut self,
        i: usize,
        window_start: i64,
        window_end: i64,
        candle: &mut Candle,
    ) -> Result<Drain, AggregationError> {
        let lane = &mut self.lanes[i];
        let mut contributed = false;

        loop {
            let ts = match lane.cursor.peek().await? {
                Some(event) => event.timestamp(),
                None => {
                    return Ok(if contributed { Drain::Contributed } else { Drain::Exhausted });
                }
            };

            if ts < window_start {
                return Err(AggregationError::OutOfOrder {
                    source_kind: lane.kind.to_string(),
                    timestamp: ts,
                    bucket_start: window_start,
                });
            }
            if ts >= window_end {
                return Ok(if contributed { Drain::Contributed } else { Drain::Ahead });
            }

            let event = lane.cursor.commit()?;
            CandleFiller::fill(&event, candle);
            self.stats.events_folded += 1;
            contributed = true;
        }
    }

    /// Drain every remaining candle
    pub async fn collect(&mut self) -> Result<Vec<Candle>, AggregationError> {
        let mut candles = Vec::new();
        while let Some(candle) = self.next_candle().await? {
            candles.push(candle);
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AggTrade, FundingRateSample, MarketEvent, OpenInterestSample};
    use crate::layer2::cursor::IterStream;

    const W: i64 = 300_000;

    fn spot(id: i64, price: f64, qty: f64, ts: i64, maker: bool) -> MarketEvent {
        MarketEvent::SpotTrade(AggTrade::new(id, price, qty, ts, maker))
    }

    fn perp(id: i64, price: f64, ts: i64) -> MarketEvent {
        MarketEvent::FuturesTrade(AggTrade::new(id, price, 1.0, ts, false))
    }

    fn oi(value: f64, ts: i64) -> MarketEvent {
        MarketEvent::OpenInterest(OpenInterestSample::new("BTCUSDT".to_string(), value, 0.0, ts))
    }

    fn funding(rate: f64, ts: i64) -> MarketEvent {
        MarketEvent::FundingRate(FundingRateSample::new("BTCUSDT".to_string(), rate, None, ts))
    }

    fn lane(kind: SourceKind, events: Vec<MarketEvent>) -> SourceLane {
        SourceLane::new(kind, Box::new(IterStream::new(events.into_iter())))
    }

    fn aggregator(lanes: Vec<SourceLane>, start: i64, end: i64, policy: GapPolicy) -> BucketAggregator {
        BucketAggregator::new(lanes, "BTCUSDT", start, end, W, policy, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_single_window_scenario() {
        let lanes = vec![lane(
            SourceKind::SpotTrades,
            vec![
                spot(1, 10.0, 1.0, 1_000, false),
                spot(2, 12.0, 2.0, 2_000, true),
                spot(3, 11.0, 1.0, 200_999, false),
            ],
        )];
        let mut agg = aggregator(lanes, 0, 300_000, GapPolicy::EmitEmpty);
        let candles = agg.collect().await.unwrap();

        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.bucket_start, 0);
        assert_eq!(c.spot.open, Some(10.0));
        assert_eq!(c.spot.close, Some(11.0));
        assert_eq!(c.spot.high, Some(12.0));
        assert_eq!(c.spot.low, Some(10.0));
        assert_eq!(c.spot.flow.volume, Some(4.0));
        assert_eq!(c.spot.flow.buy_volume, Some(2.0));
        assert_eq!(c.spot.flow.sell_volume, Some(2.0));
        assert_eq!(agg.stats().events_folded, 3);
    }

    #[tokio::test]
    async fn test_buckets_are_contiguous_and_complete() {
        let lanes = vec![
            lane(SourceKind::FundingRate, vec![funding(0.0001, 0), funding(0.0002, 600_000)]),
            lane(
                SourceKind::SpotTrades,
                vec![spot(1, 1.0, 1.0, 10, false), spot(2, 2.0, 1.0, 299_999, false), spot(3, 3.0, 1.0, 300_000, false)],
            ),
            lane(SourceKind::PerpTrades, vec![perp(1, 5.0, 450_000), perp(2, 6.0, 899_999)]),
            lane(SourceKind::OpenInterest, vec![oi(10.0, 0), oi(11.0, 300_000), oi(12.0, 600_000)]),
        ];
        let mut agg = aggregator(lanes, 0, 899_999, GapPolicy::EmitEmpty);
        let candles = agg.collect().await.unwrap();

        let starts: Vec<i64> = candles.iter().map(|c| c.bucket_start).collect();
        assert_eq!(starts, vec![0, 300_000, 600_000]);

        assert_eq!(candles[0].spot.flow.trades, Some(2));
        assert_eq!(candles[0].spot.close, Some(2.0));
        assert_eq!(candles[0].perp.flow.trades, None);
        assert_eq!(candles[0].open_interest, Some(10.0));
        assert_eq!(candles[0].funding_rate, Some(0.0001));

        assert_eq!(candles[1].spot.open, Some(3.0));
        assert_eq!(candles[1].perp.open, Some(5.0));
        assert_eq!(candles[1].open_interest, Some(11.0));
        assert_eq!(candles[1].funding_rate, None);

        assert_eq!(candles[2].perp.close, Some(6.0));
        assert_eq!(candles[2].funding_rate, Some(0.0002));

        assert_eq!(agg.stats().events_folded, 10);
        assert_eq!(agg.next_candle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unaligned_start_floors_to_bucket() {
        let lanes = vec![lane(SourceKind::SpotTrades, vec![spot(1, 1.0, 1.0, 400_000, false)])];
        let mut agg = aggregator(lanes, 350_000, 500_000, GapPolicy::EmitEmpty);
        assert_eq!(agg.current_bucket_start(), 300_000);

        let candles = agg.collect().await.unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].bucket_start, 300_000);
    }

    #[tokio::test]
    async fn test_empty_sources_emit_nothing() {
        let lanes = vec![lane(SourceKind::SpotTrades, vec![]), lane(SourceKind::PerpTrades, vec![])];
        let mut agg = aggregator(lanes, 0, 3_000_000, GapPolicy::Fail);
        assert!(agg.collect().await.unwrap().is_empty());
        assert_eq!(agg.stats().candles_emitted, 0);
    }

    #[tokio::test]
    async fn test_gap_emits_empty_candle() {
        let lanes = vec![lane(
            SourceKind::SpotTrades,
            vec![spot(1, 1.0, 1.0, 1_000, false), spot(2, 2.0, 1.0, 700_000, false)],
        )];
        let mut agg = aggregator(lanes, 0, 900_000, GapPolicy::EmitEmpty);
        let candles = agg.collect().await.unwrap();

        assert_eq!(candles.iter().map(|c| c.bucket_start).collect::<Vec<_>>(), vec![0, 300_000, 600_000]);
        assert!(candles[1].is_empty());
        assert_eq!(candles[1].spot.close, None);
        assert_eq!(agg.stats().empty_candles, 1);
    }

    #[tokio::test]
    async fn test_gap_fails_under_fail_policy() {
        let lanes = vec![lane(
            SourceKind::SpotTrades,
            vec![spot(1, 1.0, 1.0, 1_000, false), spot(2, 2.0, 1.0, 700_000, false)],
        )];
        let mut agg = aggregator(lanes, 0, 900_000, GapPolicy::Fail);

        assert!(agg.next_candle().await.unwrap().is_some());
        let err = agg.next_candle().await.unwrap_err();
        assert!(matches!(err, AggregationError::DataGap { bucket_start: 300_000 }));
        assert_eq!(agg.next_candle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_out_of_order_is_an_error() {
        let lanes = vec![lane(
            SourceKind::PerpTrades,
            vec![perp(1, 1.0, 400_000), perp(2, 1.0, 100_000)],
        )];
        let mut agg = aggregator(lanes, 0, 900_000, GapPolicy::EmitEmpty);

        // first window is a gap, second takes the 400_000 trade
        assert!(agg.next_candle().await.unwrap().unwrap().is_empty());
        let err = agg.next_candle().await.unwrap_err();
        match err {
            AggregationError::OutOfOrder { source_kind, timestamp, bucket_start } => {
                assert_eq!(source_kind, "perp_trades");
                assert_eq!(timestamp, 100_000);
                assert_eq!(bucket_start, 300_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_time_is_inclusive() {
        let lanes = vec![lane(
            SourceKind::SpotTrades,
            vec![spot(1, 1.0, 1.0, 0, false), spot(2, 2.0, 1.0, 300_000, false)],
        )];
        let mut agg = aggregator(lanes, 0, 300_000, GapPolicy::EmitEmpty);
        let candles = agg.collect().await.unwrap();
        assert_eq!(candles.iter().map(|c| c.bucket_start).collect::<Vec<_>>(), vec![0, 300_000]);
    }

    #[tokio::test]
    async fn test_cancel_stops_emission() {
        let cancel = CancellationToken::new();
        let lanes = vec![lane(
            SourceKind::SpotTrades,
            vec![spot(1, 1.0, 1.0, 0, false), spot(2, 2.0, 1.0, 300_000, false)],
        )];
        let mut agg = BucketAggregator::new(lanes, "BTCUSDT", 0, 600_000, W, GapPolicy::EmitEmpty, cancel.clone()).unwrap();

        assert!(agg.next_candle().await.unwrap().is_some());
        cancel.cancel();
        assert_eq!(agg.next_candle().await.unwrap(), None);
        assert_eq!(agg.stats().candles_emitted, 1);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let err = BucketAggregator::new(vec![], "BTCUSDT", 0, 1, 0, GapPolicy::EmitEmpty, CancellationToken::new());
        assert!(matches!(err, Err(AggregationError::IllegalState(_))));

        let err = BucketAggregator::new(vec![], "BTCUSDT", 10, 1, W, GapPolicy::EmitEmpty, CancellationToken::new());
        assert!(matches!(err, Err(AggregationError::IllegalState(_))));
    }
}
