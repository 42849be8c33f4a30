// Candle Filler - folds one market event into a candle's running aggregates
// Every field starts unset; an unset field is the identity for its fold

use tracing::trace;

use crate::core::types::{AggTrade, Candle, FlowStats, MarketEvent, MarketLeg, TradeSide};

// ============================================================================
// Option folds
// ============================================================================

fn add(acc: Option<f64>, value: f64) -> Option<f64> {
    Some(acc.unwrap_or(0.0) + value)
}

fn incr(acc: Option<u64>) -> Option<u64> {
    Some(acc.unwrap_or(0) + 1)
}

fn max_f64(acc: Option<f64>, value: f64) -> Option<f64> {
    Some(acc.map_or(value, |a| a.max(value)))
}

fn min_f64(acc: Option<f64>, value: f64) -> Option<f64> {
    Some(acc.map_or(value, |a| a.min(value)))
}

fn earliest(acc: Option<i64>, ts: i64) -> Option<i64> {
    Some(acc.map_or(ts, |a| a.min(ts)))
}

fn latest(acc: Option<i64>, ts: i64) -> Option<i64> {
    Some(acc.map_or(ts, |a| a.max(ts)))
}

impl FlowStats {
    fn record(&mut self, quantity: f64, side: TradeSide) {
        self.volume = add(self.volume, quantity);
        self.trades = incr(self.trades);
        match side {
            TradeSide::Buy => {
                self.buy_volume = add(self.buy_volume, quantity);
                self.buy_trades = incr(self.buy_trades);
            }
            TradeSide::Sell => {
                self.sell_volume = add(self.sell_volume, quantity);
                self.sell_trades = incr(self.sell_trades);
            }
        }
    }
}

// ============================================================================
// Candle Filler
// ============================================================================

/// Stateless fold from events into a candle
pub struct CandleFiller;

impl CandleFiller {
    /// Apply one event. The event is assumed to belong to `candle`'s bucket;
    /// the aggregator guarantees that before calling.
    pub fn fill(event: &MarketEvent, candle: &mut Candle) {
        match event {
            MarketEvent::SpotTrade(trade) => Self::fill_trade(trade, MarketLeg::Spot, candle),
            MarketEvent::FuturesTrade(trade) => Self::fill_trade(trade, MarketLeg::Perp, candle),
            MarketEvent::OpenInterest(sample) => {
                candle.open_interest = Some(sample.total_open_interest);
            }
            MarketEvent::FundingRate(sample) => {
                candle.funding_rate = Some(sample.rate);
            }
        }
        trace!(bucket = candle.bucket_start, event = %event, "Folded event");
    }

    fn fill_trade(trade: &AggTrade, leg: MarketLeg, candle: &mut Candle) {
        let ts = trade.timestamp;
        let side = trade.side();

        candle.open_timestamp = earliest(candle.open_timestamp, ts);
        candle.close_timestamp = latest(candle.close_timestamp, ts);
        candle.total.record(trade.quantity, side);

        let stats = candle.leg_mut(leg);
        stats.high = max_f64(stats.high, trade.price);
        stats.low = min_f64(stats.low, trade.price);

        // Ties on the timestamp overwrite, so the later event in stream order wins
        stats.open_timestamp = earliest(stats.open_timestamp, ts);
        if stats.open_timestamp == Some(ts) {
            stats.open = Some(trade.price);
        }
        stats.close_timestamp = latest(stats.close_timestamp, ts);
        if stats.close_timestamp == Some(ts) {
            stats.close = Some(trade.price);
        }

        stats.flow.record(trade.quantity, side);
    }

    /// Fold a batch in order
    pub fn fill_all<'a, I>(events: I, candle: &mut Candle)
    where
        I: IntoIterator<Item = &'a MarketEvent>,
    {
        for event in events {
            Self::fill(event, candle);
        }
    }
}
