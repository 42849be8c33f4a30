// Core Type Definitions for the Candle Join Engine
// Market events produced by the sources and the candle records built from them

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// Which upstream stream an event came from.
///
/// The declaration order is the fixed order in which the aggregator drains
/// sources for every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SpotTrades,
    PerpTrades,
    OpenInterest,
    FundingRate,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::SpotTrades,
        SourceKind::PerpTrades,
        SourceKind::OpenInterest,
        SourceKind::FundingRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::SpotTrades => "spot_trades",
            SourceKind::PerpTrades => "perp_trades",
            SourceKind::OpenInterest => "open_interest",
            SourceKind::FundingRate => "funding_rate",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot_trades" | "spot" => Ok(SourceKind::SpotTrades),
            "perp_trades" | "perp" => Ok(SourceKind::PerpTrades),
            "open_interest" => Ok(SourceKind::OpenInterest),
            "funding_rate" => Ok(SourceKind::FundingRate),
            _ => Err(format!("Invalid SourceKind: '{}'", s)),
        }
    }
}

/// Market leg a trade was executed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketLeg {
    Spot,
    Perp,
}

impl fmt::Display for MarketLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketLeg::Spot => write!(f, "spot"),
            MarketLeg::Perp => write!(f, "perp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

// ============================================================================
// AggTrade
// ============================================================================

/// Aggregate trade as returned by the exchange trade endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggTrade {
    pub agg_trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    pub first_trade_id: i64,
    pub last_trade_id: i64,
    pub timestamp: i64, // milliseconds
    pub is_buyer_maker: bool,
}

impl AggTrade {
    pub fn new(
        agg_trade_id: i64,
        price: f64,
        quantity: f64,
        timestamp: i64,
        is_buyer_maker: bool,
    ) -> Self {
        Self {
            agg_trade_id,
            price,
            quantity,
            first_trade_id: agg_trade_id,
            last_trade_id: agg_trade_id,
            timestamp,
            is_buyer_maker,
        }
    }

    /// Aggressor side. A resting buyer means the taker sold.
    pub fn side(&self) -> TradeSide {
        if self.is_buyer_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }
}

impl fmt::Display for AggTrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggTrade(id={}, price={:.2}, qty={:.4}, side={}, ts={})",
            self.agg_trade_id, self.price, self.quantity, self.side(), self.timestamp
        )
    }
}

// ============================================================================
// OpenInterestSample
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestSample {
    pub symbol: String,
    pub total_open_interest: f64,
    pub total_open_interest_value: f64,
    pub timestamp: i64,
}

impl OpenInterestSample {
    pub fn new(symbol: String, total_open_interest: f64, total_open_interest_value: f64, timestamp: i64) -> Self {
        Self {
            symbol,
            total_open_interest,
            total_open_interest_value,
            timestamp,
        }
    }
}

impl fmt::Display for OpenInterestSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OpenInterest(symbol={}, oi={:.4}, ts={})",
            self.symbol, self.total_open_interest, self.timestamp
        )
    }
}

// ============================================================================
// FundingRateSample
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRateSample {
    pub symbol: String,
    pub rate: f64,
    #[serde(default)]
    pub mark_price: Option<f64>,
    pub timestamp: i64,
}

impl FundingRateSample {
    pub fn new(symbol: String, rate: f64, mark_price: Option<f64>, timestamp: i64) -> Self {
        Self {
            symbol,
            rate,
            mark_price,
            timestamp,
        }
    }
}

impl fmt::Display for FundingRateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FundingRate(symbol={}, rate={:.6}, ts={})",
            self.symbol, self.rate, self.timestamp
        )
    }
}

// ============================================================================
// MarketEvent
// ============================================================================

/// Every event a source can produce. `timestamp()` is the only ordering and
/// bucketing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketEvent {
    SpotTrade(AggTrade),
    FuturesTrade(AggTrade),
    OpenInterest(OpenInterestSample),
    FundingRate(FundingRateSample),
}

impl MarketEvent {
    /// Tags accepted in the `kind` field of a serialized event
    pub const KINDS: [&'static str; 4] = ["spot_trade", "futures_trade", "open_interest", "funding_rate"];

    pub fn timestamp(&self) -> i64 {
        match self {
            MarketEvent::SpotTrade(t) | MarketEvent::FuturesTrade(t) => t.timestamp,
            MarketEvent::OpenInterest(s) => s.timestamp,
            MarketEvent::FundingRate(s) => s.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::SpotTrade(_) => "spot_trade",
            MarketEvent::FuturesTrade(_) => "futures_trade",
            MarketEvent::OpenInterest(_) => "open_interest",
            MarketEvent::FundingRate(_) => "funding_rate",
        }
    }
}

impl fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketEvent::SpotTrade(t) => write!(f, "Spot{}", t),
            MarketEvent::FuturesTrade(t) => write!(f, "Perp{}", t),
            MarketEvent::OpenInterest(s) => write!(f, "{}", s),
            MarketEvent::FundingRate(s) => write!(f, "{}", s),
        }
    }
}

// ============================================================================
// Candle
// ============================================================================

/// Trade statistics of one market leg inside a candle.
/// `None` means no trade of this leg reached the candle yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegStats {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub open_timestamp: Option<i64>,
    pub close_timestamp: Option<i64>,
    pub flow: FlowStats,
}

/// Volume and trade-count split by aggressor side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub volume: Option<f64>,
    pub buy_volume: Option<f64>,
    pub sell_volume: Option<f64>,
    pub trades: Option<u64>,
    pub buy_trades: Option<u64>,
    pub sell_trades: Option<u64>,
}

/// One fixed-width bucket of merged market data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start: i64,
    pub open_timestamp: Option<i64>,
    pub close_timestamp: Option<i64>,
    pub spot: LegStats,
    pub perp: LegStats,
    pub total: FlowStats,
    pub open_interest: Option<f64>,
    pub funding_rate: Option<f64>,
}

impl Candle {
    pub fn new(bucket_start: i64) -> Self {
        Self {
            bucket_start,
            open_timestamp: None,
            close_timestamp: None,
            spot: LegStats::default(),
            perp: LegStats::default(),
            total: FlowStats::default(),
            open_interest: None,
            funding_rate: None,
        }
    }

    pub fn leg(&self, leg: MarketLeg) -> &LegStats {
        match leg {
            MarketLeg::Spot => &self.spot,
            MarketLeg::Perp => &self.perp,
        }
    }

    pub fn leg_mut(&mut self, leg: MarketLeg) -> &mut LegStats {
        match leg {
            MarketLeg::Spot => &mut self.spot,
            MarketLeg::Perp => &mut self.perp,
        }
    }

    /// True when no event contributed to this candle
    pub fn is_empty(&self) -> bool {
        self.total.trades.is_none() && self.open_interest.is_none() && self.funding_rate.is_none()
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle(start={}, spot_close={:?}, perp_close={:?}, trades={:?}, oi={:?}, funding={:?})",
            self.bucket_start,
            self.spot.close,
            self.perp.close,
            self.total.trades,
            self.open_interest,
            self.funding_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_side() {
        let trade = AggTrade::new(1, 50000.0, 1.5, 1_000, true);
        assert_eq!(trade.side(), TradeSide::Sell);

        let trade = AggTrade::new(2, 50000.0, 1.5, 1_000, false);
        assert_eq!(trade.side(), TradeSide::Buy);
    }

    #[test]
    fn test_event_timestamp_and_kind() {
        let oi = MarketEvent::OpenInterest(OpenInterestSample::new("BTCUSDT".to_string(), 10.0, 500.0, 42));
        assert_eq!(oi.timestamp(), 42);
        assert_eq!(oi.kind(), "open_interest");

        let perp = MarketEvent::FuturesTrade(AggTrade::new(7, 1.0, 1.0, 99, false));
        assert_eq!(perp.timestamp(), 99);
        assert_eq!(perp.kind(), "futures_trade");
    }

    #[test]
    fn test_event_serde_tag() {
        let event = MarketEvent::FundingRate(FundingRateSample::new("BTCUSDT".to_string(), 0.0001, None, 5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "funding_rate");

        let back: MarketEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_new_candle_is_empty() {
        let candle = Candle::new(300_000);
        assert!(candle.is_empty());
        assert_eq!(candle.spot, LegStats::default());
        assert_eq!(candle.leg(MarketLeg::Perp).open, None);
    }

    #[test]
    fn test_source_kind_order_and_parse() {
        use std::str::FromStr;

        let mut kinds = vec![SourceKind::FundingRate, SourceKind::SpotTrades, SourceKind::OpenInterest, SourceKind::PerpTrades];
        kinds.sort();
        assert_eq!(kinds, SourceKind::ALL.to_vec());

        assert_eq!(SourceKind::from_str("spot").unwrap(), SourceKind::SpotTrades);
        assert_eq!(SourceKind::from_str("FUNDING_RATE").unwrap(), SourceKind::FundingRate);
        assert!(SourceKind::from_str("liquidations").is_err());
    }
}
