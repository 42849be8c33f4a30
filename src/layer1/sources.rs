// Paginated Sources - one page of ordered market events per request
// Binance spot/futures aggregate trades, open interest history, funding rate history

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::core::config::BinanceConfig;
use crate::core::errors::SourceError;
use crate::core::types::{AggTrade, FundingRateSample, MarketEvent, OpenInterestSample, SourceKind};
use super::rest_client::{BinanceRestClient, Venue};

// ============================================================================
// Source Trait
// ============================================================================

/// An upstream that serves events page by page.
///
/// Contract: a page starts at `start_time` inclusive, is non-decreasing by
/// timestamp, and may end before `end_time` when the page limit is hit.
/// Retryable failures must be reported as `SourceError::Transient`.
#[async_trait]
pub trait PaginatedSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<MarketEvent>, SourceError>;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "a")]
    agg_trade_id: i64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "f", default)]
    first_trade_id: i64,
    #[serde(rename = "l", default)]
    last_trade_id: i64,
    #[serde(rename = "T")]
    timestamp: i64,
    #[serde(rename = "m", default)]
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    symbol: String,
    sum_open_interest: String,
    sum_open_interest_value: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFundingRate {
    symbol: String,
    funding_rate: String,
    #[serde(default)]
    mark_price: String,
    funding_time: i64,
}

/// Parse a string field as f64, returning SourceError on failure
fn parse_f64_field(value: &str, field_name: &str) -> Result<f64, SourceError> {
    value
        .parse::<f64>()
        .map_err(|_| SourceError::Decode(format!("Invalid {}: '{}'", field_name, value)))
}

fn parse_agg_trades(data: Value, perp: bool) -> Result<Vec<MarketEvent>, SourceError> {
    let raw: Vec<RawAggTrade> =
        serde_json::from_value(data).map_err(|e| SourceError::Decode(e.to_string()))?;

    raw.into_iter()
        .map(|r| {
            let trade = AggTrade {
                agg_trade_id: r.agg_trade_id,
                price: parse_f64_field(&r.price, "price")?,
                quantity: parse_f64_field(&r.quantity, "quantity")?,
                first_trade_id: r.first_trade_id,
                last_trade_id: r.last_trade_id,
                timestamp: r.timestamp,
                is_buyer_maker: r.is_buyer_maker,
            };
            Ok(if perp {
                MarketEvent::FuturesTrade(trade)
            } else {
                MarketEvent::SpotTrade(trade)
            })
        })
        .collect()
}

fn parse_open_interest(data: Value) -> Result<Vec<MarketEvent>, SourceError> {
    let raw: Vec<RawOpenInterest> =
        serde_json::from_value(data).map_err(|e| SourceError::Decode(e.to_string()))?;

    raw.into_iter()
        .map(|r| {
            Ok(MarketEvent::OpenInterest(OpenInterestSample::new(
                r.symbol,
                parse_f64_field(&r.sum_open_interest, "sumOpenInterest")?,
                parse_f64_field(&r.sum_open_interest_value, "sumOpenInterestValue")?,
                r.timestamp,
            )))
        })
        .collect()
}

fn parse_funding_rates(data: Value) -> Result<Vec<MarketEvent>, SourceError> {
    let raw: Vec<RawFundingRate> =
        serde_json::from_value(data).map_err(|e| SourceError::Decode(e.to_string()))?;

    raw.into_iter()
        .map(|r| {
            // markPrice is an empty string for old funding events
            let mark_price = if r.mark_price.is_empty() {
                None
            } else {
                Some(parse_f64_field(&r.mark_price, "markPrice")?)
            };
            Ok(MarketEvent::FundingRate(FundingRateSample::new(
                r.symbol,
                parse_f64_field(&r.funding_rate, "fundingRate")?,
                mark_price,
                r.funding_time,
            )))
        })
        .collect()
}

// ============================================================================
// Binance Source
// ============================================================================

/// `PaginatedSource` backed by one Binance public endpoint
pub struct BinanceSource {
    client: Arc<BinanceRestClient>,
    kind: SourceKind,
    limit: u32,
    open_interest_period: String,
}

impl BinanceSource {
    pub fn new(client: Arc<BinanceRestClient>, kind: SourceKind, config: &BinanceConfig) -> Self {
        let limit = match kind {
            SourceKind::SpotTrades | SourceKind::PerpTrades => config.agg_trades_limit,
            SourceKind::OpenInterest => config.open_interest_limit,
            SourceKind::FundingRate => config.funding_rate_limit,
        };
        Self {
            client,
            kind,
            limit,
            open_interest_period: config.open_interest_period.clone(),
        }
    }

    /// One source per kind, sharing the client and its rate limiter
    pub fn all(client: Arc<BinanceRestClient>, kinds: &[SourceKind], config: &BinanceConfig) -> Vec<Arc<dyn PaginatedSource>> {
        kinds
            .iter()
            .map(|kind| Arc::new(Self::new(client.clone(), *kind, config)) as Arc<dyn PaginatedSource>)
            .collect()
    }

    fn request_params(&self, symbol: &str, start_time: i64, end_time: i64) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("startTime", start_time.to_string()),
            ("limit", self.limit.to_string()),
        ];
        match self.kind {
            // aggTrades rejects ranges longer than one hour; the loader stops at end_time instead
            SourceKind::SpotTrades | SourceKind::PerpTrades => {}
            SourceKind::OpenInterest => {
                params.push(("period", self.open_interest_period.clone()));
                params.push(("endTime", end_time.to_string()));
            }
            SourceKind::FundingRate => {
                params.push(("endTime", end_time.to_string()));
            }
        }
        params
    }
}

#[async_trait]
impl PaginatedSource for BinanceSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<MarketEvent>, SourceError> {
        let (venue, endpoint) = match self.kind {
            SourceKind::SpotTrades => (Venue::Spot, "/api/v3/aggTrades"),
            SourceKind::PerpTrades => (Venue::Futures, "/fapi/v1/aggTrades"),
            SourceKind::OpenInterest => (Venue::Futures, "/futures/data/openInterestHist"),
            SourceKind::FundingRate => (Venue::Futures, "/fapi/v1/fundingRate"),
        };

        let params = self.request_params(symbol, start_time, end_time);
        let data = self.client.get(venue, endpoint, &params).await?;

        let events = match self.kind {
            SourceKind::SpotTrades => parse_agg_trades(data, false)?,
            SourceKind::PerpTrades => parse_agg_trades(data, true)?,
            SourceKind::OpenInterest => parse_open_interest(data)?,
            SourceKind::FundingRate => parse_funding_rates(data)?,
        };

        debug!(
            source = %self.kind,
            symbol = symbol,
            start_time = start_time,
            events = events.len(),
            "Fetched page"
        );
        Ok(events)
    }
}
