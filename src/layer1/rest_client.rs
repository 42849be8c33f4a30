// REST Client for Binance public market data
// Rate-limited HTTP client; failures are classified, retrying is left to the loader

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use thiserror::Error;
use std::fmt;
use tracing::debug;

use crate::core::errors::SourceError;

/// Binance error code for an unknown symbol
const INVALID_SYMBOL_CODE: i64 = -1121;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Rate limited (status {0})")]
    RateLimited(u16),
    #[error("Server error (status {status}): {body}")]
    Server { status: u16, body: String },
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RestClientError> for SourceError {
    fn from(err: RestClientError) -> Self {
        match err {
            RestClientError::Http(e) if e.is_decode() => SourceError::Decode(e.to_string()),
            RestClientError::Http(e) => SourceError::Transient(e.to_string()),
            RestClientError::RateLimited(status) => {
                SourceError::Transient(format!("rate limited (status {})", status))
            }
            RestClientError::Server { status, body } => {
                SourceError::Transient(format!("server error {}: {}", status, body))
            }
            RestClientError::Api { code, message } if code == INVALID_SYMBOL_CODE => {
                SourceError::UnknownSymbol(message)
            }
            RestClientError::Api { code, message } => SourceError::Api { code, message },
            RestClientError::Status { status, body } => SourceError::Http { status, body },
            RestClientError::Json(e) => SourceError::Decode(e.to_string()),
        }
    }
}

/// Map a non-200 response to an error
fn classify_failure(status: StatusCode, body: &str) -> RestClientError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return RestClientError::RateLimited(status.as_u16());
    }
    if status.is_server_error() {
        return RestClientError::Server { status: status.as_u16(), body: body.to_string() };
    }

    if let Ok(data) = serde_json::from_str::<Value>(body) {
        if let Some(code) = data.get("code").and_then(|c| c.as_i64()) {
            let message = data
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return RestClientError::Api { code, message };
        }
    }

    RestClientError::Status { status: status.as_u16(), body: body.to_string() }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket rate limiter for API requests
/// Note: This struct is used behind Arc<Mutex<RateLimiter>>, so no internal lock needed.
pub struct RateLimiter {
    tokens: f64,
    pub max_tokens: f64,
    rate_per_sec: f64,
    last_update: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute as f64;
        Self {
            tokens: rpm,
            max_tokens: rpm,
            rate_per_sec: rpm / 60.0,
            last_update: now_secs(),
        }
    }

    /// Wait until a token is available (caller must hold the Mutex)
    pub async fn acquire(&mut self) {
        loop {
            self.add_tokens();

            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn add_tokens(&mut self) {
        let now = now_secs();
        let elapsed = now - self.last_update;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
        self.last_update = now;
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RestClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub success_rate: f64,
}

impl fmt::Display for RestClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RestClientStats(sent={}, ok={}, fail={}, rate={:.2}%)",
            self.requests_sent, self.requests_succeeded, self.requests_failed,
            self.success_rate * 100.0
        )
    }
}

#[derive(Debug, Default)]
struct RequestCounters {
    sent: u64,
    succeeded: u64,
    failed: u64,
}

// ============================================================================
// Binance REST Client
// ============================================================================

/// Which Binance API host an endpoint lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Spot,
    Futures,
}

/// REST API client for Binance public market data (spot and USD-M futures)
pub struct BinanceRestClient {
    spot_base_url: String,
    futures_base_url: String,
    api_key: String,

    client: Client,
    request_limiter: Arc<Mutex<RateLimiter>>,
    counters: Arc<Mutex<RequestCounters>>,
}

impl BinanceRestClient {
    pub fn new(
        spot_base_url: &str,
        futures_base_url: &str,
        api_key: &str,
        requests_per_minute: u32,
        timeout_seconds: u64,
    ) -> Result<Self, RestClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            spot_base_url: spot_base_url.trim_end_matches('/').to_string(),
            futures_base_url: futures_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            request_limiter: Arc::new(Mutex::new(RateLimiter::new(requests_per_minute))),
            counters: Arc::new(Mutex::new(RequestCounters::default())),
        })
    }

    pub fn from_config(config: &crate::core::BinanceConfig) -> Result<Self, RestClientError> {
        Self::new(
            &config.spot_base_url,
            &config.futures_base_url,
            &config.api_key,
            config.requests_per_minute,
            config.request_timeout_seconds as u64,
        )
    }

    fn url(&self, venue: Venue, endpoint: &str) -> String {
        let base = match venue {
            Venue::Spot => &self.spot_base_url,
            Venue::Futures => &self.futures_base_url,
        };
        format!("{}{}", base, endpoint)
    }

    /// Rate-limited public GET. One attempt; the caller decides about retries.
    pub async fn get(
        &self,
        venue: Venue,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Value, RestClientError> {
        self.request_limiter.lock().await.acquire().await;

        let url = self.url(venue, endpoint);
        self.counters.lock().await.sent += 1;

        let mut req = self.client.get(&url).query(params);
        if !self.api_key.is_empty() {
            req = req.header("X-MBX-APIKEY", &self.api_key);
        }

        let result: Result<Value, RestClientError> = async {
            let response = req.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if status != StatusCode::OK {
                return Err(classify_failure(status, &body));
            }
            Ok::<Value, RestClientError>(serde_json::from_str::<Value>(&body)?)
        }
        .await;

        let mut counters = self.counters.lock().await;
        match &result {
            Ok(_) => counters.succeeded += 1,
            Err(e) => {
                counters.failed += 1;
                debug!(endpoint = endpoint, error = %e, "Request failed");
            }
        }
        result
    }

    pub async fn get_stats(&self) -> RestClientStats {
        let counters = self.counters.lock().await;
        RestClientStats {
            requests_sent: counters.sent,
            requests_succeeded: counters.succeeded,
            requests_failed: counters.failed,
            success_rate: if counters.sent > 0 {
                counters.succeeded as f64 / counters.sent as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(1200);
        assert_eq!(limiter.max_tokens, 1200.0);
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire_consumes_token() {
        let mut limiter = RateLimiter::new(60);
        limiter.acquire().await;
        assert!(limiter.tokens < 60.0);
    }

    #[test]
    fn test_classify_rate_limit_is_transient() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(SourceError::from(err).is_transient());

        let err = classify_failure(StatusCode::from_u16(418).unwrap(), "banned");
        assert!(SourceError::from(err).is_transient());

        let err = classify_failure(StatusCode::BAD_GATEWAY, "<html>");
        assert!(SourceError::from(err).is_transient());
    }

    #[test]
    fn test_classify_invalid_symbol() {
        let err = classify_failure(StatusCode::BAD_REQUEST, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        match SourceError::from(err) {
            SourceError::UnknownSymbol(msg) => assert_eq!(msg, "Invalid symbol."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_other_api_error_is_fatal() {
        let err = classify_failure(StatusCode::BAD_REQUEST, r#"{"code":-1102,"msg":"Mandatory parameter missing."}"#);
        let source_err = SourceError::from(err);
        assert!(!source_err.is_transient());
        assert!(matches!(source_err, SourceError::Api { code: -1102, .. }));

        let err = classify_failure(StatusCode::FORBIDDEN, "nope");
        assert!(matches!(SourceError::from(err), SourceError::Http { status: 403, .. }));
    }

    #[test]
    fn test_url_building() {
        let client = BinanceRestClient::new("https://api.binance.com/", "https://fapi.binance.com", "", 1200, 10).unwrap();
        assert_eq!(client.url(Venue::Spot, "/api/v3/aggTrades"), "https://api.binance.com/api/v3/aggTrades");
        assert_eq!(client.url(Venue::Futures, "/fapi/v1/fundingRate"), "https://fapi.binance.com/fapi/v1/fundingRate");
    }

    #[test]
    fn test_client_creation_from_config() {
        let config = crate::core::BinanceConfig::default();
        assert!(BinanceRestClient::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let client = BinanceRestClient::new("https://api.binance.com", "https://fapi.binance.com", "", 1200, 10).unwrap();
        let stats = client.get_stats().await;
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.requests_failed, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
