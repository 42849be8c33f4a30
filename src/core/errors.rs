// Error taxonomy shared by the loader, cursor and aggregator layers

use thiserror::Error;

// ============================================================================
// Source Errors
// ============================================================================

/// Failure reported by a paginated source.
///
/// Only `Transient` is retried by the loader. Every other variant terminates
/// the run and reaches the caller unmodified.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Transient upstream error: {0}")]
    Transient(String),
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("HTTP status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

// ============================================================================
// Aggregation Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum AggregationError {
    /// Programmer error, e.g. commit without a pending peek
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),
    #[error("Out of order event from {source_kind}: timestamp {timestamp} precedes bucket {bucket_start}")]
    OutOfOrder {
        source_kind: String,
        timestamp: i64,
        bucket_start: i64,
    },
    #[error("No source contributed to bucket {bucket_start}")]
    DataGap { bucket_start: i64 },
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
