// Layer 1 - Data Sources
// Paginated upstreams: Binance REST endpoints and recorded event files

pub mod rest_client;
pub mod sources;
pub mod replay;

// Re-export commonly used items for convenience
pub use rest_client::{BinanceRestClient, RestClientError, RestClientStats, RateLimiter, Venue};
pub use sources::{PaginatedSource, BinanceSource};
pub use replay::{RecordedSource, decode_event};
