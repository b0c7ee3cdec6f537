//! Infrastructure layer for HTTP, caching, pacing and output
//!
//! The fetch client composes the rate limiter, response cache and retry
//! policy; the CSV sink and asset downloader handle what gets written.

pub mod asset_downloader;
pub mod config; // Layered configuration and defaults
pub mod csv_sink;
pub mod fetch_client;
pub mod fetch_error;
pub mod logging;
pub mod rate_limiter;
pub mod response_cache;
pub mod retry_policy;

// Re-export commonly used items
pub use asset_downloader::{AssetDownloader, AssetError, AssetOutcome};
pub use config::{AppConfig, ConfigError, LoggingConfig};
pub use csv_sink::{CsvSink, CsvSinkOptions, SinkError};
pub use fetch_client::{
    FetchRequest, HttpClientConfig, HttpFetchClient, PageCache, PageFetcher, ParsedPage, RawResponse,
};
pub use fetch_error::{FailureKind, FetchError};
pub use logging::init_logging;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use response_cache::{CacheStats, ResponseCache};
pub use retry_policy::{RetryPolicy, parse_retry_after};
