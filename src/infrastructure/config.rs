//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional file (TOML or JSON), then `SCRAPE_PIPELINE__*` environment
//! variables.

#![allow(clippy::derivable_impls)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::infrastructure::csv_sink::CsvSinkOptions;
use crate::infrastructure::fetch_client::HttpClientConfig;
use crate::infrastructure::rate_limiter::RateLimiterConfig;
use crate::infrastructure::retry_policy::RetryPolicy;

pub const ENV_PREFIX: &str = "SCRAPE_PIPELINE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Default values shared by the config structs
pub mod defaults {
    pub const USER_AGENT: &str = "scrape-pipeline/0.1 (+respectful crawler)";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 15;
    /// 0 disables the hard ceiling; the adaptive delay still applies
    pub const MAX_REQUESTS_PER_SECOND: u32 = 0;

    pub const BASE_DELAY_MS: u64 = 2_000;
    pub const MAX_DELAY_MS: u64 = 60_000;
    pub const SUCCESS_THRESHOLD: u32 = 10;
    pub const DECAY_FACTOR: f64 = 0.9;
    pub const RETRY_AFTER_MARGIN_MS: u64 = 1_000;
    pub const ABSOLUTE_MAX_DELAY_SECONDS: u64 = 300;

    pub const MAX_ATTEMPTS: u32 = 4;
    pub const RETRY_BASE_DELAY_MS: u64 = 5_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 120_000;

    pub const CACHE_MAX_ENTRIES: usize = 10_000;

    pub const MAX_WORKERS: usize = 6;
    pub const BATCH_SIZE: usize = 25;
    pub const PROGRESS_EVERY: usize = 10;
    pub const MAX_LISTING_PAGES: u32 = 500;

    pub const CSV_PATH: &str = "output.csv";
    pub const WRITE_BOM: bool = true;
    pub const ASSET_DIR: &str = "images";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_DIR: &str = "logs";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub batch: BatchSettings,
    pub output: OutputSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub success_threshold: u32,
    pub decay_factor: f64,
    pub retry_after_margin_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// 0 means unbounded
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_workers: usize,
    /// Items per flush to the sink
    pub batch_size: usize,
    /// Log progress every N completed items
    pub progress_every: usize,
    /// Upper bound on pages fetched for one paginated listing
    pub max_listing_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub csv_path: PathBuf,
    pub write_bom: bool,
    pub asset_dir: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            follow_redirects: true,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            success_threshold: defaults::SUCCESS_THRESHOLD,
            decay_factor: defaults::DECAY_FACTOR,
            retry_after_margin_ms: defaults::RETRY_AFTER_MARGIN_MS,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: defaults::CACHE_MAX_ENTRIES,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
            batch_size: defaults::BATCH_SIZE,
            progress_every: defaults::PROGRESS_EVERY,
            max_listing_pages: defaults::MAX_LISTING_PAGES,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from(defaults::CSV_PATH),
            write_bom: defaults::WRITE_BOM,
            asset_dir: PathBuf::from(defaults::ASSET_DIR),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from(defaults::LOG_DIR),
        }
    }
}

impl AppConfig {
    /// Load defaults ← optional file ← environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
            info!("Loading configuration from {}", path.display());
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `<user config dir>/scrape-pipeline/config.toml`, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scrape-pipeline").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.http.timeout_seconds == 0 {
            return fail("http.timeout_seconds must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be greater than 0");
        }
        if self.batch.max_workers == 0 {
            return fail("batch.max_workers must be greater than 0");
        }
        if self.batch.batch_size == 0 {
            return fail("batch.batch_size must be greater than 0");
        }
        if self.batch.max_listing_pages == 0 {
            return fail("batch.max_listing_pages must be greater than 0");
        }
        if self.rate_limit.base_delay_ms > self.rate_limit.max_delay_ms {
            return fail("rate_limit.base_delay_ms cannot exceed rate_limit.max_delay_ms");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return fail("retry.base_delay_ms cannot exceed retry.max_delay_ms");
        }
        if !(self.rate_limit.decay_factor > 0.0 && self.rate_limit.decay_factor < 1.0) {
            return fail("rate_limit.decay_factor must be in (0, 1)");
        }
        if self.rate_limit.success_threshold == 0 {
            return fail("rate_limit.success_threshold must be greater than 0");
        }
        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: self.http.user_agent.clone(),
            timeout: Duration::from_secs(self.http.timeout_seconds),
            max_requests_per_second: self.http.max_requests_per_second,
            follow_redirects: self.http.follow_redirects,
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.rate_limit.base_delay_ms),
            max_delay: Duration::from_millis(self.rate_limit.max_delay_ms),
            success_threshold: self.rate_limit.success_threshold,
            decay_factor: self.rate_limit.decay_factor,
            retry_after_margin: Duration::from_millis(self.rate_limit.retry_after_margin_ms),
            absolute_max_delay: Duration::from_secs(defaults::ABSOLUTE_MAX_DELAY_SECONDS),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            absolute_max_delay: Duration::from_secs(defaults::ABSOLUTE_MAX_DELAY_SECONDS),
            ..RetryPolicy::default()
        }
    }

    pub fn cache_limit(&self) -> Option<usize> {
        (self.cache.max_entries > 0).then_some(self.cache.max_entries)
    }

    pub fn sink_options(&self) -> CsvSinkOptions {
        CsvSinkOptions {
            write_bom: self.output.write_bom,
        }
    }
}
