//! HTTP fetch client with caching, adaptive rate limiting and retries
//!
//! Provides the single entry point scrapers use to turn a URL into a parsed
//! page. A fetch goes through, in order:
//! 1. the response cache (hits skip everything below),
//! 2. the shared adaptive [`RateLimiter`] and the optional hard
//!    requests-per-second ceiling,
//! 3. up to `max_attempts` HTTP GETs governed by the [`RetryPolicy`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::Html;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::RequestKey;
use crate::infrastructure::fetch_error::FetchError;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::response_cache::ResponseCache;
use crate::infrastructure::retry_policy::{RetryPolicy, parse_retry_after};

/// Cache of parsed pages shared by a session
pub type PageCache = ResponseCache<Arc<ParsedPage>>;

/// HTTP client configuration for crawling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Hard ceiling on top of the adaptive delay; 0 disables it
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "scrape-pipeline/0.1 (+respectful crawler)".to_string(),
            timeout: Duration::from_secs(15),
            max_requests_per_second: 0,
            follow_redirects: true,
        }
    }
}

/// A fetched response body together with its structured form
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    body: String,
    json: Option<serde_json::Value>,
}

impl ParsedPage {
    /// Build a page from a response body.
    ///
    /// JSON bodies (by content type) are parsed eagerly so malformed API
    /// responses fail here rather than inside an extractor.
    pub fn from_body(
        url: impl Into<String>,
        final_url: impl Into<String>,
        status: u16,
        content_type: Option<String>,
        body: String,
    ) -> Result<Self, FetchError> {
        let url = url.into();
        let is_json = content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        let json = if is_json {
            Some(
                serde_json::from_str(&body).map_err(|e| FetchError::Parse {
                    url: url.clone(),
                    message: e.to_string(),
                })?,
            )
        } else {
            None
        };
        Ok(Self {
            url,
            final_url: final_url.into(),
            status,
            content_type,
            body,
            json,
        })
    }

    /// Convenience for extractor tests and fixtures
    pub fn html_fixture(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
            json: None,
        }
    }

    /// Parse the body as an HTML document
    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    pub fn text(&self) -> &str {
        &self.body
    }
}

/// One fetch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Live pages (e.g. final product detail) set this to false
    pub use_cache: bool,
    /// Overrides the policy's attempt budget; `Some(1)` disables retries
    pub max_attempts: Option<u32>,
    /// Overrides the policy's backoff unit
    pub base_delay: Option<Duration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            use_cache: true,
            max_attempts: None,
            base_delay: None,
        }
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn without_retries(self) -> Self {
        self.max_attempts(1)
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }
}

impl From<&str> for FetchRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Transport-agnostic fetch contract.
///
/// The reqwest client below is the production implementation; a
/// browser-driven transport plugs in behind the same trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<Arc<ParsedPage>, FetchError>;
}

/// Raw bytes of a successful response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

enum AttemptFailure {
    Timeout,
    Connection(String),
    Server(u16),
    Throttled(Option<Duration>),
    Fatal(FetchError),
}

/// Counters for progress reporting
#[derive(Debug, Default)]
struct FetchCounters {
    requests_sent: AtomicU64,
    retries: AtomicU64,
}

pub struct HttpFetchClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    cache: Arc<PageCache>,
    policy: RetryPolicy,
    ceiling: Option<DefaultDirectRateLimiter>,
    cancel: CancellationToken,
    counters: FetchCounters,
}

impl HttpFetchClient {
    pub fn new(
        config: &HttpClientConfig,
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
        cache: Arc<PageCache>,
        cancel: CancellationToken,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| FetchError::Client(format!("Invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| FetchError::Client(format!("Failed to create HTTP client: {e}")))?;

        let ceiling = NonZeroU32::new(config.max_requests_per_second)
            .map(|rps| DefaultDirectRateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            limiter,
            cache,
            policy,
            ceiling,
            cancel,
            counters: FetchCounters::default(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// HTTP requests actually put on the wire (cache hits excluded)
    pub fn requests_sent(&self) -> u64 {
        self.counters.requests_sent.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.counters.retries.load(Ordering::Relaxed)
    }

    /// Fetch a page, consulting the cache when the request allows it
    pub async fn fetch_page(&self, request: FetchRequest) -> Result<Arc<ParsedPage>, FetchError> {
        let key = RequestKey::for_url(&request.url);
        if request.use_cache {
            if let Some(hit) = self.cache.get(&key) {
                debug!("Cache hit: {}", request.url);
                return Ok(hit);
            }
        }

        let raw = self
            .execute(&request.url, request.max_attempts, request.base_delay)
            .await?;
        let content_type = raw.content_type.clone();
        let body = decode_body(content_type.as_deref(), &raw.body);
        let page = Arc::new(ParsedPage::from_body(
            request.url.clone(),
            raw.final_url,
            raw.status,
            content_type,
            body,
        )?);

        if request.use_cache {
            self.cache.put(key, Arc::clone(&page));
        }
        Ok(page)
    }

    /// Fetch raw bytes (images and other assets). Never cached.
    pub async fn fetch_bytes(&self, url: &str) -> Result<RawResponse, FetchError> {
        self.execute(url, None, None).await
    }

    /// Rate-limit once, then run the retry loop
    async fn execute(
        &self,
        raw_url: &str,
        max_attempts: Option<u32>,
        base_delay: Option<Duration>,
    ) -> Result<RawResponse, FetchError> {
        let url = Url::parse(raw_url).map_err(|e| FetchError::InvalidUrl {
            url: raw_url.to_string(),
            message: e.to_string(),
        })?;
        let max_attempts = max_attempts.unwrap_or(self.policy.max_attempts).max(1);
        let base_delay = base_delay.unwrap_or(self.policy.base_delay);

        self.pace(raw_url).await?;

        let mut attempt = 1;
        loop {
            let failure = match self.attempt(&url).await {
                Ok(raw) => {
                    self.limiter.report_success();
                    if attempt > 1 {
                        info!("Fetched {} on attempt {}", raw_url, attempt);
                    }
                    return Ok(raw);
                }
                Err(failure) => failure,
            };

            let failure = match failure {
                AttemptFailure::Fatal(err) => {
                    error!("❌ Non-retriable failure: {}", err);
                    return Err(err);
                }
                retriable => retriable,
            };

            let retry_in = if let AttemptFailure::Throttled(hint) = &failure {
                let hint = hint.map(|h| h.min(self.policy.absolute_max_delay));
                self.limiter.report_429(hint);
                self.policy.throttle_backoff(base_delay, attempt, hint)
            } else {
                self.policy.transient_backoff(base_delay, attempt)
            };

            if attempt >= max_attempts {
                let err = exhausted(raw_url, attempt, failure);
                error!("❌ Giving up on {}: {}", raw_url, err);
                return Err(err);
            }

            warn!(
                "Attempt {}/{} failed for {}; retrying in {:?}",
                attempt, max_attempts, raw_url, retry_in
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            self.sleep_or_cancel(raw_url, retry_in).await?;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &Url) -> Result<RawResponse, AttemptFailure> {
        if self.cancel.is_cancelled() {
            return Err(AttemptFailure::Fatal(FetchError::Cancelled {
                url: url.to_string(),
            }));
        }

        debug!("GET {}", url);
        self.counters.requests_sent.fetch_add(1, Ordering::Relaxed);

        let response = tokio::select! {
            result = self.client.get(url.clone()).send() => result.map_err(|e| classify_transport(url, &e))?,
            () = self.cancel.cancelled() => {
                return Err(AttemptFailure::Fatal(FetchError::Cancelled { url: url.to_string() }));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptFailure::Throttled(parse_retry_after(response.headers())));
        }
        if !status.is_success() {
            return Err(if self.policy.is_retriable_status(status.as_u16()) {
                AttemptFailure::Server(status.as_u16())
            } else {
                AttemptFailure::Fatal(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                })
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = tokio::select! {
            result = response.bytes() => result.map_err(|e| classify_transport(url, &e))?,
            () = self.cancel.cancelled() => {
                return Err(AttemptFailure::Fatal(FetchError::Cancelled { url: url.to_string() }));
            }
        };

        Ok(RawResponse {
            final_url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }

    async fn pace(&self, url: &str) -> Result<(), FetchError> {
        let gate = async {
            self.limiter.wait().await;
            if let Some(ceiling) = &self.ceiling {
                ceiling.until_ready().await;
            }
        };
        tokio::select! {
            () = gate => Ok(()),
            () = self.cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
        }
    }

    async fn sleep_or_cancel(&self, url: &str, delay: Duration) -> Result<(), FetchError> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetchClient {
    async fn fetch(&self, request: FetchRequest) -> Result<Arc<ParsedPage>, FetchError> {
        self.fetch_page(request).await
    }
}

/// Decode a body with the charset declared in its content type.
///
/// Falls back to UTF-8 when the label is missing or unknown; a BOM wins
/// over the declared label.
fn decode_body(content_type: Option<&str>, body: &[u8]) -> String {
    let encoding = content_type
        .and_then(declared_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        debug!("Body was not valid {}; replaced malformed sequences", encoding.name());
    }
    text.into_owned()
}

fn declared_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

fn classify_transport(url: &Url, err: &reqwest::Error) -> AttemptFailure {
    if err.is_timeout() {
        AttemptFailure::Timeout
    } else if err.is_builder() {
        AttemptFailure::Fatal(FetchError::InvalidUrl {
            url: url.to_string(),
            message: err.to_string(),
        })
    } else {
        AttemptFailure::Connection(err.to_string())
    }
}

fn exhausted(url: &str, attempts: u32, failure: AttemptFailure) -> FetchError {
    let url = url.to_string();
    match failure {
        AttemptFailure::Timeout => FetchError::Timeout { url, attempts },
        AttemptFailure::Connection(message) => FetchError::Connection {
            url,
            attempts,
            message,
        },
        AttemptFailure::Server(status) => FetchError::ServerError {
            url,
            status,
            attempts,
        },
        AttemptFailure::Throttled(_) => FetchError::RateLimited { url, attempts },
        AttemptFailure::Fatal(err) => err,
    }
}
