//! Per-run owner of the shared scraping components
//!
//! One session holds exactly one rate limiter, one response cache, one
//! fetch client and one cancellation token. Nothing here is global, so two
//! sessions (or two tests) never observe each other's state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::crawling::batch_enricher::{BatchEnricher, BatchProgress, BatchReport, ProgressSnapshot};
use crate::crawling::extractor::PageExtractor;
use crate::domain::{Record, WorkItem};
use crate::infrastructure::asset_downloader::AssetDownloader;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::fetch_client::{FetchRequest, HttpFetchClient, PageCache, PageFetcher};
use crate::infrastructure::fetch_error::FetchError;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::response_cache::CacheStats;

/// Progress figures for a whole run
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub items: ProgressSnapshot,
    pub requests_sent: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub current_delay: Duration,
    pub throttle_count: u64,
}

pub struct ScrapeSession {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    limiter: Arc<RateLimiter>,
    cache: Arc<PageCache>,
    client: Arc<HttpFetchClient>,
    cancel: CancellationToken,
    progress: Arc<BatchProgress>,
    max_workers: usize,
    progress_every: usize,
    max_listing_pages: u32,
    use_cache: bool,
}

impl ScrapeSession {
    pub fn new(config: &AppConfig) -> Result<Self, FetchError> {
        let cancel = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::new(config.rate_limiter_config()));
        let cache = Arc::new(PageCache::with_max_entries(config.cache_limit()));
        let client = Arc::new(HttpFetchClient::new(
            &config.http_client_config(),
            config.retry_policy(),
            Arc::clone(&limiter),
            Arc::clone(&cache),
            cancel.clone(),
        )?);

        let session = Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            limiter,
            cache,
            client,
            cancel,
            progress: Arc::new(BatchProgress::default()),
            max_workers: config.batch.max_workers,
            progress_every: config.batch.progress_every,
            max_listing_pages: config.batch.max_listing_pages,
            use_cache: true,
        };
        info!("🆕 Scrape session {} started", session.run_id);
        Ok(session)
    }

    /// Bypass the response cache for every fetch made through the session
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn client(&self) -> Arc<HttpFetchClient> {
        Arc::clone(&self.client)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("🛑 Cancelling session {}", self.run_id);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Enricher bound to this session's worker limit and cancellation
    pub fn enricher(&self) -> BatchEnricher {
        BatchEnricher::new(self.max_workers, self.cancel.clone())
            .with_progress_every(self.progress_every)
            .with_progress(Arc::clone(&self.progress))
    }

    /// Page cap for [`collect_listing`](crate::crawling::collect_listing)
    pub fn max_listing_pages(&self) -> u32 {
        self.max_listing_pages
    }

    pub fn asset_downloader(&self, dir: impl Into<std::path::PathBuf>) -> AssetDownloader {
        AssetDownloader::new(self.client(), dir)
    }

    fn request_for(&self, item: &WorkItem) -> FetchRequest {
        request_for(item, self.use_cache)
    }

    /// Fetch one item and run the extractor; `Ok(None)` means empty
    pub async fn fetch_and_extract<X>(
        &self,
        item: &WorkItem,
        extractor: &X,
    ) -> Result<Option<Record>, FetchError>
    where
        X: PageExtractor + ?Sized,
    {
        fetch_and_extract(self.client.as_ref(), self.request_for(item), item, extractor).await
    }

    /// Fetch and extract every item through a session enricher
    pub async fn enrich<X>(&self, items: Vec<WorkItem>, extractor: Arc<X>) -> BatchReport<Record>
    where
        X: PageExtractor + ?Sized + 'static,
    {
        let client = Arc::clone(&self.client);
        let use_cache = self.use_cache;
        self.enricher()
            .run(items, move |item| {
                let client = Arc::clone(&client);
                let extractor = Arc::clone(&extractor);
                async move {
                    let request = request_for(&item, use_cache);
                    let record = fetch_and_extract(client.as_ref(), request, &item, extractor.as_ref()).await?;
                    anyhow::Ok(record)
                }
            })
            .await
    }

    pub fn summary(&self) -> SessionSummary {
        let cache: CacheStats = self.cache.stats();
        let limiter = self.limiter.snapshot();
        SessionSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            elapsed: (Utc::now() - self.started_at).to_std().unwrap_or_default(),
            items: self.progress.snapshot(),
            requests_sent: self.client.requests_sent(),
            retries: self.client.retries(),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate(),
            current_delay: limiter.current_delay,
            throttle_count: limiter.throttle_count,
        }
    }

    pub fn log_summary(&self) {
        let s = self.summary();
        info!(
            "📊 Session {}: {} found, {} empty, {} errors | {} requests, {} retries | cache hit rate {:.1}% | delay {:.2}s, {} throttles | {:.1}s",
            s.run_id,
            s.items.found,
            s.items.empty,
            s.items.errored,
            s.requests_sent,
            s.retries,
            s.cache_hit_rate * 100.0,
            s.current_delay.as_secs_f64(),
            s.throttle_count,
            s.elapsed.as_secs_f64()
        );
    }
}

fn request_for(item: &WorkItem, use_cache: bool) -> FetchRequest {
    let request = FetchRequest::new(item.url.as_str());
    if use_cache { request } else { request.no_cache() }
}

/// Fetch a page through any [`PageFetcher`] and hand it to the extractor.
///
/// A record with no fields counts as empty, same as `None`.
pub async fn fetch_and_extract<F, X>(
    fetcher: &F,
    request: FetchRequest,
    item: &WorkItem,
    extractor: &X,
) -> Result<Option<Record>, FetchError>
where
    F: PageFetcher + ?Sized,
    X: PageExtractor + ?Sized,
{
    let page = fetcher.fetch(request).await?;
    Ok(extractor.extract(&page, item).filter(|record| !record.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::extractor::TitleExtractor;
    use crate::infrastructure::fetch_client::ParsedPage;
    use async_trait::async_trait;

    struct StaticSite;

    #[async_trait]
    impl PageFetcher for StaticSite {
        async fn fetch(&self, request: FetchRequest) -> Result<Arc<ParsedPage>, FetchError> {
            let body = if request.url.ends_with("/empty") {
                "<p>no title</p>"
            } else {
                "<title>Found it</title>"
            };
            Ok(Arc::new(ParsedPage::html_fixture(request.url, body)))
        }
    }

    #[tokio::test]
    async fn extractor_none_means_empty() {
        let item = WorkItem::new("https://shop.example/empty");
        let record = fetch_and_extract(&StaticSite, FetchRequest::new(item.url.as_str()), &item, &TitleExtractor)
            .await
            .unwrap();
        assert!(record.is_none());

        let item = WorkItem::new("https://shop.example/p/1");
        let record = fetch_and_extract(&StaticSite, FetchRequest::new(item.url.as_str()), &item, &TitleExtractor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.get("title"), Some("Found it"));
    }

    #[tokio::test]
    async fn fieldless_record_counts_as_empty() {
        let blank = |_: &ParsedPage, _: &WorkItem| Some(Record::new());
        let item = WorkItem::new("https://shop.example/p/1");
        let record = fetch_and_extract(&StaticSite, FetchRequest::new(item.url.as_str()), &item, &blank)
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn uncached_session_bypasses_cache_in_batches() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw("<title>Stock</title>", "text/html"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let mut config = AppConfig::default();
        config.rate_limit.base_delay_ms = 0;
        let session = ScrapeSession::new(&config).unwrap().with_cache_enabled(false);
        let url = format!("{}/stock", server.uri());

        let report = session.enrich(vec![WorkItem::new(url.as_str())], Arc::new(TitleExtractor)).await;
        assert_eq!(report.stats.found, 1);
        let again = session.fetch_and_extract(&WorkItem::new(url.as_str()), &TitleExtractor).await.unwrap();
        assert!(again.is_some());
        assert!(session.cache().is_empty());
    }

    #[tokio::test]
    async fn blank_records_are_reported_empty_by_batches() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw("<p>hi</p>", "text/html"))
            .mount(&server)
            .await;

        let mut config = AppConfig::default();
        config.rate_limit.base_delay_ms = 0;
        let session = ScrapeSession::new(&config).unwrap();
        let blank = |_: &ParsedPage, _: &WorkItem| Some(Record::new());
        let report = session
            .enrich(vec![WorkItem::new(format!("{}/p/1", server.uri()))], Arc::new(blank))
            .await;
        assert_eq!(report.stats.found, 0);
        assert_eq!(report.stats.empty, 1);
    }

    #[test]
    fn sessions_do_not_share_state() {
        let config = AppConfig::default();
        let a = ScrapeSession::new(&config).unwrap();
        let b = ScrapeSession::new(&config).unwrap();
        assert_ne!(a.run_id(), b.run_id());
        assert!(!Arc::ptr_eq(a.cache(), b.cache()));

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(a.enricher().max_workers() >= 1);

        let summary = b.summary();
        assert_eq!(summary.requests_sent, 0);
        assert_eq!(summary.items.submitted, 0);
        assert_eq!(summary.current_delay, config.rate_limiter_config().base_delay);
    }
}
