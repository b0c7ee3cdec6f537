//! Scrape Pipeline - polite, resumable site scraping
//!
//! A rate-limited, caching, retrying fetch client plus a bounded-concurrency
//! batch enricher, listing pagination and an incremental CSV sink. Site
//! specific parsing plugs in through [`crawling::PageExtractor`].

pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use crawling::{
    BatchEnricher, BatchReport, BatchStats, ItemOutcome, Outcome, PageExtractor, ScrapeSession,
    SessionSummary, collect_listing,
};
pub use domain::{Record, RecordSchema, RequestKey, WorkItem};
pub use infrastructure::{
    AppConfig, CsvSink, FetchError, FetchRequest, HttpFetchClient, PageFetcher, ParsedPage,
    RateLimiter, ResponseCache, RetryPolicy,
};
