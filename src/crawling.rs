//! Crawling layer: extraction, fan-out, pagination and the run session

pub mod batch_enricher;
pub mod extractor;
pub mod pagination;
pub mod session;

pub use batch_enricher::{
    BatchEnricher, BatchProgress, BatchReport, BatchStats, ItemOutcome, Outcome, ProgressSnapshot,
};
pub use extractor::{PageExtractor, TitleExtractor};
pub use pagination::{ListingPage, ListingReport, collect_listing, dedup_by_identity};
pub use session::{ScrapeSession, SessionSummary, fetch_and_extract};
