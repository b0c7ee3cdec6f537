//! Paginated listing collection
//!
//! Page 1 is fetched up front to learn the page count; the remaining pages
//! go through the batch enricher, and the concatenated items are
//! de-duplicated by identity key.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::crawling::batch_enricher::{BatchEnricher, Outcome};
use crate::domain::WorkItem;
use crate::infrastructure::fetch_client::{FetchRequest, PageFetcher, ParsedPage};
use crate::infrastructure::fetch_error::FetchError;

const PAGE_CONTEXT_KEY: &str = "page";

/// What a listing extractor reads from one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<WorkItem>,
    /// Only read from the first page
    pub total_pages: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ListingReport {
    /// Unique items, in page order
    pub items: Vec<WorkItem>,
    /// Items seen before de-duplication
    pub raw_count: usize,
    pub failed_pages: Vec<u32>,
}

impl ListingReport {
    pub fn duplicates(&self) -> usize {
        self.raw_count - self.items.len()
    }
}

/// Collect every item of a paginated listing.
///
/// A failed first page is an error; later failures are logged and
/// reported in [`ListingReport::failed_pages`]. The page count read from
/// the first page is clamped to `max_pages`.
pub async fn collect_listing<F, P, E>(
    fetcher: Arc<F>,
    enricher: &BatchEnricher,
    first_url: &str,
    max_pages: u32,
    page_url: P,
    extract: E,
) -> Result<ListingReport, FetchError>
where
    F: PageFetcher + ?Sized + 'static,
    P: Fn(u32) -> String,
    E: Fn(&ParsedPage) -> ListingPage + Send + Sync + 'static,
{
    let first = fetcher.fetch(FetchRequest::new(first_url)).await?;
    let ListingPage { items: first_items, total_pages } = extract(first.as_ref());
    let max_pages = max_pages.max(1);
    let total_pages = if total_pages > max_pages {
        warn!(
            "⚠️ Listing {} claims {} pages; only the first {} will be fetched",
            first_url, total_pages, max_pages
        );
        max_pages
    } else {
        total_pages.max(1)
    };
    info!("📄 Listing {} has {} pages", first_url, total_pages);

    let mut pages: Vec<(u32, Vec<WorkItem>)> = vec![(1, first_items)];
    let mut failed_pages = Vec::new();

    if total_pages > 1 {
        let requests: Vec<WorkItem> = (2..=total_pages)
            .map(|n| WorkItem::new(page_url(n)).with_context(PAGE_CONTEXT_KEY, n.to_string()))
            .collect();

        let extract = Arc::new(extract);
        let report = enricher
            .run(requests, move |item| {
                let fetcher = Arc::clone(&fetcher);
                let extract = Arc::clone(&extract);
                async move {
                    let page = fetcher.fetch(FetchRequest::new(item.url.as_str())).await?;
                    anyhow::Ok(Some((*extract)(page.as_ref()).items))
                }
            })
            .await;

        for done in report.outcomes {
            let number = page_number(&done.item);
            match done.outcome {
                Outcome::Found(items) => pages.push((number, items)),
                Outcome::Empty => pages.push((number, Vec::new())),
                Outcome::Error(message) => {
                    warn!("⚠️ Listing page {} failed: {}", number, message);
                    failed_pages.push(number);
                }
            }
        }
    }

    pages.sort_by_key(|(number, _)| *number);
    failed_pages.sort_unstable();

    let all: Vec<WorkItem> = pages.into_iter().flat_map(|(_, items)| items).collect();
    let raw_count = all.len();
    let items = dedup_by_identity(all);

    info!(
        "📋 Listing collected: {} unique items ({} raw, {} failed pages)",
        items.len(),
        raw_count,
        failed_pages.len()
    );
    Ok(ListingReport {
        items,
        raw_count,
        failed_pages,
    })
}

/// Keep the first occurrence of each identity key
pub fn dedup_by_identity(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.identity_key()))
        .collect()
}

fn page_number(item: &WorkItem) -> u32 {
    item.context_value(PAGE_CONTEXT_KEY)
        .and_then(|n| n.parse().ok())
        .unwrap_or_default()
}
