//! Page extractors turn a fetched page into a flat record
//!
//! Site-specific selectors live in extractor implementations; the pipeline
//! only forwards whatever they return.

use scraper::{ElementRef, Html, Selector};

use crate::domain::{Record, WorkItem};
use crate::infrastructure::fetch_client::ParsedPage;

/// `None` means the page legitimately carries no data for this item
pub trait PageExtractor: Send + Sync {
    fn extract(&self, page: &ParsedPage, item: &WorkItem) -> Option<Record>;
}

impl<F> PageExtractor for F
where
    F: Fn(&ParsedPage, &WorkItem) -> Option<Record> + Send + Sync,
{
    fn extract(&self, page: &ParsedPage, item: &WorkItem) -> Option<Record> {
        self(page, item)
    }
}

/// Generic extractor used by the CLI: `url`, `title`, `status`
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleExtractor;

impl TitleExtractor {
    pub const COLUMNS: [&'static str; 3] = ["url", "title", "status"];
}

impl PageExtractor for TitleExtractor {
    fn extract(&self, page: &ParsedPage, item: &WorkItem) -> Option<Record> {
        let html = page.html();
        let title = first_text(&html, "title")
            .or_else(|| first_text(&html, "h1"))
            .or_else(|| first_attr(&html, "meta[property='og:title']", "content"))?;

        Some(
            Record::new()
                .with("url", item.url.as_str())
                .with("title", title)
                .with("status", page.status.to_string()),
        )
    }
}

/// Whitespace-collapsed text of the first element matching `css`
pub fn first_text(html: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    html.select(&selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

pub fn first_attr(html: &Html, css: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    html.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
