//! End-to-end pipeline runs against a mock shop
//!
//! 1. Enrichment: items fan out through the session, one outcome each
//! 2. Output: chunks are appended to the CSV sink with a single header
//! 3. Listings: paginated category pages are collected and de-duplicated
//! 4. Assets: images are downloaded once and skipped afterwards

use std::sync::Arc;

use scrape_pipeline::crawling::{
    ListingPage, Outcome, PageExtractor, ScrapeSession, TitleExtractor, collect_listing,
    extractor::first_attr,
};
use scrape_pipeline::domain::{Record, RecordSchema, WorkItem};
use scrape_pipeline::infrastructure::{AppConfig, AssetOutcome, CsvSink, CsvSinkOptions, ParsedPage};
use tempfile::TempDir;
use tokio_test::assert_ok;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit.base_delay_ms = 0;
    config.retry.base_delay_ms = 10;
    config.retry.max_attempts = 2;
    config.batch.max_workers = 3;
    config
}

fn page(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html")
}

async fn mount_products(server: &MockServer, ids: std::ops::Range<usize>) {
    for id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/products/{id}")))
            .respond_with(page(format!("<title>Product {id}</title>")))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn batch_yields_one_outcome_per_item() {
    let server = MockServer::start().await;
    mount_products(&server, 0..6).await;
    Mock::given(method("GET"))
        .and(path("/products/untitled"))
        .respond_with(page("<p>coming soon</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/removed"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let session = ScrapeSession::new(&fast_config()).unwrap();
    let mut items: Vec<WorkItem> = (0..6)
        .map(|id| WorkItem::new(format!("{}/products/{id}", server.uri())))
        .collect();
    items.push(WorkItem::new(format!("{}/products/untitled", server.uri())));
    items.push(WorkItem::new(format!("{}/products/removed", server.uri())));

    let report = session.enrich(items, Arc::new(TitleExtractor)).await;

    assert_eq!(report.outcomes.len(), 8);
    assert_eq!(report.stats.found, 6);
    assert_eq!(report.stats.empty, 1);
    assert_eq!(report.stats.errored, 1);
    let (failed, message) = report.errors().next().unwrap();
    assert!(failed.url.ends_with("/products/removed"));
    assert!(message.contains("410"), "{message}");

    let summary = session.summary();
    assert_eq!(summary.items.completed(), 8);
    assert_eq!(summary.requests_sent, 8);
}

#[tokio::test]
async fn chunks_append_to_csv_with_single_header() {
    let server = MockServer::start().await;
    mount_products(&server, 0..5).await;

    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("out/titles.csv");
    let schema = RecordSchema::new(TitleExtractor::COLUMNS).unwrap();
    let mut sink = assert_ok!(CsvSink::open(&csv_path, schema, CsvSinkOptions::default()));

    let session = ScrapeSession::new(&fast_config()).unwrap();
    let urls: Vec<WorkItem> = (0..5)
        .map(|id| WorkItem::new(format!("{}/products/{id}", server.uri())))
        .collect();

    for chunk in urls.chunks(3) {
        let mut report = session.enrich(chunk.to_vec(), Arc::new(TitleExtractor)).await;
        report.sort_by_identity();
        assert_ok!(sink.append(&report.into_found()));
    }

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let header: Vec<&str> = reader.headers().unwrap().iter().collect();
    assert_eq!(header, ["url", "title", "status"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|row| &row[2] == "200"));
    assert_eq!(&rows[0][1], "Product 0");
    assert_eq!(sink.rows_written(), 5);
}

/// Extractor that guesses a missing category and flags it
struct CategoryExtractor;

impl PageExtractor for CategoryExtractor {
    fn extract(&self, page: &ParsedPage, item: &WorkItem) -> Option<Record> {
        let html = page.html();
        let name = first_attr(&html, "meta[name='product']", "content")?;
        let mut record = Record::new().with("url", item.url.as_str()).with("name", name);
        match first_attr(&html, "meta[name='category']", "content") {
            Some(category) => record.set("category", category),
            None => record.set_inferred("category", "uncategorized"),
        }
        Some(record)
    }
}

#[tokio::test]
async fn inferred_fields_are_flagged_in_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/gpu"))
        .respond_with(page(
            r#"<meta name="product" content="GPU X"><meta name="category" content="graphics">"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/cable"))
        .respond_with(page(r#"<meta name="product" content="HDMI cable">"#))
        .mount(&server)
        .await;

    let session = ScrapeSession::new(&fast_config()).unwrap();
    let items = vec![
        WorkItem::new(format!("{}/products/cable", server.uri())),
        WorkItem::new(format!("{}/products/gpu", server.uri())),
    ];
    let mut report = session.enrich(items, Arc::new(CategoryExtractor)).await;
    report.sort_by_identity();

    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("products.csv");
    let schema = RecordSchema::new(["url", "name", "category"])
        .unwrap()
        .with_confidence_column("inferred_fields")
        .unwrap();
    let mut sink = CsvSink::open(&csv_path, schema, CsvSinkOptions { write_bom: true }).unwrap();
    sink.append(&report.into_found()).unwrap();

    let content = std::fs::read_to_string(&csv_path).unwrap();
    let content = content.trim_start_matches('\u{feff}');
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "url,name,category,inferred_fields");
    assert!(lines[1].ends_with("HDMI cable,uncategorized,category"), "{}", lines[1]);
    assert!(lines[2].ends_with("GPU X,graphics,"), "{}", lines[2]);
}

fn listing_html(total: u32, hrefs: &[&str]) -> String {
    let links: String = hrefs
        .iter()
        .map(|h| format!(r#"<a class="product" href="{h}">item</a>"#))
        .collect();
    format!(r#"<nav class="pagination" data-total="{total}"></nav>{links}"#)
}

fn extract_listing(page: &ParsedPage) -> ListingPage {
    let html = page.html();
    let total_pages = first_attr(&html, ".pagination", "data-total")
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);
    let Ok(selector) = scraper::Selector::parse("a.product") else {
        return ListingPage::default();
    };
    let items = html
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(WorkItem::from)
        .collect();
    ListingPage { items, total_pages }
}

#[tokio::test]
async fn paginated_listing_is_deduplicated() {
    let server = MockServer::start().await;
    let base = server.uri();
    let p = |slug: &str| format!("{base}/products/{slug}");

    Mock::given(method("GET"))
        .and(path("/collections/consoles"))
        .and(query_param("page", "2"))
        .respond_with(page(listing_html(3, &[p("xbox?variant=1").as_str(), p("switch").as_str()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collections/consoles"))
        .and(query_param("page", "3"))
        .respond_with(page(listing_html(3, &[p("switch/").as_str(), p("steam-deck").as_str()])))
        .mount(&server)
        .await;
    // Lowest priority: the bare first page
    Mock::given(method("GET"))
        .and(path("/collections/consoles"))
        .respond_with(page(listing_html(3, &[p("ps5").as_str(), p("xbox").as_str()])))
        .with_priority(10)
        .mount(&server)
        .await;

    let session = ScrapeSession::new(&fast_config()).unwrap();
    let enricher = session.enricher();
    let first_url = format!("{base}/collections/consoles");
    let page_base = first_url.clone();

    let report = collect_listing(
        session.client(),
        &enricher,
        &first_url,
        session.max_listing_pages(),
        move |n| format!("{page_base}?page={n}"),
        extract_listing,
    )
    .await
    .unwrap();

    assert_eq!(report.raw_count, 6);
    assert_eq!(report.items.len(), 4);
    let slugs: Vec<String> = report
        .items
        .iter()
        .map(|item| item.identity_key().rsplit('/').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(slugs, ["ps5", "xbox", "switch", "steam-deck"]);
    assert!(report.failed_pages.is_empty());
}

#[tokio::test]
async fn assets_are_downloaded_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdn/tire-205.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/image"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50, 0x4E, 0x47], "image/png"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let session = ScrapeSession::new(&fast_config()).unwrap();
    let downloader = session.asset_downloader(dir.path().join("images"));

    let url = format!("{}/cdn/tire-205.jpg?w=800", server.uri());
    let first = downloader.download(&url).await.unwrap();
    let second = downloader.download(&url).await.unwrap();
    assert!(matches!(first, AssetOutcome::Downloaded(_)));
    assert!(matches!(second, AssetOutcome::Skipped(_)));
    assert!(first.path().ends_with("images/tire-205.jpg"));
    assert_eq!(std::fs::read(first.path()).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xE0]);

    let nameless = format!("{}/cdn/image", server.uri());
    let first = downloader.download(&nameless).await.unwrap();
    let second = downloader.download(&nameless).await.unwrap();
    assert_eq!(first.path().extension().and_then(|e| e.to_str()), Some("png"));
    assert_eq!(second, AssetOutcome::Skipped(first.path().to_path_buf()));
}

#[tokio::test]
async fn cancelled_session_reports_every_item_as_error() {
    let server = MockServer::start().await;
    mount_products(&server, 0..4).await;

    let session = ScrapeSession::new(&fast_config()).unwrap();
    session.cancel();
    let items: Vec<WorkItem> = (0..4)
        .map(|id| WorkItem::new(format!("{}/products/{id}", server.uri())))
        .collect();

    let report = session.enrich(items, Arc::new(TitleExtractor)).await;
    assert_eq!(report.outcomes.len(), 4);
    assert!(report.outcomes.iter().all(|o| matches!(o.outcome, Outcome::Error(_))));
    assert_eq!(session.client().requests_sent(), 0);
}
