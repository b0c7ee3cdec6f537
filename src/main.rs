//! Scrape Pipeline CLI
//!
//! Fetches a list of URLs through a session, extracts page titles and
//! appends them to a CSV file one chunk at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use scrape_pipeline::crawling::{ScrapeSession, TitleExtractor};
use scrape_pipeline::domain::{RecordSchema, WorkItem};
use scrape_pipeline::infrastructure::{AppConfig, CsvSink, init_logging};

#[derive(Parser, Debug)]
#[command(name = "scrape-pipeline", version, about)]
struct Cli {
    /// File with one URL per line (`#` comments allowed)
    #[arg(long)]
    urls: PathBuf,

    /// Config file (TOML or JSON); defaults to the user config dir when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output CSV, overrides `output.csv_path`
    #[arg(long)]
    out: Option<PathBuf>,

    /// Worker pool size, overrides `batch.max_workers`
    #[arg(long)]
    workers: Option<usize>,

    /// Always hit the network
    #[arg(long)]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| AppConfig::default_path().filter(|path| path.exists()));
    let mut config =
        AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        config.batch.max_workers = workers;
    }
    if let Some(out) = cli.out {
        config.output.csv_path = out;
    }
    config.validate()?;
    init_logging(&config.logging)?;

    let items = read_work_items(&cli.urls).await?;
    if items.is_empty() {
        warn!("No URLs found in {}", cli.urls.display());
        return Ok(());
    }

    let session = ScrapeSession::new(&config)?.with_cache_enabled(!cli.no_cache);
    let schema = RecordSchema::new(TitleExtractor::COLUMNS)?;
    let mut sink = CsvSink::open(&config.output.csv_path, schema, config.sink_options())
        .with_context(|| format!("Failed to open {}", config.output.csv_path.display()))?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing up");
            cancel.cancel();
        }
    });

    info!(
        "🚀 Run {}: {} URLs in chunks of {} -> {}",
        session.run_id(),
        items.len(),
        config.batch.batch_size,
        sink.path().display()
    );

    let extractor = Arc::new(TitleExtractor);
    let chunks = items.chunks(config.batch.batch_size);
    let total_chunks = chunks.len();
    for (index, chunk) in chunks.enumerate() {
        if session.is_cancelled() {
            warn!("Stopping before chunk {}/{}", index + 1, total_chunks);
            break;
        }

        let mut report = session.enrich(chunk.to_vec(), Arc::clone(&extractor)).await;
        report.sort_by_identity();
        let records = report.into_found();
        let written = sink
            .append(&records)
            .with_context(|| format!("Failed to append to {}", sink.path().display()))?;
        info!("💾 Chunk {}/{}: {} rows written", index + 1, total_chunks, written);
    }

    session.log_summary();
    info!("✅ {} rows in {}", sink.rows_written(), sink.path().display());
    Ok(())
}

async fn read_work_items(path: &Path) -> Result<Vec<WorkItem>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(WorkItem::from)
        .collect())
}
