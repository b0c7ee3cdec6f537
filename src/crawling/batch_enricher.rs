//! Bounded-concurrency fan-out over work items
//!
//! Every submitted item produces exactly one [`ItemOutcome`], whatever the
//! worker does: a returned error, a panic and cancellation are all reported
//! as [`Outcome::Error`] and the batch carries on.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::WorkItem;

pub const CANCELLED: &str = "cancelled";

/// Classification of one item's result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The worker produced a record
    Found(T),
    /// The worker succeeded but there was no data
    Empty,
    Error(String),
}

impl<T> Outcome<T> {
    fn cancelled() -> Self {
        Self::Error(CANCELLED.to_string())
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::Empty => "empty",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome<T> {
    pub item: WorkItem,
    pub outcome: Outcome<T>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub submitted: usize,
    pub found: usize,
    pub empty: usize,
    pub errored: usize,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn completed(&self) -> usize {
        self.found + self.empty + self.errored
    }
}

/// Live counters, updated as items complete
#[derive(Debug, Default)]
pub struct BatchProgress {
    submitted: AtomicUsize,
    found: AtomicUsize,
    empty: AtomicUsize,
    errored: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub submitted: usize,
    pub found: usize,
    pub empty: usize,
    pub errored: usize,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> usize {
        self.found + self.empty + self.errored
    }
}

impl BatchProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }

    fn record<T>(&self, outcome: &Outcome<T>) {
        let counter = match outcome {
            Outcome::Found(_) => &self.found,
            Outcome::Empty => &self.empty,
            Outcome::Error(_) => &self.errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct BatchReport<T> {
    /// In completion order
    pub outcomes: Vec<ItemOutcome<T>>,
    pub stats: BatchStats,
}

impl<T> BatchReport<T> {
    pub fn found(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Found(value) => Some(value),
            _ => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = (&WorkItem, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Error(message) => Some((&o.item, message.as_str())),
            _ => None,
        })
    }

    /// Stable order for output, independent of completion order
    pub fn sort_by_identity(&mut self) {
        self.outcomes.sort_by_cached_key(|o| o.item.identity_key());
    }

    pub fn into_found(self) -> Vec<T> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o.outcome {
                Outcome::Found(value) => Some(value),
                _ => None,
            })
            .collect()
    }
}

pub struct BatchEnricher {
    max_workers: usize,
    progress_every: usize,
    cancel: CancellationToken,
    progress: Arc<BatchProgress>,
}

impl BatchEnricher {
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            progress_every: 10,
            cancel,
            progress: Arc::new(BatchProgress::default()),
        }
    }

    /// Log progress every `n` completions; 0 logs only the final summary
    #[must_use]
    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    /// Report into counters shared with other enrichers (e.g. a session)
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Counters accumulated over every run of this enricher
    pub fn progress(&self) -> Arc<BatchProgress> {
        Arc::clone(&self.progress)
    }

    /// Run `worker` over all items with at most `max_workers` in flight.
    ///
    /// Never fails: per-item failures are reported in the outcomes.
    pub async fn run<T, F, Fut>(&self, items: Vec<WorkItem>, worker: F) -> BatchReport<T>
    where
        T: Send + 'static,
        F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        self.progress.submitted.fetch_add(total, Ordering::Relaxed);
        info!("🚀 Enriching {} items with up to {} workers", total, self.max_workers);

        let worker = Arc::new(worker);
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (index, item) in items.iter().enumerate() {
            let item = item.clone();
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            tasks.spawn(async move { (index, run_item(item, worker, semaphore, cancel).await) });
        }

        let mut slots: Vec<Option<WorkItem>> = items.into_iter().map(Some).collect();
        let mut outcomes = Vec::with_capacity(total);
        let mut stats = BatchStats {
            submitted: total,
            ..BatchStats::default()
        };

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Batch task failed: {}", e);
                    continue;
                }
            };
            let Some(item) = slots.get_mut(index).and_then(Option::take) else {
                continue;
            };
            self.complete(item, outcome, &mut stats, &mut outcomes);
        }

        // Anything still unclaimed lost its task; keep one outcome per item
        for item in slots.into_iter().flatten() {
            self.complete(item, Outcome::Error("worker task lost".to_string()), &mut stats, &mut outcomes);
        }

        stats.elapsed = started.elapsed();
        info!(
            "✅ Batch finished: {} found, {} empty, {} errors of {} in {:.1}s",
            stats.found,
            stats.empty,
            stats.errored,
            stats.submitted,
            stats.elapsed.as_secs_f64()
        );
        BatchReport { outcomes, stats }
    }

    fn complete<T>(
        &self,
        item: WorkItem,
        outcome: Outcome<T>,
        stats: &mut BatchStats,
        outcomes: &mut Vec<ItemOutcome<T>>,
    ) {
        match &outcome {
            Outcome::Found(_) => stats.found += 1,
            Outcome::Empty => {
                stats.empty += 1;
                debug!("Empty result: {}", item.url);
            }
            Outcome::Error(message) => {
                stats.errored += 1;
                warn!("❌ {}: {}", item.url, message);
            }
        }
        self.progress.record(&outcome);

        let completed = stats.completed();
        if self.progress_every > 0 && completed % self.progress_every == 0 && completed < stats.submitted {
            info!(
                "📊 Progress {}/{} (found {}, empty {}, errors {})",
                completed, stats.submitted, stats.found, stats.empty, stats.errored
            );
        }
        outcomes.push(ItemOutcome { item, outcome });
    }
}

async fn run_item<T, F, Fut>(
    item: WorkItem,
    worker: Arc<F>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Outcome<T>
where
    T: Send + 'static,
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
{
    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return Outcome::cancelled(),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Outcome::Error("worker pool closed".to_string()),
        },
    };
    if cancel.is_cancelled() {
        return Outcome::cancelled();
    }

    // Separate task so a panicking worker surfaces as a JoinError
    let mut handle = tokio::spawn((*worker)(item));
    tokio::select! {
        biased;
        joined = &mut handle => match joined {
            Ok(Ok(Some(value))) => Outcome::Found(value),
            Ok(Ok(None)) => Outcome::Empty,
            Ok(Err(e)) => Outcome::Error(format!("{e:#}")),
            Err(e) => Outcome::Error(join_error_message(e)),
        },
        () = cancel.cancelled() => {
            handle.abort();
            Outcome::cancelled()
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("worker aborted: {err}");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {message}")
}
