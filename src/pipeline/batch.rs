//! Concurrent batch execution and running statistics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use super::processor::InvoiceProcessor;
use crate::models::ProcessingResult;

/// Cross-worker counters. The only shared mutable state in the batch:
/// every other intermediate value is owned by a single document's task.
#[derive(Debug, Default)]
pub struct BatchCounters {
    processed: AtomicUsize,
    successful: AtomicUsize,
    manual_review: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchCounters {
    pub fn record(&self, result: &ProcessingResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match result {
            ProcessingResult::Success { record, .. } => {
                if record.requires_manual_review() {
                    self.manual_review.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.successful.fetch_add(1, Ordering::Relaxed);
                }
            }
            ProcessingResult::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> BatchStats {
        BatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            manual_review: self.manual_review.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the batch counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchStats {
    pub processed: usize,
    pub successful: usize,
    pub manual_review: usize,
    pub failed: usize,
}

impl BatchStats {
    /// Fraction of processed documents that came out clean (0..1).
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful, self.processed)
    }

    /// Fraction of processed documents routed to a human (0..1).
    pub fn manual_review_rate(&self) -> f64 {
        ratio(self.manual_review, self.processed)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl InvoiceProcessor {
    /// Process a batch of documents on a bounded worker pool.
    ///
    /// Every path produces exactly one result; completion order is not
    /// input order, so callers correlate by `source_path`. A failing or
    /// timed-out document never disturbs its siblings.
    pub async fn process_batch(&self, paths: Vec<PathBuf>) -> Vec<ProcessingResult> {
        let workers = self.workers().max(1);
        info!(count = paths.len(), workers, "starting batch processing");

        let mut results = Vec::with_capacity(paths.len());
        let mut in_flight: Vec<(PathBuf, JoinHandle<ProcessingResult>)> = Vec::new();

        for path in paths {
            let processor = self.clone();
            let task_path = path.clone();
            let handle =
                tokio::spawn(async move { processor.process_one(&task_path).await });
            in_flight.push((path, handle));

            if in_flight.len() >= workers {
                results.extend(join_all(std::mem::take(&mut in_flight)).await);
            }
        }
        results.extend(join_all(in_flight).await);

        let stats = self.stats();
        info!(
            processed = stats.processed,
            successful = stats.successful,
            manual_review = stats.manual_review,
            failed = stats.failed,
            "batch complete"
        );

        results
    }

    /// Snapshot of the running counters across every call on this
    /// processor (and its clones).
    pub fn stats(&self) -> BatchStats {
        self.counters.snapshot()
    }

    fn workers(&self) -> usize {
        self.config.batch.workers
    }
}

/// Await a set of spawned documents. A panicked task (which `process_one`
/// itself never produces) still yields a `Failed` result for its path
/// rather than vanishing from the result set.
async fn join_all(batch: Vec<(PathBuf, JoinHandle<ProcessingResult>)>) -> Vec<ProcessingResult> {
    let (paths, handles): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
    let joined = futures::future::join_all(handles).await;

    joined
        .into_iter()
        .zip(paths)
        .map(|(outcome, path)| match outcome {
            Ok(result) => result,
            Err(e) => ProcessingResult::Failed {
                error: format!("worker task aborted: {e}"),
                source_path: path,
            },
        })
        .collect()
}
