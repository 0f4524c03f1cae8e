//! Batch concurrency controller.
//!
//! Fans the session coordinator out over many files with a fixed pool of
//! worker tasks. Workers pull paths from a shared queue in input order, run
//! one session at a time each, and send the finished [`Document`] back over
//! a channel. The receiving side folds every outcome into a
//! [`BatchAggregate`] and hands a [`BatchSnapshot`] to the reporter.
//!
//! Documents are returned in input order regardless of completion order.
//! After cancellation, paths not yet started come back as `Failed`
//! documents without being opened.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use link_harness_core::models::{Document, DocumentStatus};

use crate::progress::{BatchProgressReporter, BatchSnapshot, SessionProgress};
use crate::session::SessionCoordinator;

/// Size of the recent-errors ring.
pub const RECENT_ERRORS: usize = 5;

/// Running totals for one batch.
#[derive(Debug, Default)]
pub struct BatchAggregate {
    total: usize,
    processed: usize,
    succeeded: usize,
    failed: usize,
    average_ms: f64,
    recent_errors: VecDeque<String>,
    changed: HashSet<String>,
    last_document: String,
    last_status: String,
}

impl BatchAggregate {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Fold one finished document into the totals.
    ///
    /// Only completed documents contribute changed hyperlinks; a recovered
    /// document had its edits rolled back and counts as failed.
    pub fn record(&mut self, doc: &Document, elapsed: Duration) {
        self.processed += 1;
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.average_ms += (ms - self.average_ms) / self.processed as f64;

        if doc.status == DocumentStatus::Completed {
            self.succeeded += 1;
            let document = doc.path.display().to_string();
            for id in doc.change_log.changed_hyperlinks() {
                self.changed.insert(format!("{}:{}", document, id));
            }
        } else {
            self.failed += 1;
            let message = doc.error_message.as_deref().unwrap_or("unknown error");
            self.recent_errors
                .push_back(format!("{}: {}", doc.file_name(), message));
            while self.recent_errors.len() > RECENT_ERRORS {
                self.recent_errors.pop_front();
            }
        }
        self.last_document = doc.file_name();
        self.last_status = doc.status.as_str().to_string();
    }

    /// Distinct `document:linkId` keys changed so far.
    pub fn unique_hyperlinks_changed(&self) -> usize {
        self.changed.len()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            total: self.total,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            average_ms: self.average_ms,
            recent_errors: self.recent_errors.iter().cloned().collect(),
            unique_hyperlinks_changed: self.changed.len(),
            last_document: self.last_document.clone(),
            last_status: self.last_status.clone(),
        }
    }
}

/// Every document of a batch, in input order, plus the final totals.
#[derive(Debug)]
pub struct BatchOutcome {
    pub documents: Vec<Document>,
    pub snapshot: BatchSnapshot,
}

pub struct BatchController {
    coordinator: Arc<SessionCoordinator>,
    workers: usize,
    aggregate: Arc<Mutex<BatchAggregate>>,
}

impl BatchController {
    pub fn new(coordinator: Arc<SessionCoordinator>, workers: usize) -> Self {
        Self {
            coordinator,
            workers: workers.max(1),
            aggregate: Arc::new(Mutex::new(BatchAggregate::default())),
        }
    }

    /// Current totals of the running (or last) batch.
    pub fn snapshot(&self) -> BatchSnapshot {
        self.aggregate
            .lock()
            .map(|a| a.snapshot())
            .unwrap_or_default()
    }

    pub async fn run(
        &self,
        paths: Vec<PathBuf>,
        session_progress: Arc<dyn SessionProgress>,
        reporter: &dyn BatchProgressReporter,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let total = paths.len();
        if let Ok(mut aggregate) = self.aggregate.lock() {
            *aggregate = BatchAggregate::new(total);
        }
        let workers = self.workers.min(total).max(1);
        tracing::info!(documents = total, workers, "batch started");

        let queue = Arc::new(Mutex::new(paths.clone().into_iter().enumerate()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Document, Duration)>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let coordinator = Arc::clone(&self.coordinator);
            let progress = Arc::clone(&session_progress);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                        queue.next()
                    };
                    let Some((index, path)) = next else {
                        break;
                    };
                    let started = Instant::now();
                    let doc = if cancel.is_cancelled() {
                        not_started(path, "cancelled before processing")
                    } else {
                        coordinator.process(&path, progress.as_ref(), &cancel).await
                    };
                    if tx.send((index, doc, started.elapsed())).is_err() {
                        break;
                    }
                }
                tracing::debug!(worker, "batch worker finished");
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<Document>> = (0..total).map(|_| None).collect();
        while let Some((index, doc, elapsed)) = rx.recv().await {
            let snapshot = {
                let mut aggregate = self.aggregate.lock().unwrap_or_else(|e| e.into_inner());
                aggregate.record(&doc, elapsed);
                aggregate.snapshot()
            };
            reporter.report(&snapshot);
            slots[index] = Some(doc);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "batch worker stopped");
            }
        }

        let documents: Vec<Document> = slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| slot.unwrap_or_else(|| not_started(path, "worker stopped before processing")))
            .collect();
        let snapshot = self.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            links_changed = snapshot.unique_hyperlinks_changed,
            "batch finished"
        );
        BatchOutcome { documents, snapshot }
    }
}

fn not_started(path: PathBuf, reason: &str) -> Document {
    let mut doc = Document::new(path);
    doc.error_message = Some(reason.to_string());
    doc.set_status(DocumentStatus::Failed);
    doc
}
