use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::model::{DownloadTask, EntryError, SyncFailure, SyncOutcome};
use super::progress::{DownloadProgress, DownloadStatus, NoopProgress, ProgressObserver};
use super::remote::ContentFetcher;
use super::transfer::download_task;

pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub download_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            download_timeout: None,
        }
    }
}

/// Runs download tasks in fixed-size batches. Every unit of a batch has
/// produced its outcome before the next batch starts.
pub struct DownloadOrchestrator {
    fetcher: Arc<dyn ContentFetcher>,
    observer: Arc<dyn ProgressObserver>,
    config: OrchestratorConfig,
}

impl DownloadOrchestrator {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, config: OrchestratorConfig) -> Self {
        Self {
            fetcher,
            observer: Arc::new(NoopProgress),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// One outcome per task. Order follows batches; within a batch it
    /// follows completion.
    pub async fn execute(&self, tasks: Vec<DownloadTask>) -> Vec<SyncOutcome> {
        let batch_size = self.config.batch_size.max(1);
        let batches = tasks.len().div_ceil(batch_size);
        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut pending = tasks.into_iter().peekable();
        let mut index = 0;

        while pending.peek().is_some() {
            index += 1;
            let batch: Vec<_> = pending.by_ref().take(batch_size).collect();
            tracing::info!(
                batch = index,
                of = batches,
                size = batch.len(),
                "starting download batch"
            );
            self.run_batch(batch, &mut outcomes).await;
        }
        outcomes
    }

    async fn run_batch(&self, batch: Vec<DownloadTask>, outcomes: &mut Vec<SyncOutcome>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(batch.len());

        for task in batch {
            let fallback = task.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let observer = Arc::clone(&self.observer);
            let timeout = self.config.download_timeout;
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let outcome = run_unit(fetcher.as_ref(), task, observer.as_ref(), timeout).await;
                let _ = tx.send(outcome);
            });
            handles.push((fallback, handle));
        }
        drop(tx);

        let mut aborted = Vec::new();
        for (task, handle) in handles {
            if let Err(err) = handle.await {
                tracing::error!(name = task.entry.display_name(), "download unit aborted: {err}");
                self.observer.on_progress(
                    &task,
                    DownloadProgress::new(0, task.entry.size, DownloadStatus::Failed),
                );
                aborted.push(SyncOutcome::Failed(SyncFailure::for_task(
                    task,
                    EntryError::Aborted(err.to_string()),
                )));
            }
        }

        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes.extend(aborted);
    }
}

async fn run_unit(
    fetcher: &dyn ContentFetcher,
    task: DownloadTask,
    observer: &dyn ProgressObserver,
    timeout: Option<Duration>,
) -> SyncOutcome {
    let Some(limit) = timeout else {
        return download_task(fetcher, task, observer).await;
    };
    let fallback = task.clone();
    match tokio::time::timeout(limit, download_task(fetcher, task, observer)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(name = fallback.entry.display_name(), ?limit, "download timed out");
            observer.on_progress(
                &fallback,
                DownloadProgress::new(0, fallback.entry.size, DownloadStatus::Failed),
            );
            SyncOutcome::Failed(SyncFailure::for_task(fallback, EntryError::Timeout(limit)))
        }
    }
}
