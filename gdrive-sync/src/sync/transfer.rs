use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use md5::Context;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::model::{DownloadTask, SyncFailure, SyncOutcome};
use super::paths::temp_path_for;
use super::progress::{DownloadProgress, DownloadStatus, ProgressObserver};
use super::remote::{ContentFetcher, RemoteError};

const UNSIZED_REPORT_STEP: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
    #[error("destination {0} has no parent directory")]
    MissingParent(PathBuf),
}

/// Downloads one task and turns the result into its outcome. Content is
/// streamed into a sibling temp file and only renamed onto the destination
/// once complete and verified. The destination is used as given; the planner
/// has already sanitized it.
pub async fn download_task(
    fetcher: &dyn ContentFetcher,
    task: DownloadTask,
    observer: &dyn ProgressObserver,
) -> SyncOutcome {
    match write_entry(fetcher, &task, observer).await {
        Ok(bytes) => {
            observer.on_progress(
                &task,
                DownloadProgress::new(bytes, task.entry.size, DownloadStatus::Completed),
            );
            SyncOutcome::Succeeded(task)
        }
        Err(err) => {
            tracing::error!(
                name = task.entry.display_name(),
                destination = %task.destination.display(),
                "download failed: {err}"
            );
            observer.on_progress(
                &task,
                DownloadProgress::new(0, task.entry.size, DownloadStatus::Failed),
            );
            SyncOutcome::Failed(SyncFailure::for_task(task, err.into()))
        }
    }
}

async fn write_entry(
    fetcher: &dyn ContentFetcher,
    task: &DownloadTask,
    observer: &dyn ProgressObserver,
) -> Result<u64, TransferError> {
    let target = task.destination.as_path();
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| TransferError::MissingParent(target.to_path_buf()))?;
    tokio::fs::create_dir_all(parent).await?;

    let mut stream = fetcher.download(&task.entry).await?;
    let partial = temp_path_for(target);
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut md5 = task.entry.md5_checksum.as_ref().map(|_| Context::new());
    let mut reporter = ProgressThrottle::new(task.entry.size);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        if let Some(ctx) = md5.as_mut() {
            ctx.consume(&chunk);
        }
        if let Some(progress) = reporter.advance(chunk.len() as u64) {
            observer.on_progress(task, progress);
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let (Some(expected), Some(ctx)) = (task.entry.md5_checksum.as_deref(), md5) {
        let expected_md5 = expected.to_ascii_lowercase();
        let actual_md5 = format!("{:x}", ctx.compute());
        if actual_md5 != expected_md5 {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(TransferError::IntegrityMismatch {
                expected_md5,
                actual_md5,
            });
        }
    }

    replace_with(&partial, target).await?;
    Ok(reporter.bytes)
}

async fn replace_with(partial: &Path, target: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(target).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    tokio::fs::rename(partial, target).await
}

/// Emits `Downloading` updates when the whole percentage changes, or every
/// MiB when the size is unknown.
struct ProgressThrottle {
    total: Option<u64>,
    bytes: u64,
    last_percent: Option<u8>,
    last_reported: u64,
}

impl ProgressThrottle {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            bytes: 0,
            last_percent: None,
            last_reported: 0,
        }
    }

    fn advance(&mut self, len: u64) -> Option<DownloadProgress> {
        self.bytes += len;
        let progress = DownloadProgress::new(self.bytes, self.total, DownloadStatus::Downloading);
        match progress.percent() {
            Some(percent) if self.last_percent != Some(percent) => {
                self.last_percent = Some(percent);
                Some(progress)
            }
            Some(_) => None,
            None if self.bytes - self.last_reported >= UNSIZED_REPORT_STEP => {
                self.last_reported = self.bytes;
                Some(progress)
            }
            None => None,
        }
    }
}
