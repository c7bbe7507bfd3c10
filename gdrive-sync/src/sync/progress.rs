use tokio::sync::mpsc;

use super::model::DownloadTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_size: Option<u64>,
    pub status: DownloadStatus,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_size: Option<u64>, status: DownloadStatus) -> Self {
        Self {
            bytes_downloaded,
            total_size,
            status,
        }
    }

    /// `None` when the size is unknown or zero.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_size.filter(|total| *total > 0)?;
        let percent = self.bytes_downloaded.saturating_mul(100) / total;
        Some(percent.min(100) as u8)
    }
}

/// Receives progress of individual downloads. Called synchronously from the
/// download units, so implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, task: &DownloadTask, progress: DownloadProgress);
}

pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _task: &DownloadTask, _progress: DownloadProgress) {}
}

/// Logs progress through `tracing`.
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, task: &DownloadTask, progress: DownloadProgress) {
        let name = task.entry.display_name();
        match progress.status {
            DownloadStatus::Downloading => match progress.percent() {
                Some(percent) => tracing::debug!(name, percent, "downloading"),
                None => tracing::debug!(name, bytes = progress.bytes_downloaded, "downloading"),
            },
            DownloadStatus::Completed => {
                tracing::info!(name, bytes = progress.bytes_downloaded, "download complete")
            }
            DownloadStatus::Failed => tracing::debug!(name, "download stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub entry_id: String,
    pub progress: DownloadProgress,
}

/// Forwards progress into an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelProgress {
    fn on_progress(&self, task: &DownloadTask, progress: DownloadProgress) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(ProgressEvent {
            entry_id: task.entry.id.clone(),
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::RemoteEntry;
    use std::path::PathBuf;

    #[test]
    fn percent_requires_known_size() {
        let progress = DownloadProgress::new(50, Some(200), DownloadStatus::Downloading);
        assert_eq!(progress.percent(), Some(25));
        assert_eq!(
            DownloadProgress::new(50, None, DownloadStatus::Downloading).percent(),
            None
        );
        assert_eq!(
            DownloadProgress::new(0, Some(0), DownloadStatus::Completed).percent(),
            None
        );
    }

    #[test]
    fn percent_is_capped() {
        let progress = DownloadProgress::new(300, Some(200), DownloadStatus::Downloading);
        assert_eq!(progress.percent(), Some(100));
    }

    #[tokio::test]
    async fn channel_progress_forwards_events() {
        let (observer, mut rx) = ChannelProgress::new();
        let entry = RemoteEntry::new("id-1", "a.txt");
        let task = DownloadTask::new(entry, PathBuf::from("/tmp/a.txt"));

        observer.on_progress(&task, DownloadProgress::new(4, Some(8), DownloadStatus::Downloading));
        observer.on_progress(&task, DownloadProgress::new(8, Some(8), DownloadStatus::Completed));
        drop(observer);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.entry_id, "id-1");
        assert_eq!(first.progress.percent(), Some(50));
        assert_eq!(rx.recv().await.unwrap().progress.status, DownloadStatus::Completed);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn channel_progress_tolerates_closed_receiver() {
        let (observer, rx) = ChannelProgress::new();
        drop(rx);
        let entry = RemoteEntry::new("id-1", "a.txt");
        let task = DownloadTask::new(entry, PathBuf::from("/tmp/a.txt"));
        observer.on_progress(&task, DownloadProgress::new(1, None, DownloadStatus::Failed));
    }
}
