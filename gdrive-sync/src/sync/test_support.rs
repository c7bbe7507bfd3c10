//! In-memory remote store used by the sync tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gdrive_core::DriveError;

use super::model::{DownloadTask, RemoteEntry};
use super::progress::{DownloadProgress, DownloadStatus, ProgressObserver};
use super::remote::{
    ByteStream, ContentFetcher, EntryFetcher, RemoteError, RemoteLister, RemotePage,
};

pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub(crate) struct FakeDrive {
    pages: Vec<Vec<RemoteEntry>>,
    entries: HashMap<String, RemoteEntry>,
    contents: HashMap<String, Vec<u8>>,
    unavailable: HashSet<String>,
    broken: HashSet<String>,
    latency: Duration,
    listing_failures: Mutex<u32>,
    listing_broken: bool,
    fetches: Mutex<HashMap<String, usize>>,
    list_calls: Mutex<Vec<Option<String>>>,
    events: EventLog,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry returned by `get_entry`.
    pub fn with_entry(mut self, entry: RemoteEntry) -> Self {
        self.entries.insert(entry.id.clone(), entry);
        self
    }

    /// Appends a listing page. Pages are chained with `page-N` tokens.
    pub fn with_page(mut self, entries: Vec<RemoteEntry>) -> Self {
        self.pages.push(entries);
        self
    }

    pub fn with_content(mut self, id: &str, body: &[u8]) -> Self {
        self.contents.insert(id.to_string(), body.to_vec());
        self
    }

    /// Downloads of `id` fail before any byte is produced.
    pub fn with_unavailable(mut self, id: &str) -> Self {
        self.unavailable.insert(id.to_string());
        self
    }

    /// Downloads of `id` yield one chunk, then fail.
    pub fn with_broken_stream(mut self, id: &str) -> Self {
        self.broken.insert(id.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The next `count` listing calls fail with a retryable error.
    pub fn with_transient_listing_failures(self, count: u32) -> Self {
        *lock(&self.listing_failures) = count;
        self
    }

    /// Every listing call fails with a permanent error.
    pub fn with_broken_listing(mut self) -> Self {
        self.listing_broken = true;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn fetches_of(&self, id: &str) -> usize {
        lock(&self.fetches).get(id).copied().unwrap_or(0)
    }

    pub fn list_calls(&self) -> Vec<Option<String>> {
        lock(&self.list_calls).clone()
    }
}

#[async_trait]
impl RemoteLister for FakeDrive {
    async fn list_page(
        &self,
        _folder_id: &str,
        token: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        lock(&self.list_calls).push(token.map(str::to_string));
        if self.listing_broken {
            return Err(RemoteError::Other("listing unavailable".into()));
        }
        {
            let mut failures = lock(&self.listing_failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(RemoteError::Drive(DriveError::Api {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "backend error".into(),
                }));
            }
        }

        let index = match token {
            None => 0,
            Some(raw) => raw
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| RemoteError::Other(format!("unknown token {raw}")))?,
        };
        let entries = self.pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));
        Ok(RemotePage {
            entries,
            next_token,
        })
    }
}

#[async_trait]
impl EntryFetcher for FakeDrive {
    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        *lock(&self.fetches).entry(id.to_string()).or_default() += 1;
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::Other(format!("no entry {id}")))
    }
}

#[async_trait]
impl ContentFetcher for FakeDrive {
    async fn download(&self, entry: &RemoteEntry) -> Result<ByteStream, RemoteError> {
        lock(&self.events).push(format!("start:{}", entry.id));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unavailable.contains(&entry.id) {
            return Err(RemoteError::Other(format!("{} is unavailable", entry.id)));
        }
        let body = self.contents.get(&entry.id).cloned().unwrap_or_default();
        let mut chunks: Vec<Result<Bytes, RemoteError>> = body
            .chunks(4)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if self.broken.contains(&entry.id) {
            chunks.truncate(1);
            chunks.push(Err(RemoteError::Other("connection reset".into())));
        }
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Records terminal progress events into a shared log.
pub(crate) struct RecordingObserver {
    events: EventLog,
    updates: Mutex<Vec<(String, DownloadProgress)>>,
}

impl RecordingObserver {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn updates_for(&self, id: &str) -> Vec<DownloadProgress> {
        lock(&self.updates)
            .iter()
            .filter(|(entry, _)| entry == id)
            .map(|(_, progress)| *progress)
            .collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, task: &DownloadTask, progress: DownloadProgress) {
        lock(&self.updates).push((task.entry.id.clone(), progress));
        match progress.status {
            DownloadStatus::Completed | DownloadStatus::Failed => {
                lock(&self.events).push(format!("done:{}", task.entry.id));
            }
            DownloadStatus::Downloading => {}
        }
    }
}

/// Highest number of downloads between their `start:` and `done:` events.
pub(crate) fn max_in_flight(events: &[String]) -> usize {
    let mut current = 0usize;
    let mut max = 0;
    for event in events {
        if event.starts_with("start:") {
            current += 1;
            max = max.max(current);
        } else if event.starts_with("done:") {
            current = current.saturating_sub(1);
        }
    }
    max
}

pub(crate) fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
