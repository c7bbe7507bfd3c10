use std::io;
use std::path::PathBuf;
use std::time::Duration;

use gdrive_core::{DriveFile, FOLDER_MIME_TYPE};
use thiserror::Error;
use time::OffsetDateTime;

use super::resolver::ResolveError;
use super::transfer::TransferError;

/// A file or folder as reported by the remote store. Never mutated by the
/// sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: Option<String>,
    pub parents: Vec<String>,
    pub size: Option<u64>,
    pub modified_time: Option<OffsetDateTime>,
    pub created_time: Option<OffsetDateTime>,
    pub mime_type: Option<String>,
    pub md5_checksum: Option<String>,
}

impl RemoteEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            parents: Vec::new(),
            size: None,
            modified_time: None,
            created_time: None,
            mime_type: None,
            md5_checksum: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parents.push(parent_id.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: OffsetDateTime) -> Self {
        self.modified_time = Some(modified);
        self
    }

    pub fn with_created(mut self, created: OffsetDateTime) -> Self {
        self.created_time = Some(created);
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5_checksum = Some(md5.into());
        self
    }

    /// Remote timestamp the local copy is compared against: modified time,
    /// falling back to creation time.
    pub fn reference_time(&self) -> Option<OffsetDateTime> {
        self.modified_time.or(self.created_time)
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.id)
    }
}

impl From<DriveFile> for RemoteEntry {
    fn from(file: DriveFile) -> Self {
        Self {
            id: file.id,
            name: file.name,
            parents: file.parents,
            size: file.size,
            modified_time: file.modified_time,
            created_time: file.created_time,
            mime_type: file.mime_type,
            md5_checksum: file.md5_checksum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub entry: RemoteEntry,
    pub destination: PathBuf,
    pub original_destination: PathBuf,
}

impl DownloadTask {
    pub fn new(entry: RemoteEntry, destination: PathBuf) -> Self {
        Self {
            entry,
            original_destination: destination.clone(),
            destination,
        }
    }

    pub(crate) fn redirect(mut self, destination: PathBuf) -> Self {
        self.destination = destination;
        self
    }
}

/// Failure scoped to one remote entry. Recorded in the summary, never fatal
/// to the run.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to inspect local file: {0}")]
    Probe(#[source] io::Error),
    #[error("destination is already claimed by remote entry {0}")]
    DuplicateDestination(String),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    #[error("download task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug)]
pub struct SyncFailure {
    pub entry: RemoteEntry,
    pub destination: Option<PathBuf>,
    pub error: EntryError,
}

impl SyncFailure {
    pub fn planning(entry: RemoteEntry, destination: Option<PathBuf>, error: EntryError) -> Self {
        Self {
            entry,
            destination,
            error,
        }
    }

    pub fn for_task(task: DownloadTask, error: EntryError) -> Self {
        Self {
            entry: task.entry,
            destination: Some(task.destination),
            error,
        }
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    Succeeded(DownloadTask),
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded(_))
    }

    pub fn entry(&self) -> &RemoteEntry {
        match self {
            SyncOutcome::Succeeded(task) => &task.entry,
            SyncOutcome::Failed(failure) => &failure.entry,
        }
    }
}
