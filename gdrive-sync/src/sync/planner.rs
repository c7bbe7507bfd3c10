//! Decides which remote entries need downloading.
//!
//! The planner pages through every descendant of the sync folder, maps each
//! entry to a local destination and compares it with what is on disk. It
//! only probes the local filesystem, never writes to it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;

use super::backoff::Backoff;
use super::model::{DownloadTask, EntryError, RemoteEntry, SyncFailure};
use super::paths::sanitize_path;
use super::remote::{EntryFetcher, RemoteError, RemoteLister, with_retry};
use super::resolver::{PathResolver, ResolveError};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("remote listing failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("cannot resolve sync folder {folder_id}: {source}")]
    Folder {
        folder_id: String,
        #[source]
        source: ResolveError,
    },
}

#[derive(Debug, Default)]
pub struct SyncPlan {
    pub tasks: Vec<DownloadTask>,
    pub failures: Vec<SyncFailure>,
    pub visited: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Forced,
    Missing,
    Stale,
    Current,
}

pub struct SyncPlanner<'a> {
    lister: &'a dyn RemoteLister,
    fetcher: &'a dyn EntryFetcher,
    include_top_folder: bool,
    backoff: Backoff,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(lister: &'a dyn RemoteLister, fetcher: &'a dyn EntryFetcher) -> Self {
        Self {
            lister,
            fetcher,
            include_top_folder: true,
            backoff: Backoff::default(),
        }
    }

    /// Keep the sync folder's own name as the first path segment.
    pub fn with_top_folder(mut self, include: bool) -> Self {
        self.include_top_folder = include;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn plan(
        &self,
        remote_folder_id: &str,
        local_root: &Path,
        force_downloads: bool,
    ) -> Result<SyncPlan, PlanError> {
        let mut resolver = PathResolver::new(self.fetcher).with_backoff(self.backoff);
        let prefix = self.strip_prefix(&mut resolver, remote_folder_id).await?;
        let mut plan = SyncPlan::default();
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = with_retry(&self.backoff, "listing page", || {
                self.lister.list_page(remote_folder_id, token.as_deref())
            })
            .await?;
            pages += 1;
            tracing::debug!(page = pages, entries = page.entries.len(), "listed remote page");

            for entry in page.entries {
                plan.visited += 1;
                let relative = match resolver.resolve(&entry).await {
                    Ok(path) => path,
                    Err(ResolveError::Remote(err)) => return Err(PlanError::Remote(err)),
                    Err(err) => {
                        tracing::warn!(id = %entry.id, "skipping entry: {err}");
                        plan.failures
                            .push(SyncFailure::planning(entry, None, err.into()));
                        continue;
                    }
                };
                // Claims and staleness checks use the sanitized path, the one written to.
                let original = local_root.join(strip_relative(relative, &prefix));
                let destination = sanitize_path(&original);
                if destination != original {
                    tracing::warn!(
                        name = entry.display_name(),
                        original = %original.display(),
                        sanitized = %destination.display(),
                        "destination contains invalid characters, using sanitized path"
                    );
                }

                if let Some(owner) = claimed.get(&destination) {
                    tracing::warn!(
                        name = entry.display_name(),
                        destination = %destination.display(),
                        "destination already claimed by {owner}"
                    );
                    let error = EntryError::DuplicateDestination(owner.clone());
                    plan.failures
                        .push(SyncFailure::planning(entry, Some(destination), error));
                    continue;
                }
                claimed.insert(destination.clone(), entry.id.clone());

                match decide(&entry, &destination, force_downloads).await {
                    Ok(Decision::Current) => {
                        tracing::debug!(name = entry.display_name(), "local copy is current");
                    }
                    Ok(decision) => {
                        tracing::debug!(
                            name = entry.display_name(),
                            ?decision,
                            "selected for download"
                        );
                        let task = DownloadTask::new(entry, original).redirect(destination);
                        plan.tasks.push(task);
                    }
                    Err(err) => {
                        tracing::warn!(
                            name = entry.display_name(),
                            destination = %destination.display(),
                            "cannot inspect local file: {err}"
                        );
                        plan.failures.push(SyncFailure::planning(
                            entry,
                            Some(destination),
                            EntryError::Probe(err),
                        ));
                    }
                }
            }

            match page.next_token.filter(|next| !next.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::info!(
            visited = plan.visited,
            selected = plan.tasks.len(),
            failed = plan.failures.len(),
            "planning finished"
        );
        Ok(plan)
    }

    /// Portion of resolved paths removed before joining with the local root.
    async fn strip_prefix(
        &self,
        resolver: &mut PathResolver<'_>,
        folder_id: &str,
    ) -> Result<PathBuf, PlanError> {
        let folder_path = resolver
            .resolve_folder(folder_id)
            .await
            .map_err(|err| match err {
                ResolveError::Remote(err) => PlanError::Remote(err),
                other => PlanError::Folder {
                    folder_id: folder_id.to_string(),
                    source: other,
                },
            })?;
        if self.include_top_folder {
            Ok(folder_path.parent().map(Path::to_path_buf).unwrap_or_default())
        } else {
            Ok(folder_path)
        }
    }
}

fn strip_relative(relative: PathBuf, prefix: &Path) -> PathBuf {
    match relative.strip_prefix(prefix) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => relative,
    }
}

async fn decide(entry: &RemoteEntry, destination: &Path, force: bool) -> io::Result<Decision> {
    if force {
        return Ok(Decision::Forced);
    }
    let metadata = match tokio::fs::metadata(destination).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Decision::Missing),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        return Err(io::Error::other("destination is a directory"));
    }
    let local = OffsetDateTime::from(metadata.modified()?);
    match entry.reference_time() {
        Some(remote) if local <= remote => Ok(Decision::Stale),
        _ => Ok(Decision::Current),
    }
}
