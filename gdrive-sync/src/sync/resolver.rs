//! Rebuilds an entry's path relative to the store root by walking its parent
//! chain. Ancestors are fetched at most once per resolver.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use super::backoff::Backoff;
use super::model::RemoteEntry;
use super::paths::{is_valid_segment, segment_from_name};
use super::remote::{EntryFetcher, RemoteError, with_retry};

/// Longest ancestor chain followed before the walk is treated as a cycle.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("remote entry {0} has no name")]
    Unnamed(String),
    #[error("remote name {0:?} cannot be used as a local path segment")]
    InvalidName(String),
    #[error("ancestor chain of {0} is deeper than {1} levels")]
    TooDeep(String, usize),
    #[error("ancestor lookup failed: {0}")]
    Remote(#[from] RemoteError),
}

impl ResolveError {
    /// Errors caused by the entry itself rather than by the transport.
    pub fn is_entry_scoped(&self) -> bool {
        !matches!(self, ResolveError::Remote(_))
    }
}

pub struct PathResolver<'a> {
    fetcher: &'a dyn EntryFetcher,
    cache: HashMap<String, RemoteEntry>,
    backoff: Backoff,
    fetches: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(fetcher: &'a dyn EntryFetcher) -> Self {
        Self {
            fetcher,
            cache: HashMap::new(),
            backoff: Backoff::default(),
            fetches: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Remote lookups performed so far; cache hits are not counted.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Relative path of `entry`: ancestor names nearest-root first, then the
    /// entry's own name. Only the first parent is followed, and the ancestor
    /// without parents (the store root) contributes no segment.
    pub async fn resolve(&mut self, entry: &RemoteEntry) -> Result<PathBuf, ResolveError> {
        let mut segments = vec![segment_of(entry)?];
        let mut next = entry.parents.first().cloned();
        let mut depth = 0;

        while let Some(parent_id) = next {
            depth += 1;
            if depth > MAX_DEPTH {
                return Err(ResolveError::TooDeep(entry.id.clone(), MAX_DEPTH));
            }
            let ancestor = self.ancestor(&parent_id).await?;
            if ancestor.parents.is_empty() {
                break;
            }
            segments.push(segment_of(&ancestor)?);
            next = ancestor.parents.first().cloned();
        }

        Ok(segments.into_iter().rev().collect())
    }

    /// Path of the folder `id`; empty when `id` is the store root.
    pub async fn resolve_folder(&mut self, id: &str) -> Result<PathBuf, ResolveError> {
        let folder = self.ancestor(id).await?;
        if folder.parents.is_empty() {
            return Ok(PathBuf::new());
        }
        self.resolve(&folder).await
    }

    async fn ancestor(&mut self, id: &str) -> Result<RemoteEntry, ResolveError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let fetcher = self.fetcher;
        let entry = with_retry(&self.backoff, "ancestor lookup", || fetcher.get_entry(id)).await?;
        self.fetches += 1;
        tracing::debug!(id, name = entry.display_name(), "cached ancestor");
        self.cache.insert(id.to_string(), entry.clone());
        Ok(entry)
    }
}

fn segment_of(entry: &RemoteEntry) -> Result<String, ResolveError> {
    let name = entry
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ResolveError::Unnamed(entry.id.clone()))?;
    if !is_valid_segment(name) {
        return Err(ResolveError::InvalidName(name.to_string()));
    }
    Ok(segment_from_name(name))
}
