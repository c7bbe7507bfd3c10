//! Capabilities the sync core needs from the remote store, and their Drive
//! implementation.
//!
//! The planner only sees [`RemoteLister`] and [`EntryFetcher`]; download
//! units only see [`ContentFetcher`]. [`DriveRemote`] implements all three on
//! top of [`gdrive_core::DriveClient`], taking bearer tokens from an optional
//! [`TokenSource`] so a run can outlive a single access token.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use gdrive_core::{ApiErrorClass, DriveClient, DriveError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backoff::Backoff;
use super::model::RemoteEntry;

/// Attempts per remote call before a retryable error is surfaced.
pub const MAX_REMOTE_ATTEMPTS: u32 = 4;

const DEFAULT_PAGE_SIZE: u32 = 100;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("cannot obtain an access token: {0}")]
    Token(String),
    #[error("malformed continuation token: {0}")]
    Cursor(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Drive(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct RemotePage {
    pub entries: Vec<RemoteEntry>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait RemoteLister: Send + Sync {
    /// One page of the direct and indirect descendants of `folder_id`.
    /// `token` is the `next_token` of the previous page, `None` for the first.
    async fn list_page(
        &self,
        folder_id: &str,
        token: Option<&str>,
    ) -> Result<RemotePage, RemoteError>;
}

#[async_trait]
pub trait EntryFetcher: Send + Sync {
    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, RemoteError>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn download(&self, entry: &RemoteEntry) -> Result<ByteStream, RemoteError>;
}

/// Bearer tokens for [`DriveRemote`], shared by every concurrent call.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token that is not about to expire.
    async fn access_token(&self) -> Result<String, RemoteError>;

    /// Replacement for `rejected` after Drive answered 401. Callers racing on
    /// the same rejected token get a single refresh.
    async fn refresh(&self, rejected: &str) -> Result<String, RemoteError>;
}

/// Runs `op`, retrying retryable failures with `backoff` up to
/// [`MAX_REMOTE_ATTEMPTS`] attempts in total.
pub async fn with_retry<T, F, Fut>(
    backoff: &Backoff,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_REMOTE_ATTEMPTS => {
                let delay = backoff.delay(attempt);
                tracing::warn!(attempt = attempt + 1, ?delay, "{what} failed, retrying: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Drive-backed remote. Descendant listing walks the folder tree breadth
/// first; the continuation token carries the walk state between calls.
#[derive(Clone)]
pub struct DriveRemote {
    client: DriveClient,
    tokens: Option<Arc<dyn TokenSource>>,
    page_size: u32,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
struct DescendantCursor {
    current: String,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    pending: VecDeque<String>,
    #[serde(default)]
    visited: BTreeSet<String>,
}

impl DescendantCursor {
    fn start(folder_id: &str) -> Self {
        Self {
            current: folder_id.to_string(),
            visited: BTreeSet::from([folder_id.to_string()]),
            ..Self::default()
        }
    }

    fn decode(folder_id: &str, token: Option<&str>) -> Result<Self, RemoteError> {
        match token.filter(|raw| !raw.is_empty()) {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Self::start(folder_id)),
        }
    }

    fn enqueue_folder(&mut self, id: String) {
        // Folders with several parents show up once per parent.
        if self.visited.insert(id.clone()) {
            self.pending.push_back(id);
        }
    }

    /// Moves to the next Drive page or the next pending folder. `false` when
    /// the walk is complete.
    fn advance(&mut self, next_page_token: Option<String>) -> bool {
        self.page_token = next_page_token.filter(|token| !token.is_empty());
        if self.page_token.is_some() {
            return true;
        }
        match self.pending.pop_front() {
            Some(next) => {
                self.current = next;
                true
            }
            None => false,
        }
    }
}

impl DriveRemote {
    pub fn new(client: DriveClient) -> Self {
        Self {
            client,
            tokens: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Without a token source every call uses the client's own token.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    /// Runs `call` with a current token. A 401 refreshes the token and
    /// repeats the call once.
    async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Fn(DriveClient) -> Fut,
        Fut: Future<Output = Result<T, DriveError>>,
    {
        let Some(tokens) = &self.tokens else {
            return Ok(call(self.client.clone()).await?);
        };
        let token = tokens.access_token().await?;
        match call(self.client.with_token(token.as_str())).await {
            Err(err) if err.classification() == Some(ApiErrorClass::Auth) => {
                tracing::warn!("access token rejected, refreshing");
                let token = tokens.refresh(&token).await?;
                Ok(call(self.client.with_token(token)).await?)
            }
            result => Ok(result?),
        }
    }
}

#[async_trait]
impl RemoteLister for DriveRemote {
    async fn list_page(
        &self,
        folder_id: &str,
        token: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        let mut cursor = DescendantCursor::decode(folder_id, token)?;
        let (current, page_token) = (cursor.current.as_str(), cursor.page_token.as_deref());
        let page_size = self.page_size;
        let list = self
            .authorized(|client| async move {
                client
                    .list_children(current, Some(page_size), page_token)
                    .await
            })
            .await?;

        let mut entries = Vec::with_capacity(list.files.len());
        for file in list.files {
            if file.is_folder() {
                cursor.enqueue_folder(file.id);
            } else {
                entries.push(RemoteEntry::from(file));
            }
        }

        let next_token = if cursor.advance(list.next_page_token) {
            Some(serde_json::to_string(&cursor)?)
        } else {
            None
        };
        Ok(RemotePage {
            entries,
            next_token,
        })
    }
}

#[async_trait]
impl EntryFetcher for DriveRemote {
    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, RemoteError> {
        let file = self
            .authorized(|client| async move { client.get_file(id).await })
            .await?;
        Ok(file.into())
    }
}

#[async_trait]
impl ContentFetcher for DriveRemote {
    async fn download(&self, entry: &RemoteEntry) -> Result<ByteStream, RemoteError> {
        let id = entry.id.as_str();
        let stream = self
            .authorized(|client| async move { client.download_media(id).await })
            .await?;
        Ok(Box::pin(stream.map(|chunk| chunk.map_err(RemoteError::from))))
    }
}
