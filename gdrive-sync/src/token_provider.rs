use async_trait::async_trait;
use gdrive_core::{OAuthClient, OAuthError};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::storage::{OAuthState, TokenStorage, now_unix};
use crate::sync::remote::{RemoteError, TokenSource};

const REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("oauth client is required to refresh an expired token")]
    MissingOAuthClient,
    #[error("cached token expired and has no refresh token")]
    MissingRefreshToken,
    #[error("token refresh failed: {0}")]
    OAuth(#[from] OAuthError),
}

/// Hands out access tokens, refreshing them shortly before they expire.
pub struct TokenProvider {
    state: OAuthState,
    oauth_client: Option<OAuthClient>,
    refreshed: bool,
}

impl TokenProvider {
    pub fn new(state: OAuthState, oauth_client: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth_client,
            refreshed: false,
        }
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.expires_soon() {
            tracing::debug!("access token expires soon, refreshing");
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    /// Refreshes regardless of the recorded expiry, e.g. after the API
    /// rejected the current token.
    pub async fn refresh_now(&mut self) -> Result<String, TokenProviderError> {
        self.refresh().await?;
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }

    /// Whether the state changed since construction and should be cached.
    pub fn was_refreshed(&self) -> bool {
        self.refreshed
    }

    fn expires_soon(&self) -> bool {
        self.state
            .expires_at
            .is_some_and(|expires_at| expires_at <= now_unix().saturating_add(REFRESH_SKEW_SECS))
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .oauth_client
            .as_ref()
            .ok_or(TokenProviderError::MissingOAuthClient)?;
        let token = client
            .refresh_token(&refresh_token, self.state.scope.as_deref())
            .await?;

        // Google omits the refresh token and often the scope on refresh.
        let mut refreshed = OAuthState::from_oauth_token(&token);
        refreshed.refresh_token = refreshed.refresh_token.or(Some(refresh_token));
        refreshed.scope = refreshed.scope.or_else(|| self.state.scope.clone());
        self.state = refreshed;
        self.refreshed = true;
        Ok(())
    }
}

/// [`TokenProvider`] behind a lock so concurrent downloads share one token
/// and one refresh. Refreshed state is written back to the token cache.
pub struct SharedTokenProvider {
    provider: Mutex<TokenProvider>,
    storage: Option<TokenStorage>,
}

impl SharedTokenProvider {
    pub fn new(provider: TokenProvider) -> Self {
        Self {
            provider: Mutex::new(provider),
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: TokenStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    fn persist(&self, state: &OAuthState) {
        if let Some(storage) = &self.storage
            && let Err(err) = storage.save(state)
        {
            tracing::warn!(
                path = %storage.path().display(),
                "failed to cache refreshed token: {err}"
            );
        }
    }
}

#[async_trait]
impl TokenSource for SharedTokenProvider {
    async fn access_token(&self) -> Result<String, RemoteError> {
        let mut provider = self.provider.lock().await;
        let previous = provider.state().access_token.clone();
        let token = provider.valid_access_token().await.map_err(token_error)?;
        if token != previous {
            self.persist(provider.state());
        }
        Ok(token)
    }

    async fn refresh(&self, rejected: &str) -> Result<String, RemoteError> {
        let mut provider = self.provider.lock().await;
        if provider.state().access_token != rejected {
            return Ok(provider.state().access_token.clone());
        }
        let token = provider.refresh_now().await.map_err(token_error)?;
        tracing::info!("access token refreshed");
        self.persist(provider.state());
        Ok(token)
    }
}

fn token_error(err: TokenProviderError) -> RemoteError {
    RemoteError::Token(err.to_string())
}
