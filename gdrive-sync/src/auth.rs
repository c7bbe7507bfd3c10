use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use gdrive_core::{
    ApiErrorClass, ClientSecrets, DRIVE_READONLY_SCOPE, DriveClient, DriveError, OAuthClient,
};

use crate::config::SyncConfig;
use crate::oauth_flow::OAuthFlow;
use crate::storage::{OAuthState, TokenStorage};
use crate::sync::DriveRemote;
use crate::token_provider::{SharedTokenProvider, TokenProvider};

/// Ready-made access token; skips the credentials file and the token cache.
pub const ENV_TOKEN: &str = "GDRIVE_SYNC_TOKEN";
/// Skip the loopback listener during interactive authorization.
pub const ENV_OAUTH_MANUAL: &str = "GDRIVE_SYNC_OAUTH_MANUAL";

/// Produces an authorized [`DriveClient`] for a run.
pub struct Authorizer {
    credentials_path: PathBuf,
    storage: TokenStorage,
    application_name: String,
    drive_base_url: Option<String>,
    manual: bool,
}

impl Authorizer {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            credentials_path: config.credentials_path.clone(),
            storage: TokenStorage::new(config.token_path.clone()),
            application_name: config.application_name.clone(),
            drive_base_url: None,
            manual: false,
        }
    }

    pub fn with_drive_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.drive_base_url = Some(base_url.into());
        self
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    /// Returns a remote whose token has been accepted by Drive for a lookup
    /// of `folder_id`. A rejected token is refreshed once here; later in the
    /// run the remote refreshes on its own and keeps the cache current.
    pub async fn connect(
        &self,
        folder_id: &str,
        env_token: Option<String>,
    ) -> anyhow::Result<DriveRemote> {
        if let Some(token) = env_token.filter(|token| !token.trim().is_empty()) {
            tracing::info!("using access token from {ENV_TOKEN}");
            let client = self
                .build_client(token)
                .context("failed to build the Drive client")?;
            return Ok(DriveRemote::new(client));
        }

        let oauth = self.oauth_client()?;
        let state = match self
            .storage
            .load()
            .context("failed to read the token cache")?
        {
            Some(state) => state,
            None => self.authorize(oauth.clone()).await?,
        };

        let mut provider = TokenProvider::new(state, Some(oauth));
        let token = provider
            .valid_access_token()
            .await
            .context("failed to obtain a valid access token")?;
        let client = self
            .build_client(token)
            .context("failed to build the Drive client")?;
        match client.get_file(folder_id).await {
            Ok(_) => {}
            Err(err) if err.classification() == Some(ApiErrorClass::Auth) => {
                tracing::warn!("access token rejected, refreshing");
                let token = provider
                    .refresh_now()
                    .await
                    .context("failed to refresh the rejected access token")?;
                client
                    .with_token(token)
                    .get_file(folder_id)
                    .await
                    .context("Google Drive rejected the refreshed token")?;
            }
            Err(err) => return Err(err).context("failed to reach Google Drive"),
        }

        if provider.was_refreshed() {
            self.storage
                .save(provider.state())
                .context("failed to persist the refreshed token")?;
        }
        let tokens = SharedTokenProvider::new(provider)
            .with_storage(TokenStorage::new(self.storage.path()));
        Ok(DriveRemote::new(client).with_token_source(Arc::new(tokens)))
    }

    fn oauth_client(&self) -> anyhow::Result<OAuthClient> {
        let raw = std::fs::read_to_string(&self.credentials_path).with_context(|| {
            format!(
                "failed to read client credentials at {}",
                self.credentials_path.display()
            )
        })?;
        let secrets = ClientSecrets::from_json(&raw).context("invalid client credentials file")?;
        OAuthClient::from_secrets(&secrets).context("invalid oauth endpoints in credentials")
    }

    async fn authorize(&self, oauth: OAuthClient) -> anyhow::Result<OAuthState> {
        tracing::info!("no cached token, starting interactive authorization");
        let token = OAuthFlow::new(oauth, DRIVE_READONLY_SCOPE)
            .manual(self.manual)
            .authenticate()
            .await
            .context("authorization failed")?;
        let state = OAuthState::from_oauth_token(&token);
        self.storage
            .save(&state)
            .context("failed to save the token cache")?;
        tracing::info!(path = %self.storage.path().display(), "token cached");
        Ok(state)
    }

    fn build_client(&self, token: String) -> Result<DriveClient, DriveError> {
        let client = match &self.drive_base_url {
            Some(base_url) => DriveClient::with_base_url(base_url, token)?,
            None => DriveClient::new(token)?,
        };
        client.with_application_name(&self.application_name)
    }
}
