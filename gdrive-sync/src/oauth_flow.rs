use std::io::Write;
use std::time::Duration;

use gdrive_core::{OAuthClient, OAuthError, OAuthToken};
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
const MANUAL_REDIRECT_URI: &str = "http://127.0.0.1";
const CALLBACK_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: text/html; charset=utf-8\r\n\
    Connection: close\r\n\r\n\
    <html><body><h2>Google Drive connected</h2>\
    <p>You can close this tab and return to the terminal.</p></body></html>";

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("redirect carried an unexpected state parameter")]
    StateMismatch,
    #[error("authorization timed out")]
    Timeout,
}

/// Interactive installed-app authorization. Prefers a loopback redirect and
/// falls back to pasting the code (or the whole redirect URL) on stdin.
pub struct OAuthFlow {
    client: OAuthClient,
    scope: String,
    timeout: Duration,
    manual: bool,
}

impl OAuthFlow {
    pub fn new(client: OAuthClient, scope: impl Into<String>) -> Self {
        Self {
            client,
            scope: scope.into(),
            timeout: DEFAULT_TIMEOUT,
            manual: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip the loopback listener and ask for the code directly.
    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub async fn authenticate(&self) -> Result<OAuthToken, OAuthFlowError> {
        if !self.manual {
            match self.via_loopback().await {
                Ok(token) => return Ok(token),
                Err(err @ (OAuthFlowError::OAuth(_) | OAuthFlowError::Denied(_))) => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        "loopback authorization unavailable ({err}), \
                         falling back to manual code entry"
                    );
                }
            }
        }
        self.via_manual_entry().await
    }

    async fn via_loopback(&self) -> Result<OAuthToken, OAuthFlowError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let state = random_state();
        let url = self
            .client
            .authorize_url(&redirect_uri, &self.scope, Some(&state));

        println!("Open this URL in your browser to authorize access:\n{url}");
        tracing::info!(port, "waiting for the authorization redirect");

        let (mut stream, _) = tokio::time::timeout(self.timeout, listener.accept())
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;
        let mut request = vec![0u8; 8192];
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut request))
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;
        let request_text = String::from_utf8_lossy(&request[..read]);
        let code = extract_code_from_http_request(&request_text, Some(&state));

        let _ = stream.write_all(CALLBACK_PAGE).await;
        let _ = stream.shutdown().await;

        let token = self.client.exchange_code(&code?, Some(&redirect_uri)).await?;
        Ok(token)
    }

    async fn via_manual_entry(&self) -> Result<OAuthToken, OAuthFlowError> {
        let url = self
            .client
            .authorize_url(MANUAL_REDIRECT_URI, &self.scope, None);
        println!("Open this URL in your browser:\n{url}");
        println!(
            "After approving, paste the code or the full address the browser was redirected to."
        );
        print!("Authorization code: ");
        std::io::stdout().flush()?;

        let input = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map(|_| input)
        })
        .await
        .map_err(std::io::Error::other)??;

        let code = parse_manual_input(&input)?;
        Ok(self
            .client
            .exchange_code(&code, Some(MANUAL_REDIRECT_URI))
            .await?)
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn extract_code_from_http_request(
    request: &str,
    expected_state: Option<&str>,
) -> Result<String, OAuthFlowError> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or(OAuthFlowError::MissingCode)?;
    let url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target)
    } else {
        Url::parse(&format!("http://127.0.0.1{target}"))
    }
    .map_err(|_| OAuthFlowError::MissingCode)?;
    code_from_url(&url, expected_state)
}

fn code_from_url(url: &Url, expected_state: Option<&str>) -> Result<String, OAuthFlowError> {
    let param = |name: &str| {
        url.query_pairs()
            .find_map(|(key, value)| (key == name && !value.is_empty()).then(|| value.into_owned()))
    };
    if let Some(error) = param("error") {
        return Err(OAuthFlowError::Denied(error));
    }
    if let Some(expected) = expected_state
        && param("state").as_deref() != Some(expected)
    {
        return Err(OAuthFlowError::StateMismatch);
    }
    param("code").ok_or(OAuthFlowError::MissingCode)
}

fn parse_manual_input(input: &str) -> Result<String, OAuthFlowError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(OAuthFlowError::MissingCode);
    }
    match Url::parse(trimmed) {
        Ok(url) if url.scheme().starts_with("http") => code_from_url(&url, None),
        _ => Ok(trimmed.to_string()),
    }
}
