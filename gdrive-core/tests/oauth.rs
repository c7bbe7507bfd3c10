use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use gdrive_core::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthError};

#[test]
fn authorize_url_includes_required_params() {
    let client = OAuthClient::with_base_url("https://oauth.example", "client-id", "secret")
        .expect("client should build");
    let url = client.authorize_url(
        "http://127.0.0.1:8080/callback",
        DRIVE_READONLY_SCOPE,
        Some("state-1"),
    );

    assert_eq!(url.path(), "/authorize");
    let query = url.query().unwrap_or_default();
    assert!(query.contains("response_type=code"));
    assert!(query.contains("client_id=client-id"));
    assert!(query.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Fcallback"));
    assert!(query.contains("access_type=offline"));
    assert!(query.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive.readonly"));
    assert!(query.contains("state=state-1"));
}

#[tokio::test]
async fn exchange_code_posts_form_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("client_id=client-id"))
        .and(body_string_contains("client_secret=secret"))
        .and(body_string_contains(
            "redirect_uri=http%3A%2F%2F127.0.0.1%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token",
            "token_type": "Bearer",
            "expires_in": 3599,
            "refresh_token": "refresh",
            "scope": DRIVE_READONLY_SCOPE
        })))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let token = client
        .exchange_code("auth-code", Some("http://127.0.0.1/callback"))
        .await
        .unwrap();

    assert_eq!(token.access_token, "token");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
    assert_eq!(token.expires_in, Some(3599));
}

#[tokio::test]
async fn refresh_token_surfaces_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let err = client
        .refresh_token("stale", None)
        .await
        .expect_err("expected invalid grant");

    match err {
        OAuthError::Api { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "invalid_grant");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn client_secrets_accept_installed_section() {
    let raw = r#"{
        "installed": {
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "shh",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    let secrets = ClientSecrets::from_json(raw).unwrap();
    assert_eq!(secrets.client_id, "id.apps.googleusercontent.com");
    assert_eq!(secrets.redirect_uris, vec!["http://localhost".to_string()]);
    let client = OAuthClient::from_secrets(&secrets).unwrap();
    assert_eq!(client.client_id(), "id.apps.googleusercontent.com");
}

#[test]
fn client_secrets_require_a_client_section() {
    let err = ClientSecrets::from_json(r#"{"other": {}}"#).expect_err("expected error");
    assert!(matches!(err, OAuthError::MissingClientSection));
}
