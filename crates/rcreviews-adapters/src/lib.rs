//! Review source contracts and the realestate.com.au ratings-reviews adapter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rcreviews_core::{ApiPage, ImportCursor};
use rcreviews_storage::{bearer_headers, FetchError, HttpFetcher};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "rcreviews-adapters";

pub const TOKEN_PATH: &str = "/oauth/token";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid page payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint returned no access_token")]
    MissingToken,
    #[error("client credentials are not configured")]
    MissingCredentials,
    #[error("no fixture page for {0}")]
    UnknownCursor(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.status() == Some(401))
    }
}

/// Anything that can hand back one page of reviews for a cursor.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_page(&self, cursor: &ImportCursor) -> Result<ApiPage, AdapterError>;
}

/// Supplies bearer tokens; `refresh` is called after the API rejects the current one.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AdapterError>;
    async fn refresh(&self) -> Result<String, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// OAuth2 client-credentials grant against `{api_base}/oauth/token`.
#[derive(Debug, Clone)]
pub struct OAuthTokenClient {
    http: Arc<HttpFetcher>,
    token_url: String,
    credentials: Credentials,
}

impl OAuthTokenClient {
    pub fn new(http: Arc<HttpFetcher>, api_base: &str, credentials: Credentials) -> Self {
        Self {
            http,
            token_url: format!("{}{TOKEN_PATH}", api_base.trim_end_matches('/')),
            credentials,
        }
    }

    pub async fn request_token(&self) -> Result<String, AdapterError> {
        if !self.credentials.is_complete() {
            return Err(AdapterError::MissingCredentials);
        }
        let resp = self
            .http
            .post_form(
                &self.token_url,
                Some((
                    self.credentials.client_id.as_str(),
                    self.credentials.client_secret.as_str(),
                )),
                &[("grant_type", "client_credentials")],
            )
            .await?;
        let parsed: TokenResponse = serde_json::from_slice(&resp.body)?;
        match parsed.access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                debug!("obtained access token");
                Ok(token)
            }
            None => Err(AdapterError::MissingToken),
        }
    }
}

/// Token provider that fetches once and caches in memory.
#[derive(Debug)]
pub struct CachedTokenProvider {
    client: OAuthTokenClient,
    cached: Mutex<Option<String>>,
}

impl CachedTokenProvider {
    pub fn new(client: OAuthTokenClient) -> Self {
        Self {
            client,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    async fn access_token(&self) -> Result<String, AdapterError> {
        if let Some(token) = self.cached.lock().await.clone() {
            return Ok(token);
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, AdapterError> {
        let token = self.client.request_token().await?;
        *self.cached.lock().await = Some(token.clone());
        Ok(token)
    }
}

/// Fixed token, for tests and pre-provisioned deployments.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AdapterError> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<String, AdapterError> {
        Ok(self.0.clone())
    }
}

pub fn parse_page(body: &[u8]) -> Result<ApiPage, AdapterError> {
    Ok(serde_json::from_slice(body)?)
}

pub struct RealestateAdapter {
    http: Arc<HttpFetcher>,
    tokens: Arc<dyn TokenProvider>,
}

impl RealestateAdapter {
    pub fn new(http: Arc<HttpFetcher>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http, tokens }
    }

    async fn get_page(&self, cursor: &ImportCursor, token: &str) -> Result<ApiPage, AdapterError> {
        let resp = self.http.get(cursor.as_str(), bearer_headers(token)).await?;
        parse_page(&resp.body)
    }
}

#[async_trait]
impl ReviewSource for RealestateAdapter {
    fn source_id(&self) -> &'static str {
        "realestate.com.au"
    }

    async fn fetch_page(&self, cursor: &ImportCursor) -> Result<ApiPage, AdapterError> {
        let token = self.tokens.access_token().await?;
        match self.get_page(cursor, &token).await {
            Err(err) if err.is_unauthorized() => {
                warn!(url = cursor.as_str(), "access token rejected; refreshing once");
                let token = self.tokens.refresh().await?;
                self.get_page(cursor, &token).await
            }
            other => other,
        }
    }
}

/// Serves pre-recorded pages keyed by their URL.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    pages: HashMap<String, ApiPage>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, page: ApiPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }
}

#[async_trait]
impl ReviewSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, cursor: &ImportCursor) -> Result<ApiPage, AdapterError> {
        self.pages
            .get(cursor.as_str())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCursor(cursor.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_reads_hal_envelope() {
        let body = br#"{
            "result": [
                {"rating": 4, "createdDate": "2024-01-02T03:04:05Z", "agent": {"profileId": "77"}}
            ],
            "_links": {"self": {"href": "https://x/1"}, "next": {"href": "https://x/2"}}
        }"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.result.len(), 1);
        assert_eq!(page.next_cursor().unwrap().as_str(), "https://x/2");
    }

    #[test]
    fn mistyped_entry_does_not_fail_the_page() {
        let body = br#"{"result": [
            {"createdDate": "2024-01-02T03:04:05Z"},
            {"createdDate": 1704164645}
        ]}"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.result.len(), 2);
    }

    #[test]
    fn page_without_result_is_empty() {
        let page = parse_page(br#"{"_links": {}}"#).unwrap();
        assert!(page.result.is_empty());
        assert!(page.next_cursor().is_none());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(parse_page(b"<html>"), Err(AdapterError::Decode(_))));
    }

    #[test]
    fn credentials_need_both_parts() {
        let creds = Credentials {
            client_id: "id".into(),
            client_secret: " ".into(),
        };
        assert!(!creds.is_complete());
    }

    #[tokio::test]
    async fn fixture_source_misses_unknown_cursor() {
        let source = FixtureSource::new().with_page("a", ApiPage::default());
        assert!(source.fetch_page(&ImportCursor::from("a")).await.is_ok());
        assert!(matches!(
            source.fetch_page(&ImportCursor::from("b")).await,
            Err(AdapterError::UnknownCursor(_))
        ));
    }
}
