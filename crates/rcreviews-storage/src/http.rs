//! HTTP fetch with retry classification and capped exponential backoff.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Throttling and server faults are worth another attempt; anything else
/// (bad credentials, unknown agency) will not get better.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RetryDisposition::Retryable,
        s if s.is_server_error() => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    match err.is_timeout() || err.is_connect() {
        true => RetryDisposition::Retryable,
        false => RetryDisposition::NonRetryable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` replaces the exponential step; both are capped.
    pub fn delay(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        let step = u32::try_from(attempt).unwrap_or(u32::MAX);
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(step));
        retry_after.unwrap_or(exponential).min(self.max_delay)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered HTTP {status}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

pub const HAL_JSON: &str = "application/hal+json";

/// Headers for an authenticated HAL request.
pub fn bearer_headers(access_token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(HAL_JSON));
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        let builder = match config.user_agent {
            Some(agent) => builder.user_agent(agent),
            None => builder,
        };
        Ok(Self {
            client: builder.build().context("building http client")?,
            backoff: config.backoff,
        })
    }

    pub async fn get(&self, url: &str, headers: HeaderMap) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_get", url);
        self.send_with_retry(|| self.client.get(url).headers(headers.clone()))
            .instrument(span)
            .await
    }

    pub async fn post_form(
        &self,
        url: &str,
        basic_auth: Option<(&str, &str)>,
        form: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_post_form", url);
        self.send_with_retry(|| {
            let req = self.client.post(url).form(form);
            match basic_auth {
                Some((user, pass)) => req.basic_auth(user, Some(pass)),
                None => req,
            }
        })
        .instrument(span)
        .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let exhausted = attempt >= self.backoff.max_retries;
            let server_hint = match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.bytes().await?.to_vec();
                    debug!(status = status.as_u16(), bytes = body.len(), "response received");
                    return Ok(FetchedResponse {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if exhausted || classify_status(status) == RetryDisposition::NonRetryable {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    warn!(status = status.as_u16(), attempt, "retrying after http status");
                    retry_after(resp.headers())
                }
                Err(err) => {
                    if exhausted || classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, attempt, "retrying after transport error");
                    None
                }
            };
            tokio::time::sleep(self.backoff.delay(attempt, server_hint)).await;
            attempt += 1;
        }
    }
}
