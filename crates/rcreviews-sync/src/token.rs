use std::sync::Arc;

use async_trait::async_trait;
use rcreviews_adapters::{AdapterError, Credentials, OAuthTokenClient, TokenProvider};
use rcreviews_storage::{HttpFetcher, SettingsStore};
use tracing::{info, warn};

use crate::settings::{option_names, Settings};

/// Access token kept in the options table so it survives restarts and is
/// shared by the web process and one-shot CLI runs. Credentials are read at
/// refresh time so edits on the settings screen apply without a restart.
pub struct StoredTokenProvider {
    http: Arc<HttpFetcher>,
    api_base: String,
    settings: Arc<dyn SettingsStore>,
}

impl StoredTokenProvider {
    pub fn new(http: Arc<HttpFetcher>, api_base: impl Into<String>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            settings,
        }
    }

    async fn load(&self) -> Result<Settings, AdapterError> {
        Settings::load(self.settings.as_ref())
            .await
            .map_err(|e| AdapterError::Anyhow(e.into()))
    }

    async fn store_token(&self, token: &str) -> Result<(), AdapterError> {
        self.settings
            .set_option(option_names::ACCESS_TOKEN, token)
            .await
            .map_err(|e| AdapterError::Anyhow(e.into()))
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn access_token(&self) -> Result<String, AdapterError> {
        let settings = self.load().await?;
        if !settings.access_token.is_empty() {
            return Ok(settings.access_token);
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, AdapterError> {
        let settings = self.load().await?;
        let client = OAuthTokenClient::new(
            self.http.clone(),
            &self.api_base,
            Credentials {
                client_id: settings.client_id,
                client_secret: settings.client_secret,
            },
        );
        match client.request_token().await {
            Ok(token) => {
                self.store_token(&token).await?;
                info!("stored refreshed access token");
                Ok(token)
            }
            Err(err) => {
                warn!(error = %err, "access token request failed; clearing stored token");
                self.store_token("").await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcreviews_storage::{HttpClientConfig, MemoryStore};

    #[tokio::test]
    async fn stored_token_is_reused_without_network() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(option_names::ACCESS_TOKEN, "persisted")
            .await
            .unwrap();
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let provider = StoredTokenProvider::new(http, "http://127.0.0.1:9", store);
        assert_eq!(provider.access_token().await.unwrap(), "persisted");
    }

    #[tokio::test]
    async fn failed_refresh_clears_the_stored_token() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_option(option_names::ACCESS_TOKEN, "stale")
            .await
            .unwrap();
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let provider = StoredTokenProvider::new(http, "http://127.0.0.1:9", store.clone());

        let err = provider.refresh().await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingCredentials));
        assert_eq!(
            store
                .get_option(option_names::ACCESS_TOKEN)
                .await
                .unwrap()
                .as_deref(),
            Some("")
        );
    }
}
