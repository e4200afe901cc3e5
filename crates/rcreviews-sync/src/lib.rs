//! Review import orchestration: settings, token persistence, the paged
//! importer and the interval scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rcreviews_adapters::{RealestateAdapter, ReviewSource};
use rcreviews_core::DEFAULT_API_BASE;
use rcreviews_storage::{HttpClientConfig, HttpFetcher, MemoryStore, PgStore, ReviewStore, SettingsStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod importer;
mod scheduler;
pub mod settings;
mod token;

pub use importer::{ImportMode, ImportSummary, Importer, PageOutcome, StopReason};
pub use scheduler::{interval_duration, SyncScheduler};
pub use settings::{
    apply_update, migrate_post_type, reconcile_post_type, seed_defaults, Settings, SettingsChange,
    SettingsError, SettingsUpdate, UpdateError,
};
pub use token::StoredTokenProvider;

pub const CRATE_NAME: &str = "rcreviews-sync";
pub const DEFAULT_CONFIG_PATH: &str = "rcreviews.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub agency_id: String,
    pub post_type_slug: Option<String>,
    pub minimum_star_rating: Option<u8>,
    pub sync_interval_hours: Option<u32>,
    pub scheduler_enabled: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_pages: usize,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_base: DEFAULT_API_BASE.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            agency_id: String::new(),
            post_type_slug: None,
            minimum_star_rating: None,
            sync_interval_hours: None,
            scheduler_enabled: true,
            user_agent: "rcreviews/0.1".to_string(),
            http_timeout_secs: 20,
            max_pages: 500,
            web_port: 8000,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Read `path` (or `RCREVIEWS_CONFIG`, or `rcreviews.yaml`) when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("RCREVIEWS_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let base = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str::<SyncConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = get("REA_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = get("REA_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("REA_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = get("REA_AGENCY_ID") {
            self.agency_id = v;
        }
        if let Some(v) = get("REA_POST_TYPE_SLUG") {
            self.post_type_slug = Some(v);
        }
        if let Some(v) = get("RCREVIEWS_MIN_STARS").and_then(|v| v.parse().ok()) {
            self.minimum_star_rating = Some(v);
        }
        if let Some(v) = get("RCREVIEWS_SYNC_INTERVAL_HOURS").and_then(|v| v.parse().ok()) {
            self.sync_interval_hours = Some(v);
        }
        if let Some(v) = get("RCREVIEWS_SCHEDULER_ENABLED") {
            self.scheduler_enabled = flag(&v);
        }
        if let Some(v) = get("RCREVIEWS_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = get("RCREVIEWS_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.http_timeout_secs = v;
        }
        if let Some(v) = get("RCREVIEWS_MAX_PAGES").and_then(|v| v.parse().ok()) {
            self.max_pages = v;
        }
        if let Some(v) = get("RCREVIEWS_WEB_PORT").and_then(|v| v.parse().ok()) {
            self.web_port = v;
        }
        self
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

/// Stores, settings and importer wired from one `SyncConfig`.
#[derive(Clone)]
pub struct SyncRuntime {
    pub config: SyncConfig,
    pub reviews: Arc<dyn ReviewStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub tokens: Arc<StoredTokenProvider>,
    pub importer: Arc<Importer>,
}

impl SyncRuntime {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let (reviews, settings) = open_stores(&config).await?;
        seed_defaults(settings.as_ref(), &config)
            .await
            .context("seeding settings")?;
        migrate_post_type(reviews.as_ref(), settings.as_ref())
            .await
            .context("migrating post type")?;

        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let tokens = Arc::new(StoredTokenProvider::new(
            http.clone(),
            config.api_base.clone(),
            settings.clone(),
        ));
        let source: Arc<dyn ReviewSource> = Arc::new(RealestateAdapter::new(http, tokens.clone()));
        Ok(Self::with_source(config, reviews, settings, tokens, source))
    }

    pub fn with_source(
        config: SyncConfig,
        reviews: Arc<dyn ReviewStore>,
        settings: Arc<dyn SettingsStore>,
        tokens: Arc<StoredTokenProvider>,
        source: Arc<dyn ReviewSource>,
    ) -> Self {
        let importer = Arc::new(Importer::new(
            source,
            reviews.clone(),
            settings.clone(),
            config.api_base.clone(),
            config.max_pages,
        ));
        Self {
            config,
            reviews,
            settings,
            tokens,
            importer,
        }
    }

    pub async fn load_settings(&self) -> Result<Settings> {
        Settings::load(self.settings.as_ref())
            .await
            .context("loading settings")
    }

    pub async fn run_once(&self, mode: ImportMode) -> Result<ImportSummary> {
        self.importer.run(mode).await
    }
}

async fn open_stores(config: &SyncConfig) -> Result<(Arc<dyn ReviewStore>, Arc<dyn SettingsStore>)> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url).await.context("connecting to database")?);
            store.migrate().await?;
            info!("using postgres store");
            let reviews: Arc<dyn ReviewStore> = store.clone();
            let settings: Arc<dyn SettingsStore> = store;
            Ok((reviews, settings))
        }
        None => {
            warn!("DATABASE_URL not set; reviews are kept in memory for this process only");
            let store = Arc::new(MemoryStore::new());
            let reviews: Arc<dyn ReviewStore> = store.clone();
            let settings: Arc<dyn SettingsStore> = store;
            Ok((reviews, settings))
        }
    }
}

/// One import run outside the server, as the CLI does it.
pub async fn run_sync_once(config: SyncConfig, mode: ImportMode) -> Result<ImportSummary> {
    let runtime = SyncRuntime::from_config(config).await?;
    runtime.run_once(mode).await
}
