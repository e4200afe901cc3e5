//! Operator settings persisted as flat `rcreviews_*` options.

use chrono::{DateTime, Utc};
use rcreviews_core::{DEFAULT_POST_TYPE, MAX_STARS};
use rcreviews_storage::{ReviewStore, SettingsStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::SyncConfig;

pub mod option_names {
    pub const AGENCY_ID: &str = "rcreviews_agency_id";
    pub const CLIENT_ID: &str = "rcreviews_client_id";
    pub const CLIENT_SECRET: &str = "rcreviews_client_secret";
    pub const ACCESS_TOKEN: &str = "rcreviews_access_token";
    pub const MINIMUM_STAR_RATING: &str = "rcreviews_minimum_star_rating";
    pub const SYNC_INTERVAL: &str = "rcreviews_sync_interval";
    pub const CUSTOM_POST_TYPE_SLUG: &str = "rcreviews_custom_post_type_slug";
    pub const CURRENT_POST_TYPE_SLUG: &str = "rcreviews_current_post_type_slug";
    pub const PREV_POST_TYPE_SLUG: &str = "rcreviews_prev_post_type_slug";
    pub const LAST_IMPORT: &str = "rcreviews_last_import";
}

use option_names::*;

pub const DEFAULT_SYNC_INTERVAL_HOURS: u32 = 24;
pub const LAST_IMPORT_FORMAT: &str = "%d %B %Y %H:%M:%S";
const REDACTED: &str = "********";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid value {value:?} for {field}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub agency_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub minimum_star_rating: Option<u8>,
    pub sync_interval_hours: u32,
    pub post_type_slug: String,
    pub current_post_type_slug: String,
    pub prev_post_type_slug: String,
    pub last_import: Option<DateTime<Utc>>,
}

impl Settings {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self, StoreError> {
        let get = |name: &'static str| async move {
            store
                .get_option(name)
                .await
                .map(|v| v.map(|s| s.trim().to_string()).unwrap_or_default())
        };
        Ok(Self {
            agency_id: get(AGENCY_ID).await?,
            client_id: get(CLIENT_ID).await?,
            client_secret: get(CLIENT_SECRET).await?,
            access_token: get(ACCESS_TOKEN).await?,
            minimum_star_rating: parse_min_stars(&get(MINIMUM_STAR_RATING).await?).ok().flatten(),
            sync_interval_hours: parse_interval(&get(SYNC_INTERVAL).await?)
                .unwrap_or(DEFAULT_SYNC_INTERVAL_HOURS),
            post_type_slug: get(CUSTOM_POST_TYPE_SLUG).await?,
            current_post_type_slug: get(CURRENT_POST_TYPE_SLUG).await?,
            prev_post_type_slug: get(PREV_POST_TYPE_SLUG).await?,
            last_import: DateTime::parse_from_rfc3339(&get(LAST_IMPORT).await?)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
        })
    }

    /// Record kind new reviews are written under.
    pub fn post_type(&self) -> &str {
        if self.post_type_slug.is_empty() {
            DEFAULT_POST_TYPE
        } else {
            &self.post_type_slug
        }
    }

    pub fn last_import_display(&self) -> Option<String> {
        self.last_import
            .map(|d| d.format(LAST_IMPORT_FORMAT).to_string())
    }

    pub fn redacted(&self) -> Self {
        let mask = |v: &str| {
            if v.is_empty() {
                String::new()
            } else {
                REDACTED.to_string()
            }
        };
        Self {
            client_secret: mask(&self.client_secret),
            access_token: mask(&self.access_token),
            ..self.clone()
        }
    }
}

fn parse_min_stars(raw: &str) -> Result<Option<u8>, SettingsError> {
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u8>() {
        Ok(0) => Ok(None),
        Ok(n) if n <= MAX_STARS => Ok(Some(n)),
        _ => Err(SettingsError::Invalid {
            field: MINIMUM_STAR_RATING,
            value: raw.to_string(),
        }),
    }
}

fn parse_interval(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|h| *h > 0)
}

pub async fn record_last_import(store: &dyn SettingsStore, at: DateTime<Utc>) -> Result<String, StoreError> {
    store.set_option(LAST_IMPORT, &at.to_rfc3339()).await?;
    Ok(at.format(LAST_IMPORT_FORMAT).to_string())
}

async fn fill_if_empty(store: &dyn SettingsStore, name: &str, value: &str) -> Result<bool, StoreError> {
    let existing = store.get_option(name).await?.unwrap_or_default();
    if !existing.trim().is_empty() {
        return Ok(false);
    }
    store.set_option(name, value).await?;
    Ok(true)
}

/// Write options the configuration sets explicitly, fill the remaining
/// defaults into empty options, then track slug changes.
pub async fn seed_defaults(store: &dyn SettingsStore, config: &SyncConfig) -> Result<Settings, StoreError> {
    let explicit = [
        (CLIENT_ID, Some(config.client_id.as_str())),
        (CLIENT_SECRET, Some(config.client_secret.as_str())),
        (AGENCY_ID, Some(config.agency_id.as_str())),
        (CUSTOM_POST_TYPE_SLUG, config.post_type_slug.as_deref()),
    ];
    let mut credentials_changed = false;
    for (name, value) in explicit {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        let existing = store.get_option(name).await?.unwrap_or_default();
        if existing.trim() == value {
            continue;
        }
        store.set_option(name, value).await?;
        credentials_changed |= name == CLIENT_ID || name == CLIENT_SECRET;
        info!(option = name, "option set from configuration");
    }
    if credentials_changed {
        store.set_option(ACCESS_TOKEN, "").await?;
    }

    if let Some(stars) = config.minimum_star_rating {
        store
            .set_option(MINIMUM_STAR_RATING, &stars.min(MAX_STARS).to_string())
            .await?;
    }
    match config.sync_interval_hours.filter(|h| *h > 0) {
        Some(hours) => store.set_option(SYNC_INTERVAL, &hours.to_string()).await?,
        None => {
            fill_if_empty(store, SYNC_INTERVAL, &DEFAULT_SYNC_INTERVAL_HOURS.to_string()).await?;
        }
    }
    if fill_if_empty(store, CURRENT_POST_TYPE_SLUG, DEFAULT_POST_TYPE).await? {
        info!(option = CURRENT_POST_TYPE_SLUG, "seeded option with default");
    }
    reconcile_post_type(store).await
}

/// When the configured slug differs from the current one, the current slug
/// becomes the previous one.
pub async fn reconcile_post_type(store: &dyn SettingsStore) -> Result<Settings, StoreError> {
    let settings = Settings::load(store).await?;
    let wanted = settings.post_type().to_string();
    if settings.current_post_type_slug == wanted {
        return Ok(settings);
    }
    info!(
        from = %settings.current_post_type_slug,
        to = %wanted,
        "post type slug changed"
    );
    store
        .set_option(PREV_POST_TYPE_SLUG, &settings.current_post_type_slug)
        .await?;
    store.set_option(CURRENT_POST_TYPE_SLUG, &wanted).await?;
    Settings::load(store).await
}

/// Move records stored under the previous slug to the current one.
pub async fn migrate_post_type(
    reviews: &dyn ReviewStore,
    store: &dyn SettingsStore,
) -> Result<usize, StoreError> {
    let settings = Settings::load(store).await?;
    let prev = settings.prev_post_type_slug.as_str();
    let current = settings.post_type();
    if prev.is_empty() || prev == current {
        return Ok(0);
    }
    let moved = reviews.reassign_post_type(prev, current).await?;
    if moved > 0 {
        info!(from = prev, to = current, moved, "reassigned reviews to new post type");
    }
    Ok(moved)
}

/// Form payload of the settings screen. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub agency_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub minimum_star_rating: Option<String>,
    pub sync_interval: Option<String>,
    pub post_type_slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
    pub settings: Settings,
    pub interval_changed: bool,
    pub post_type_changed: bool,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Invalid(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn apply_update(
    store: &dyn SettingsStore,
    update: SettingsUpdate,
) -> Result<SettingsChange, UpdateError> {
    let before = Settings::load(store).await?;

    let mut writes: Vec<(&'static str, String)> = Vec::new();
    if let Some(raw) = update.minimum_star_rating {
        let raw = raw.trim().to_string();
        parse_min_stars(&raw)?;
        writes.push((MINIMUM_STAR_RATING, raw));
    }
    if let Some(raw) = update.sync_interval {
        let raw = raw.trim().to_string();
        if parse_interval(&raw).is_none() {
            return Err(SettingsError::Invalid {
                field: SYNC_INTERVAL,
                value: raw,
            }
            .into());
        }
        writes.push((SYNC_INTERVAL, raw));
    }
    for (name, value) in [
        (AGENCY_ID, update.agency_id),
        (CLIENT_ID, update.client_id),
        (CLIENT_SECRET, update.client_secret),
        (CUSTOM_POST_TYPE_SLUG, update.post_type_slug),
    ] {
        if let Some(value) = value {
            writes.push((name, value.trim().to_string()));
        }
    }

    for (name, value) in &writes {
        store.set_option(name, value).await?;
    }
    let credentials_changed = writes
        .iter()
        .any(|(name, _)| *name == CLIENT_ID || *name == CLIENT_SECRET);
    if credentials_changed {
        store.set_option(ACCESS_TOKEN, "").await?;
    }

    let settings = reconcile_post_type(store).await?;
    Ok(SettingsChange {
        interval_changed: settings.sync_interval_hours != before.sync_interval_hours,
        post_type_changed: settings.post_type() != before.post_type(),
        settings,
    })
}
