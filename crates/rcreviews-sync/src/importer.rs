use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rcreviews_adapters::ReviewSource;
use rcreviews_core::{incremental_since, normalize_value, reviews_url, ImportCursor, FULL_IMPORT_SINCE};
use rcreviews_storage::{ReviewStore, SettingsStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::settings::{record_last_import, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Every review since the agency's earliest possible date.
    Full,
    /// Reviews from the last thirty days.
    Incremental,
}

/// Result of importing one page, shaped like the admin progress payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOutcome {
    pub url_next: Option<ImportCursor>,
    pub last_import: String,
    pub item_counter: u64,
    pub total_posts: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    RepeatedCursor,
    ForeignCursor,
    PageLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub mode: ImportMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total_posts: usize,
    pub stopped: StopReason,
}

pub struct Importer {
    source: Arc<dyn ReviewSource>,
    reviews: Arc<dyn ReviewStore>,
    settings: Arc<dyn SettingsStore>,
    api_base: String,
    max_pages: usize,
}

impl Importer {
    pub fn new(
        source: Arc<dyn ReviewSource>,
        reviews: Arc<dyn ReviewStore>,
        settings: Arc<dyn SettingsStore>,
        api_base: impl Into<String>,
        max_pages: usize,
    ) -> Self {
        Self {
            source,
            reviews,
            settings,
            api_base: api_base.into(),
            max_pages: max_pages.max(1),
        }
    }

    /// Whether `cursor` points at the configured API, so a bearer token is
    /// never sent elsewhere.
    pub fn owns_cursor(&self, cursor: &ImportCursor) -> bool {
        let base = self.api_base.trim_end_matches('/');
        cursor
            .as_str()
            .strip_prefix(base)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
    }

    pub fn source_id(&self) -> &'static str {
        self.source.source_id()
    }

    async fn settings(&self) -> Result<Settings> {
        Settings::load(self.settings.as_ref())
            .await
            .context("loading settings")
    }

    pub async fn first_url(&self, mode: ImportMode, now: DateTime<Utc>) -> Result<ImportCursor> {
        let settings = self.settings().await?;
        if settings.agency_id.is_empty() {
            bail!("agency id is not configured");
        }
        let since = match mode {
            ImportMode::Full => FULL_IMPORT_SINCE.to_string(),
            ImportMode::Incremental => incremental_since(now),
        };
        reviews_url(
            &self.api_base,
            &settings.agency_id,
            &since,
            settings.minimum_star_rating,
        )
        .with_context(|| format!("building reviews url from {}", self.api_base))
    }

    /// Fetch one page, upsert its reviews under the current post type and
    /// record the import time.
    pub async fn import_page(&self, cursor: &ImportCursor, item_counter: u64) -> Result<PageOutcome> {
        let settings = self.settings().await?;
        let post_type = settings.post_type();
        let page = self
            .source
            .fetch_page(cursor)
            .await
            .with_context(|| format!("fetching {cursor}"))?;

        let mut outcome = PageOutcome {
            url_next: page.next_cursor(),
            last_import: String::new(),
            item_counter,
            total_posts: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
        };
        for raw in page.result {
            let record = match normalize_value(raw) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, url = %cursor, "skipping review");
                    outcome.skipped += 1;
                    continue;
                }
            };
            let upserted = self
                .reviews
                .upsert(post_type, &record)
                .await
                .with_context(|| format!("saving review {}", record.unique_id))?;
            if upserted.inserted {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
            outcome.item_counter += 1;
        }

        outcome.last_import = record_last_import(self.settings.as_ref(), Utc::now()).await?;
        outcome.total_posts = self.reviews.count(post_type).await?;
        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            has_next = outcome.url_next.is_some(),
            "imported page"
        );
        Ok(outcome)
    }

    pub async fn run(&self, mode: ImportMode) -> Result<ImportSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_run", %run_id, ?mode, source = self.source_id());
        self.run_inner(run_id, mode).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, mode: ImportMode) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let mut cursor = self.first_url(mode, started_at).await?;
        let mut seen = HashSet::new();
        let mut summary = ImportSummary {
            run_id,
            mode,
            started_at,
            finished_at: started_at,
            pages: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            total_posts: 0,
            stopped: StopReason::Exhausted,
        };
        let mut item_counter = 0;

        loop {
            seen.insert(cursor.clone());
            let page = self.import_page(&cursor, item_counter).await?;
            summary.pages += 1;
            summary.inserted += page.inserted;
            summary.updated += page.updated;
            summary.skipped += page.skipped;
            summary.total_posts = page.total_posts;
            item_counter = page.item_counter;

            let Some(next) = page.url_next else {
                break;
            };
            if seen.contains(&next) {
                warn!(url = %next, "API returned an already visited page; stopping");
                summary.stopped = StopReason::RepeatedCursor;
                break;
            }
            if !self.owns_cursor(&next) {
                warn!(url = %next, "next page is outside the API; stopping");
                summary.stopped = StopReason::ForeignCursor;
                break;
            }
            if summary.pages >= self.max_pages {
                warn!(max_pages = self.max_pages, "page limit reached; stopping");
                summary.stopped = StopReason::PageLimit;
                break;
            }
            cursor = next;
        }

        summary.finished_at = Utc::now();
        info!(
            pages = summary.pages,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            total_posts = summary.total_posts,
            "import finished"
        );
        Ok(summary)
    }

    /// Delete every review of the current post type; returns what is left.
    pub async fn empty(&self) -> Result<usize> {
        let settings = self.settings().await?;
        let post_type = settings.post_type();
        let deleted = self.reviews.delete_all(post_type).await?;
        info!(post_type, deleted, "emptied reviews");
        Ok(self.reviews.count(post_type).await?)
    }

    pub async fn total_posts(&self) -> Result<usize> {
        let settings = self.settings().await?;
        Ok(self.reviews.count(settings.post_type()).await?)
    }
}
