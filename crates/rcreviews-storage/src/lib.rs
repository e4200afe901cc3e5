//! Review persistence contracts, Postgres/in-memory stores and HTTP fetch utilities.

use async_trait::async_trait;
use rcreviews_core::{ReviewRecord, StoredReview};
use thiserror::Error;

mod http;
mod memory;
mod pg;

pub use http::{
    bearer_headers, classify_reqwest_error, classify_status, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition, HAL_JSON,
};
pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "rcreviews-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("review {0} no longer exists")]
    Missing(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub inserted: bool,
}

/// Filter used by the renderer. Agent ids and names are OR-ed when both are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewQuery {
    pub min_rating: Option<f64>,
    pub agent_ids: Vec<String>,
    pub agent_names: Vec<String>,
    pub limit: Option<usize>,
}

impl ReviewQuery {
    pub fn matches(&self, record: &ReviewRecord) -> bool {
        if record.unique_id.is_empty() {
            return false;
        }
        if let Some(min) = self.min_rating {
            if record.rating < min {
                return false;
            }
        }
        if self.agent_ids.is_empty() && self.agent_names.is_empty() {
            return true;
        }
        self.agent_ids.iter().any(|id| *id == record.agent_id)
            || self.agent_names.iter().any(|name| *name == record.agent_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewQueryResult {
    pub reviews: Vec<StoredReview>,
    /// Number of matches before `limit` is applied.
    pub found: usize,
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn find_by_unique_id(
        &self,
        post_type: &str,
        unique_id: &str,
    ) -> Result<Option<StoredReview>, StoreError>;

    async fn insert(&self, post_type: &str, record: &ReviewRecord) -> Result<i64, StoreError>;

    async fn update(&self, id: i64, post_type: &str, record: &ReviewRecord) -> Result<(), StoreError>;

    /// Lookup by composite key, overwrite every field if found, insert otherwise.
    async fn upsert(&self, post_type: &str, record: &ReviewRecord) -> Result<UpsertOutcome, StoreError> {
        match self.find_by_unique_id(post_type, &record.unique_id).await? {
            Some(existing) => {
                self.update(existing.id, post_type, record).await?;
                Ok(UpsertOutcome {
                    id: existing.id,
                    inserted: false,
                })
            }
            None => {
                let id = self.insert(post_type, record).await?;
                Ok(UpsertOutcome { id, inserted: true })
            }
        }
    }

    async fn count(&self, post_type: &str) -> Result<usize, StoreError>;

    async fn delete_all(&self, post_type: &str) -> Result<usize, StoreError>;

    /// Move every record of `from` under `to`. Where both kinds hold the same key
    /// the record already under `to` is kept.
    async fn reassign_post_type(&self, from: &str, to: &str) -> Result<usize, StoreError>;

    async fn query(&self, post_type: &str, query: &ReviewQuery) -> Result<ReviewQueryResult, StoreError>;
}

/// Flat name/value option storage for the persisted settings record.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_option(&self, name: &str) -> Result<Option<String>, StoreError>;
    async fn set_option(&self, name: &str, value: &str) -> Result<(), StoreError>;
    async fn delete_option(&self, name: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(agent_id: &str, agent_name: &str, rating: f64) -> ReviewRecord {
        ReviewRecord {
            unique_id: format!("1-{agent_id}-0"),
            title: "Seller of house".into(),
            rating,
            reviewer_role: "Seller".into(),
            reviewer_name: "Jo".into(),
            created_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap(),
            content: String::new(),
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            listing_id: "1".into(),
        }
    }

    #[test]
    fn query_without_agent_filters_only_checks_rating() {
        let q = ReviewQuery {
            min_rating: Some(4.0),
            ..Default::default()
        };
        assert!(q.matches(&record("1", "A", 4.0)));
        assert!(!q.matches(&record("1", "A", 3.0)));
    }

    #[test]
    fn agent_ids_and_names_are_ored() {
        let q = ReviewQuery {
            agent_ids: vec!["7".into()],
            agent_names: vec!["Kim Lee".into()],
            ..Default::default()
        };
        assert!(q.matches(&record("7", "Someone", 5.0)));
        assert!(q.matches(&record("8", "Kim Lee", 5.0)));
        assert!(!q.matches(&record("8", "Someone", 5.0)));
    }

    #[test]
    fn records_without_key_never_match() {
        let mut r = record("1", "A", 5.0);
        r.unique_id.clear();
        assert!(!ReviewQuery::default().matches(&r));
    }
}
