use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rcreviews_core::{ReviewRecord, StoredReview};
use tokio::sync::Mutex;

use crate::{ReviewQuery, ReviewQueryResult, ReviewStore, SettingsStore, StoreError, UpsertOutcome};

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    reviews: Vec<StoredReview>,
    options: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn push(&mut self, post_type: &str, record: &ReviewRecord) -> i64 {
        self.next_id += 1;
        let now = Utc::now();
        self.reviews.push(StoredReview {
            id: self.next_id,
            post_type: post_type.to_string(),
            record: record.clone(),
            created_at: now,
            updated_at: now,
        });
        self.next_id
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn find_by_unique_id(
        &self,
        post_type: &str,
        unique_id: &str,
    ) -> Result<Option<StoredReview>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reviews
            .iter()
            .find(|r| r.post_type == post_type && r.record.unique_id == unique_id)
            .cloned())
    }

    async fn insert(&self, post_type: &str, record: &ReviewRecord) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.push(post_type, record))
    }

    async fn update(&self, id: i64, post_type: &str, record: &ReviewRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::Missing(id))?;
        existing.post_type = post_type.to_string();
        existing.record = record.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    /// Lookup and write happen under one lock so concurrent imports of the
    /// same key cannot both insert.
    async fn upsert(&self, post_type: &str, record: &ReviewRecord) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .reviews
            .iter_mut()
            .find(|r| r.post_type == post_type && r.record.unique_id == record.unique_id);
        match existing {
            Some(existing) => {
                existing.record = record.clone();
                existing.updated_at = Utc::now();
                Ok(UpsertOutcome {
                    id: existing.id,
                    inserted: false,
                })
            }
            None => Ok(UpsertOutcome {
                id: state.push(post_type, record),
                inserted: true,
            }),
        }
    }

    async fn count(&self, post_type: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reviews
            .iter()
            .filter(|r| r.post_type == post_type && !r.record.unique_id.is_empty())
            .count())
    }

    async fn delete_all(&self, post_type: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.reviews.len();
        state
            .reviews
            .retain(|r| !(r.post_type == post_type && !r.record.unique_id.is_empty()));
        Ok(before - state.reviews.len())
    }

    async fn reassign_post_type(&self, from: &str, to: &str) -> Result<usize, StoreError> {
        if from == to {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        let taken = state
            .reviews
            .iter()
            .filter(|r| r.post_type == to)
            .map(|r| r.record.unique_id.clone())
            .collect::<Vec<_>>();
        state
            .reviews
            .retain(|r| !(r.post_type == from && taken.contains(&r.record.unique_id)));

        let now = Utc::now();
        let mut moved = 0;
        for review in state
            .reviews
            .iter_mut()
            .filter(|r| r.post_type == from && !r.record.unique_id.is_empty())
        {
            review.post_type = to.to_string();
            review.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn query(&self, post_type: &str, query: &ReviewQuery) -> Result<ReviewQueryResult, StoreError> {
        let state = self.state.lock().await;
        let mut matched = state
            .reviews
            .iter()
            .filter(|r| r.post_type == post_type && query.matches(&r.record))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|a, b| {
            b.record
                .created_date
                .cmp(&a.record.created_date)
                .then(b.id.cmp(&a.id))
        });
        let found = matched.len();
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(ReviewQueryResult {
            reviews: matched,
            found,
        })
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_option(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().await.options.get(name).cloned())
    }

    async fn set_option(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .options
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_option(&self, name: &str) -> Result<(), StoreError> {
        self.state.lock().await.options.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(unique_id: &str, days: i64, rating: f64) -> ReviewRecord {
        ReviewRecord {
            unique_id: unique_id.to_string(),
            title: "Buyer of house".into(),
            rating,
            reviewer_role: "Buyer".into(),
            reviewer_name: "Ana".into(),
            created_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap()
                + Duration::days(days),
            content: "ok".into(),
            agent_id: "5".into(),
            agent_name: "Pat".into(),
            listing_id: "9".into(),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_overwrites() {
        let store = MemoryStore::new();
        let first = store.upsert("rcreviews", &record("k1", 0, 4.0)).await.unwrap();
        assert!(first.inserted);

        let mut changed = record("k1", 0, 5.0);
        changed.content = "edited".into();
        let second = store.upsert("rcreviews", &changed).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);

        let stored = store.find_by_unique_id("rcreviews", "k1").await.unwrap().unwrap();
        assert_eq!(stored.record.content, "edited");
        assert_eq!(stored.record.rating, 5.0);
        assert_eq!(store.count("rcreviews").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_upserts_of_one_key_store_one_review() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let tasks = (0..8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.upsert("rcreviews", &record("k1", 0, f64::from(n))).await
                })
            })
            .collect::<Vec<_>>();
        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count("rcreviews").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_of_vanished_review_is_an_error() {
        let store = MemoryStore::new();
        let id = store.insert("rcreviews", &record("k1", 0, 4.0)).await.unwrap();
        store.delete_all("rcreviews").await.unwrap();
        let err = store.update(id, "rcreviews", &record("k1", 0, 5.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(missing) if missing == id));
    }

    #[tokio::test]
    async fn keys_are_scoped_by_post_type() {
        let store = MemoryStore::new();
        store.upsert("a", &record("k1", 0, 5.0)).await.unwrap();
        let other = store.upsert("b", &record("k1", 0, 5.0)).await.unwrap();
        assert!(other.inserted);
        assert_eq!(store.count("a").await.unwrap(), 1);
        assert_eq!(store.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_only_touches_one_kind() {
        let store = MemoryStore::new();
        store.upsert("a", &record("k1", 0, 5.0)).await.unwrap();
        store.upsert("a", &record("k2", 1, 5.0)).await.unwrap();
        store.upsert("b", &record("k3", 2, 5.0)).await.unwrap();
        assert_eq!(store.delete_all("a").await.unwrap(), 2);
        assert_eq!(store.count("a").await.unwrap(), 0);
        assert_eq!(store.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reassign_keeps_target_copy_on_collision() {
        let store = MemoryStore::new();
        store.upsert("old", &record("k1", 0, 3.0)).await.unwrap();
        store.upsert("old", &record("k2", 1, 3.0)).await.unwrap();
        store.upsert("new", &record("k1", 0, 5.0)).await.unwrap();

        assert_eq!(store.reassign_post_type("old", "new").await.unwrap(), 1);
        assert_eq!(store.count("old").await.unwrap(), 0);
        assert_eq!(store.count("new").await.unwrap(), 2);
        let kept = store.find_by_unique_id("new", "k1").await.unwrap().unwrap();
        assert_eq!(kept.record.rating, 5.0);
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_reports_found() {
        let store = MemoryStore::new();
        store.upsert("r", &record("k1", 0, 5.0)).await.unwrap();
        store.upsert("r", &record("k2", 3, 5.0)).await.unwrap();
        store.upsert("r", &record("k3", 1, 2.0)).await.unwrap();
        store.upsert("r", &record("k4", 2, 5.0)).await.unwrap();

        let result = store
            .query(
                "r",
                &ReviewQuery {
                    min_rating: Some(5.0),
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.found, 3);
        let keys = result
            .reviews
            .iter()
            .map(|r| r.record.unique_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["k2", "k4"]);
    }

    #[tokio::test]
    async fn options_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_option("x").await.unwrap(), None);
        store.set_option("x", "1").await.unwrap();
        assert_eq!(store.get_option("x").await.unwrap().as_deref(), Some("1"));
        store.delete_option("x").await.unwrap();
        assert_eq!(store.get_option("x").await.unwrap(), None);
    }
}
