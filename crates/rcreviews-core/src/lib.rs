//! Core review model, normalization and request-URL rules for rcreviews.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CRATE_NAME: &str = "rcreviews-core";

pub const DEFAULT_POST_TYPE: &str = "rcreviews";
pub const DEFAULT_API_BASE: &str = "https://api.realestate.com.au";
pub const DEFAULT_REVIEWER_ROLE: &str = "Seller";
/// `since` used by a full import; older than any review the API holds.
pub const FULL_IMPORT_SINCE: &str = "2010-09-06T12:27:00.1Z";
pub const INCREMENTAL_WINDOW_DAYS: i64 = 30;
pub const MAX_STARS: u8 = 5;

/// Identifier the API sends either as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiId {
    Number(i64),
    Text(String),
}

impl ApiId {
    pub fn into_string(self) -> String {
        match self {
            ApiId::Number(n) => n.to_string(),
            ApiId::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiReviewer {
    pub role: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAgent {
    pub profile_id: Option<ApiId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiListing {
    pub id: Option<ApiId>,
}

/// One review as returned inside a ratings-reviews page. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReview {
    pub rating: Option<f64>,
    pub reviewer: Option<ApiReviewer>,
    pub created_date: Option<String>,
    pub content: Option<String>,
    pub agent: Option<ApiAgent>,
    pub listing: Option<ApiListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiLink {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiLinks {
    pub next: Option<ApiLink>,
}

/// HAL envelope of a ratings-reviews page. Entries stay raw JSON so one
/// malformed review cannot fail the whole page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiPage {
    #[serde(default)]
    pub result: Vec<serde_json::Value>,
    #[serde(rename = "_links", default)]
    pub links: Option<ApiLinks>,
}

impl ApiPage {
    pub fn from_reviews(reviews: Vec<ApiReview>, next: Option<&str>) -> Self {
        Self {
            result: reviews
                .into_iter()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect(),
            links: Some(ApiLinks {
                next: next.map(|href| ApiLink {
                    href: Some(href.to_string()),
                }),
            }),
        }
    }

    pub fn next_cursor(&self) -> Option<ImportCursor> {
        self.links
            .as_ref()
            .and_then(|l| l.next.as_ref())
            .and_then(|n| n.href.as_deref())
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(ImportCursor::from)
    }
}

/// Opaque continuation URL handed out by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportCursor(String);

impl ImportCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ImportCursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ImportCursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ImportCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized review, ready to be upserted under its composite key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub unique_id: String,
    pub title: String,
    pub rating: f64,
    pub reviewer_role: String,
    pub reviewer_name: String,
    pub created_date: DateTime<Utc>,
    pub content: String,
    pub agent_id: String,
    pub agent_name: String,
    pub listing_id: String,
}

/// Persisted review with its local identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReview {
    pub id: i64,
    pub post_type: String,
    #[serde(flatten)]
    pub record: ReviewRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("review has no createdDate")]
    MissingCreatedDate,
    #[error("unparseable createdDate {0:?}")]
    InvalidCreatedDate(String),
    #[error("malformed review: {0}")]
    Malformed(String),
}

pub fn composite_key(listing_id: &str, agent_id: &str, created_date: DateTime<Utc>) -> String {
    format!("{listing_id}-{agent_id}-{}", created_date.timestamp())
}

pub fn review_title(role: &str) -> String {
    format!("{role} of house")
}

pub fn ucfirst(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn parse_created_date(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(NormalizeError::InvalidCreatedDate(raw.to_string()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Turn one API review into a record. Each call starts from the defaults, so a
/// sparse record never inherits values from a neighbour in the same page.
pub fn normalize(review: ApiReview) -> Result<ReviewRecord, NormalizeError> {
    let created_raw = non_blank(review.created_date).ok_or(NormalizeError::MissingCreatedDate)?;
    let created_date = parse_created_date(&created_raw)?;

    let reviewer = review.reviewer.unwrap_or_default();
    let agent = review.agent.unwrap_or_default();

    let reviewer_role = non_blank(reviewer.role)
        .map(|r| ucfirst(&r))
        .unwrap_or_else(|| DEFAULT_REVIEWER_ROLE.to_string());
    let reviewer_name = reviewer.name.map(|n| ucfirst(&n)).unwrap_or_default();
    let agent_id = agent
        .profile_id
        .map(ApiId::into_string)
        .unwrap_or_else(|| "0".to_string());
    let listing_id = review
        .listing
        .and_then(|l| l.id)
        .map(ApiId::into_string)
        .unwrap_or_else(|| "0".to_string());

    Ok(ReviewRecord {
        unique_id: composite_key(&listing_id, &agent_id, created_date),
        title: review_title(&reviewer_role),
        rating: review.rating.unwrap_or(0.0),
        reviewer_role,
        reviewer_name,
        created_date,
        content: review.content.unwrap_or_default(),
        agent_id,
        agent_name: agent.name.unwrap_or_default(),
        listing_id,
    })
}

/// Decode one raw page entry, then normalize it.
pub fn normalize_value(raw: serde_json::Value) -> Result<ReviewRecord, NormalizeError> {
    let review = serde_json::from_value::<ApiReview>(raw)
        .map_err(|err| NormalizeError::Malformed(err.to_string()))?;
    normalize(review)
}

/// Comma list of accepted star ratings for a minimum, e.g. `3` -> `3,4,5`.
pub fn ratings_filter(min_stars: Option<u8>) -> Option<String> {
    let min = min_stars.filter(|m| *m > 0)?.min(MAX_STARS);
    Some(
        (min..=MAX_STARS)
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

pub fn incremental_since(now: DateTime<Utc>) -> String {
    (now - Duration::days(INCREMENTAL_WINDOW_DAYS))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// First-page URL for an agency's reviews, newest first.
pub fn reviews_url(
    api_base: &str,
    agency_id: &str,
    since: &str,
    min_stars: Option<u8>,
) -> Result<ImportCursor, url::ParseError> {
    let mut url = Url::parse(api_base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend([
            "customer-profile",
            "v1",
            "ratings-reviews",
            "agencies",
            agency_id,
        ]);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("since", since).append_pair("order", "DESC");
        if let Some(ratings) = ratings_filter(min_stars) {
            query.append_pair("ratings", &ratings);
        }
    }
    Ok(ImportCursor(url.to_string()))
}
