//! Axum + Askama front end: the public review listing and the JSON admin
//! endpoints that drive manual imports and settings.

use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rcreviews_core::ImportCursor;
use rcreviews_sync::{
    apply_update, migrate_post_type, ImportMode, Settings, SettingsUpdate, SyncConfig,
    SyncRuntime, SyncScheduler, UpdateError,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

mod shortcode;

pub use shortcode::{human_time_diff, render as render_reviews, ShortcodeAttrs};

pub const CRATE_NAME: &str = "rcreviews-web";

#[derive(Clone)]
pub struct AppState {
    pub runtime: SyncRuntime,
    pub scheduler: Option<Arc<SyncScheduler>>,
}

impl AppState {
    pub fn new(runtime: SyncRuntime) -> Self {
        Self {
            runtime,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<SyncScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/reviews", get(reviews_handler))
        .route("/admin/import/start", get(import_start_handler))
        .route("/admin/import", post(import_page_handler))
        .route("/admin/empty", post(empty_handler))
        .route("/admin/settings", get(settings_handler).post(update_settings_handler))
        .with_state(Arc::new(state))
}

/// Build the runtime, start the scheduler when enabled and serve until ctrl-c.
pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let port = config.web_port;
    let scheduler_enabled = config.scheduler_enabled;
    let runtime = SyncRuntime::from_config(config).await?;

    let mut state = AppState::new(runtime.clone());
    if scheduler_enabled {
        let settings = runtime.load_settings().await?;
        let scheduler = Arc::new(SyncScheduler::new(runtime.importer.clone()).await?);
        scheduler.start(settings.sync_interval_hours).await?;
        state = state.with_scheduler(scheduler);
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, scheduler_enabled, "serving reviews");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn reviews_handler(
    State(state): State<Arc<AppState>>,
    Query(attrs): Query<ShortcodeAttrs>,
) -> Response {
    let settings = match state.runtime.load_settings().await {
        Ok(settings) => settings,
        Err(err) => return server_error(err),
    };
    let result = match state
        .runtime
        .reviews
        .query(settings.post_type(), &attrs.to_query())
        .await
    {
        Ok(result) => result,
        Err(err) => return server_error(err.into()),
    };
    match render_reviews(&attrs, &result, Utc::now()) {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ImportStartQuery {
    #[serde(default = "full_mode")]
    mode: ImportMode,
}

fn full_mode() -> ImportMode {
    ImportMode::Full
}

async fn import_start_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportStartQuery>,
) -> Response {
    match state.runtime.importer.first_url(query.mode, Utc::now()).await {
        Ok(url) => Json(serde_json::json!({ "url_first": url })).into_response(),
        Err(err) => bad_request(format!("{err:#}")),
    }
}

#[derive(Debug, Deserialize)]
struct ImportPageForm {
    url: String,
    #[serde(default)]
    item_counter: u64,
}

#[derive(Debug, Serialize)]
struct ImportProgress {
    url_next: Option<ImportCursor>,
    last_import: String,
    item_counter: u64,
    total_posts: usize,
}

async fn import_page_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ImportPageForm>,
) -> Response {
    let cursor = ImportCursor::from(form.url.trim());
    if !state.runtime.importer.owns_cursor(&cursor) {
        return bad_request("url does not point at the configured API");
    }
    match state.runtime.importer.import_page(&cursor, form.item_counter).await {
        Ok(page) => Json(ImportProgress {
            url_next: page.url_next,
            last_import: page.last_import,
            item_counter: page.item_counter,
            total_posts: page.total_posts,
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn empty_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runtime.importer.empty().await {
        Ok(total_posts) => Json(serde_json::json!({ "total_posts": total_posts })).into_response(),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(flatten)]
    settings: Settings,
    post_type: String,
    last_import_display: Option<String>,
    total_posts: usize,
}

async fn settings_view(state: &AppState) -> anyhow::Result<SettingsView> {
    let settings = state.runtime.load_settings().await?;
    let total_posts = state.runtime.reviews.count(settings.post_type()).await?;
    Ok(SettingsView {
        post_type: settings.post_type().to_string(),
        last_import_display: settings.last_import_display(),
        settings: settings.redacted(),
        total_posts,
    })
}

async fn settings_handler(State(state): State<Arc<AppState>>) -> Response {
    match settings_view(&state).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => server_error(err),
    }
}

async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Form(update): Form<SettingsUpdate>,
) -> Response {
    let change = match apply_update(state.runtime.settings.as_ref(), update).await {
        Ok(change) => change,
        Err(UpdateError::Invalid(err)) => return bad_request(err.to_string()),
        Err(err) => return server_error(err.into()),
    };
    if change.post_type_changed {
        if let Err(err) =
            migrate_post_type(state.runtime.reviews.as_ref(), state.runtime.settings.as_ref()).await
        {
            return server_error(err.into());
        }
    }
    if change.interval_changed {
        if let Some(scheduler) = &state.scheduler {
            if let Err(err) = scheduler.reschedule(change.settings.sync_interval_hours).await {
                return server_error(err);
            }
        }
    }
    match settings_view(&state).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => server_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use rcreviews_adapters::FixtureSource;
    use rcreviews_core::{ApiAgent, ApiId, ApiPage, ApiReview};
    use rcreviews_storage::{HttpClientConfig, HttpFetcher, MemoryStore, SettingsStore};
    use rcreviews_sync::settings::option_names;
    use rcreviews_sync::StoredTokenProvider;
    use tower::ServiceExt;

    const BASE: &str = "https://api.test";

    fn review(agent: i64, name: &str, created: &str, rating: f64) -> ApiReview {
        ApiReview {
            rating: Some(rating),
            created_date: Some(created.into()),
            content: Some(format!("Thanks {name}")),
            agent: Some(ApiAgent {
                profile_id: Some(ApiId::Number(agent)),
                name: Some(name.into()),
            }),
            ..Default::default()
        }
    }

    async fn state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.set_option(option_names::AGENCY_ID, "AG1").await.unwrap();
        store
            .set_option(option_names::CLIENT_SECRET, "hunter2")
            .await
            .unwrap();
        let source = FixtureSource::new()
            .with_page(
                "https://api.test/p1",
                ApiPage::from_reviews(
                    vec![
                        review(1, "Kim", "2024-02-01T00:00:00Z", 5.0),
                        review(2, "Lee", "2024-01-01T00:00:00Z", 3.0),
                    ],
                    Some("https://api.test/p2"),
                ),
            )
            .with_page("https://api.test/p2", ApiPage::default());
        let config = SyncConfig {
            api_base: BASE.into(),
            ..SyncConfig::default()
        };
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let tokens = Arc::new(StoredTokenProvider::new(http, BASE, store.clone()));
        let runtime =
            SyncRuntime::with_source(config, store.clone(), store.clone(), tokens, Arc::new(source));
        (AppState::new(runtime), store)
    }

    async fn body_text(resp: Response) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(resp).await).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn form_req(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (state, _) = state().await;
        let resp = app(state).oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_listing_says_so() {
        let (state, _) = state().await;
        let resp = app(state).oneshot(get_req("/reviews")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("No reviews found."));
    }

    #[tokio::test]
    async fn import_start_returns_first_url() {
        let (state, _) = state().await;
        let resp = app(state)
            .oneshot(get_req("/admin/import/start?mode=full"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(
            json["url_first"],
            "https://api.test/customer-profile/v1/ratings-reviews/agencies/AG1\
             ?since=2010-09-06T12%3A27%3A00.1Z&order=DESC"
        );
    }

    #[tokio::test]
    async fn import_page_reports_progress_then_listing_filters() {
        let (state, _) = state().await;
        let router = app(state);

        let resp = router
            .clone()
            .oneshot(form_req(
                "/admin/import",
                "url=https%3A%2F%2Fapi.test%2Fp1&item_counter=0",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["url_next"], "https://api.test/p2");
        assert_eq!(json["item_counter"], 2);
        assert_eq!(json["total_posts"], 2);
        assert!(json["last_import"].as_str().unwrap().len() > 10);

        let html = body_text(router.clone().oneshot(get_req("/reviews")).await.unwrap()).await;
        assert!(html.contains("Thanks Kim"));
        assert!(!html.contains("Thanks Lee"));

        let html = body_text(
            router
                .oneshot(get_req("/reviews?min_stars=1&agent_name=Lee&listing_type=agency"))
                .await
                .unwrap(),
        )
        .await;
        assert!(html.contains("Thanks Lee"));
        assert!(!html.contains("Thanks Kim"));
        assert!(html.contains("rcreviews--agent-name"));
    }

    #[tokio::test]
    async fn import_rejects_foreign_urls() {
        let (state, _) = state().await;
        let resp = app(state)
            .oneshot(form_req("/admin/import", "url=https%3A%2F%2Fevil.test%2Fp1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_deletes_everything() {
        let (state, _) = state().await;
        let router = app(state);
        router
            .clone()
            .oneshot(form_req("/admin/import", "url=https%3A%2F%2Fapi.test%2Fp1"))
            .await
            .unwrap();
        let resp = router
            .oneshot(form_req("/admin/empty", ""))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["total_posts"], 0);
    }

    #[tokio::test]
    async fn settings_are_redacted_and_validated() {
        let (state, store) = state().await;
        let router = app(state);

        let json = body_json(router.clone().oneshot(get_req("/admin/settings")).await.unwrap()).await;
        assert_eq!(json["agency_id"], "AG1");
        assert_eq!(json["client_secret"], "********");
        assert_eq!(json["post_type"], "rcreviews");

        let resp = router
            .clone()
            .oneshot(form_req("/admin/settings", "sync_interval=6&minimum_star_rating=4"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["sync_interval_hours"], 6);
        assert_eq!(json["minimum_star_rating"], 4);

        let resp = router
            .oneshot(form_req("/admin/settings", "minimum_star_rating=11"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            store
                .get_option(option_names::MINIMUM_STAR_RATING)
                .await
                .unwrap()
                .as_deref(),
            Some("4")
        );
    }
}
