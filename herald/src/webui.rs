//! Minimal read-only HTTP surface (SPEC_FULL.md §3). Grounded on the
//! teacher's `server.rs` route-handler style (`AppState` managed state,
//! `#[get(...)]` handlers returning `Json<T>`), but with every write
//! route, the JWT/argon2 auth layer, and the `rocket_ws` chat surface
//! dropped — there is no counterpart to any of them in spec.md.

use std::sync::Arc;
use std::time::Instant;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, routes, Build, Rocket, State};
use serde::Serialize;

use crate::engine::Engine;

/// Rocket managed state: one shared Engine handle, plus process start time
/// for the uptime figure in `/api/v1/status`.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct FeedResponse {
    id: i64,
    url: String,
    title: String,
    last_fetched: Option<String>,
    last_error: Option<String>,
    article_count: i64,
}

#[get("/api/v1/feeds?<user_id>")]
async fn feeds(state: &State<AppState>, user_id: i64) -> Result<Json<Vec<FeedResponse>>, Status> {
    let stats = state.engine.feed_stats_for_user(user_id).await.map_err(|e| {
        tracing::error!(error = %e, "webui: failed to list feed stats");
        Status::InternalServerError
    })?;

    let feeds = stats
        .into_iter()
        .map(|s| FeedResponse {
            id: s.feed.id,
            url: s.feed.url,
            title: s.feed.title,
            last_fetched: s.feed.last_fetched.map(|t| t.to_rfc3339()),
            last_error: s.feed.last_error,
            article_count: s.article_count,
        })
        .collect();

    Ok(Json(feeds))
}

#[derive(Serialize)]
struct ArticleResponse {
    id: i64,
    feed_id: i64,
    title: String,
    url: String,
    published_at: Option<String>,
}

#[get("/api/v1/articles?<user_id>&<feed_id>&<limit>")]
async fn articles(
    state: &State<AppState>,
    user_id: i64,
    feed_id: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<Vec<ArticleResponse>>, Status> {
    let articles = state
        .engine
        .list_unread(user_id, feed_id, false, limit.unwrap_or(50), 0)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "webui: failed to list articles");
            Status::InternalServerError
        })?;

    let body = articles
        .into_iter()
        .map(|a| ArticleResponse {
            id: a.id,
            feed_id: a.feed_id,
            title: a.title,
            url: a.url,
            published_at: a.published_at.map(|t| t.to_rfc3339()),
        })
        .collect();

    Ok(Json(body))
}

/// Build the Rocket instance (not launched); the caller decides whether
/// and when to `.launch()` it, matching the teacher's split between
/// building the `rocket::custom(...)` value and `.launch().await`ing it.
pub fn build(engine: Arc<Engine>) -> Rocket<Build> {
    let state = AppState {
        engine,
        started_at: Instant::now(),
    };
    rocket::build().manage(state).mount("/", routes![status, feeds, articles])
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Config;
    use rocket::local::asynchronous::Client;

    async fn test_engine() -> Arc<Engine> {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = ":memory:"
            [read_only]
            enabled = true
            "#,
        )
        .unwrap();
        let pool = common::init_db_pool(":memory:").await.unwrap();
        let store = crate::store::Store::open(pool).await.unwrap();
        Arc::new(Engine::new(store, config).unwrap())
    }

    #[rocket::async_test]
    async fn status_route_reports_ok() {
        let engine = test_engine().await;
        let rocket = build(engine);
        let client = Client::tracked(rocket).await.unwrap();
        let response = client.get("/api/v1/status").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        assert!(body.contains("\"ok\""));
    }

    #[rocket::async_test]
    async fn feeds_route_returns_empty_list_for_fresh_user() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let rocket = build(engine);
        let client = Client::tracked(rocket).await.unwrap();
        let response = client.get(format!("/api/v1/feeds?user_id={}", user.id)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "[]");
    }
}
