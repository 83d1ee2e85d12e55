//! HTTP surface of the edge instance.
//!
//! Thin handlers over `UrlService`; all redirect/shorten semantics
//! live in the core crate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use shortlink_core::{bootstrap::Services, metrics, models::Url, Config, Error};

pub struct AppState {
    pub services: Services,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/shorten", post(shorten))
        .route("/api/stats/:code", get(stats))
        .route("/health", get(health))
        .route("/metrics", get(serve_metrics))
        .route("/:code", get(redirect))
        .with_state(state)
}

// ─── request/response payloads ───

#[derive(Debug, Deserialize)]
struct ShortenRequest {
    url: String,
    custom_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct UrlResponse {
    id: i64,
    short_code: String,
    original_url: String,
    short_url: String,
    clicks: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UrlResponse {
    fn from_url(url: Url, base_url: &str) -> Self {
        Self {
            short_url: format!("{}/{}", base_url, url.short_code),
            id: url.id,
            short_code: url.short_code,
            original_url: url.original_url,
            clicks: url.clicks,
            created_at: url.created_at,
            updated_at: url.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    cache: &'static str,
    uptime_seconds: u64,
}

// ─── error mapping ───

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::AlreadyExists(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::Exhausted(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable".to_string(),
            ),
            e if e.is_transient() => {
                tracing::warn!("dependency outage: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service temporarily unavailable".to_string(),
                )
            }
            other => {
                tracing::error!("internal error: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

// ─── handlers ───

async fn shorten(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ShortenRequest>,
) -> Result<(StatusCode, Json<UrlResponse>), ApiError> {
    let url = state
        .services
        .url_service
        .shorten(&request.url, request.custom_code.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UrlResponse::from_url(url, &state.config.server.base_url)),
    ))
}

/// 307 preserves the request method across the redirect.
async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Redirect, ApiError> {
    let payload = state.services.url_service.redirect(&code).await?;
    Ok(Redirect::temporary(&payload.original_url))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<UrlResponse>, ApiError> {
    let url = state.services.url_service.stats(&code).await?;
    Ok(Json(UrlResponse::from_url(
        url,
        &state.config.server.base_url,
    )))
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = sqlx::query("SELECT 1")
        .execute(state.services.repository.pool())
        .await
        .is_ok();
    let cache_ok = state.services.cache.ping().await;

    // Degraded cache is survivable (the store still answers); a dead
    // database is not.
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if database_ok { "healthy" } else { "unhealthy" },
        database: if database_ok { "ok" } else { "down" },
        cache: if cache_ok { "ok" } else { "down" },
        uptime_seconds: shortlink_core::SERVER_START_TIME.elapsed().as_secs(),
    };
    (status, Json(body))
}

async fn serve_metrics() -> String {
    metrics::render()
}
