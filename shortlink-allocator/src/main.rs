//! Range allocator service.
//!
//! Central range-vending endpoint: any number of edge minters POST
//! `/allocate` and receive disjoint id blocks. All allocation logic
//! (atomic INCRBY, primary/secondary failover, size validation) lives
//! in `shortlink_core::service::RangeAllocator`; this binary is the
//! HTTP shell.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use shortlink_core::{
    bootstrap::{init_redis, load_config},
    logging, metrics,
    service::{IdRange, RangeAllocator},
    Error,
};

#[derive(Debug, Deserialize)]
struct AllocateRequest {
    size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AllocateResponse {
    start: i64,
    end: i64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    primary: &'static str,
    secondary: &'static str,
}

struct AppState {
    allocator: RangeAllocator,
    default_block_size: i64,
}

async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AllocateRequest>,
) -> Response {
    let size = request.size.unwrap_or(state.default_block_size);

    match state.allocator.allocate(size).await {
        Ok(IdRange { start, end }) => Json(AllocateResponse { start, end }).into_response(),
        Err(Error::InvalidInput(detail)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": detail })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("allocation failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "detail": "allocation backends unavailable" })),
            )
                .into_response()
        }
    }
}

/// Serviceable while either backing KV answers.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (primary_ok, secondary_ok) = state.allocator.backend_health().await;
    let healthy = primary_ok || secondary_ok;

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        primary: if primary_ok { "ok" } else { "down" },
        secondary: if secondary_ok { "ok" } else { "down" },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn serve_metrics() -> String {
    metrics::render()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;
    info!("shortlink allocator starting...");

    let timeout = config.redis.connect_timeout_seconds;
    let primary = init_redis(&config.allocator.primary_kv_url, timeout).await?;
    let secondary = init_redis(&config.allocator.secondary_kv_url, timeout).await?;
    info!("allocator KV backends connected");

    let allocator = RangeAllocator::new(
        primary,
        secondary,
        config.allocator.key.clone(),
        config.allocator.max_block,
    );
    let state = Arc::new(AppState {
        allocator,
        default_block_size: config.allocator.block_size,
    });

    let app = Router::new()
        .route("/allocate", post(allocate))
        .route("/health", get(health))
        .route("/metrics", get(serve_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
