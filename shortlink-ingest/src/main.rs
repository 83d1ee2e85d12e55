//! Click ingestion worker binary.
//!
//! Joins the `click_ingestion` consumer group and runs the
//! aggregate/flush loop from `shortlink_core::ingest`. Run one process
//! per desired consumer; partition assignment balances automatically
//! up to the topic's partition count.

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::info;

use shortlink_core::{
    bootstrap::{init_database, init_redis, init_url_cache, load_config},
    ingest::{IngestWorker, OlapSink},
    logging, metrics,
    repository::UrlRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;

    let consumer_name = config.consumer_name();
    info!(consumer = %consumer_name, "shortlink ingestion worker starting...");

    // Metrics endpoint for lag/flush observability.
    let metrics_addr = config.http_address();
    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(|| async { metrics::render() }));
        match tokio::net::TcpListener::bind(&metrics_addr).await {
            Ok(listener) => {
                info!("metrics server on {metrics_addr}");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("metrics server failed: {e}");
                }
            }
            Err(e) => tracing::error!("metrics server bind failed: {e}"),
        }
    });

    let pool = init_database(&config).await?;
    let repository = UrlRepository::new(pool);

    let redis = init_redis(&config.redis.url, config.redis.connect_timeout_seconds).await?;
    let cache = Arc::new(init_url_cache(&config).await?);
    let olap = OlapSink::new(config.olap.clone())?;

    let worker = IngestWorker::new(
        &config.kafka,
        config.ingestion.clone(),
        consumer_name,
        redis,
        Arc::new(repository),
        cache,
        olap,
    )?;

    worker.run().await?;
    Ok(())
}
