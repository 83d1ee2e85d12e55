//! Startup wiring: configuration, connection pools, service graph.

use anyhow::Result;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cache::RedisUrlCache;
use crate::repository::UrlRepository;
use crate::service::{
    url::UrlServiceOptions, CodeMinter, HttpRangeSource, KafkaClickPublisher, UrlService,
};
use crate::Config;

/// Load configuration, honoring `SHORTLINK_CONFIG` as the file path.
pub fn load_config() -> Result<Config> {
    let config_file = std::env::var("SHORTLINK_CONFIG").ok();
    let config = Config::load(config_file.as_deref())?;
    Ok(config)
}

/// Initialize database connection pool
///
/// Note: Migrations are run separately by the edge binary.
pub async fn init_database(config: &Config) -> Result<PgPool> {
    info!("Connecting to database");

    let pool: PgPool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow::anyhow!("Database connection failed: {}", e)
        })?;

    info!("Database connected");
    Ok(pool)
}

/// Open a managed Redis connection (reconnects internally) with a
/// per-operation response deadline.
pub async fn init_redis(url: &str, timeout_seconds: u64) -> Result<ConnectionManager> {
    let client = redis::Client::open(url)
        .map_err(|e| anyhow::anyhow!("Invalid Redis URL: {e}"))?;
    let timeout = Duration::from_secs(timeout_seconds);
    let conn = ConnectionManager::new_with_backoff_and_timeouts(client, 2, 100, 6, timeout, timeout)
        .await
        .map_err(|e| anyhow::anyhow!("Redis connection failed: {e}"))?;
    Ok(conn)
}

/// Writer + replica cache connections as one `RedisUrlCache`.
pub async fn init_url_cache(config: &Config) -> Result<RedisUrlCache> {
    let timeout = config.redis.connect_timeout_seconds;
    let writer = init_redis(&config.redis.url, timeout).await?;
    let reader = init_redis(config.redis.reader_url(), timeout).await?;
    info!("Cache connections ready (writer + reader)");
    Ok(RedisUrlCache::new(writer, reader, config.cache.clone()))
}

/// Container for the edge handler's wired services.
#[derive(Clone)]
pub struct Services {
    pub url_service: UrlService,
    pub repository: UrlRepository,
    pub cache: Arc<RedisUrlCache>,
}

/// Wire the edge service graph: repository, cache, click publisher,
/// minter, handler.
pub async fn init_services(pool: PgPool, config: &Config) -> Result<Services> {
    info!("Initializing services...");

    let repository = UrlRepository::new(pool);
    let cache = Arc::new(init_url_cache(config).await?);

    let publisher_conn = init_redis(&config.redis.url, config.redis.connect_timeout_seconds).await?;
    let publisher = Arc::new(KafkaClickPublisher::new(
        &config.kafka,
        &config.ingestion,
        publisher_conn,
    )?);
    info!("Click publisher ready (topic: {})", config.kafka.click_topic);

    let range_source = Arc::new(HttpRangeSource::new(config.allocator.url.clone())?);
    let minter = Arc::new(CodeMinter::new(
        range_source,
        config.allocator.block_size,
        config.allocator.code_length,
    ));
    info!(
        "Code minter ready (block size: {}, code length: {})",
        config.allocator.block_size, config.allocator.code_length
    );

    let url_service = UrlService::new(
        Arc::new(repository.clone()),
        cache.clone(),
        publisher,
        minter,
        UrlServiceOptions {
            mint_retries: config.allocator.mint_retries,
            lock_retry_count: config.cache.lock_retry_count,
            lock_retry_delay: Duration::from_millis(config.cache.lock_retry_delay_ms),
        },
    );

    info!("Services initialized");
    Ok(Services {
        url_service,
        repository,
        cache,
    })
}
