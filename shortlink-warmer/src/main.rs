//! Cache warmer binary.
//!
//! Periodically refreshes the hottest URL snapshots in the shared
//! cache so mass expiry never turns into a stampede on the database.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use shortlink_core::{
    bootstrap::{init_database, init_url_cache, load_config},
    logging,
    repository::UrlRepository,
    service::CacheWarmer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;
    info!("shortlink cache warmer starting...");

    let pool = init_database(&config).await?;
    let repository = UrlRepository::new(pool);
    let cache = Arc::new(init_url_cache(&config).await?);

    let warmer = CacheWarmer::new(
        Arc::new(repository),
        cache,
        config.warmer.clone(),
    );
    warmer.run().await;

    Ok(())
}
