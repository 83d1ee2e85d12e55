mod migrations;
mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use shortlink_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};

use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    // Anchor the uptime clock to process start
    let _ = shortlink_core::SERVER_START_TIME.elapsed();
    info!("shortlink edge starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database
    let pool = init_database(&config).await?;

    // 4. Run migrations (serialized across concurrent edges)
    migrations::run_migrations(&pool).await?;

    // 5. Wire services
    let services = init_services(pool, &config).await?;

    // 6. Serve
    let state = Arc::new(AppState {
        services,
        config: config.clone(),
    });
    let app = server::router(state);

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
