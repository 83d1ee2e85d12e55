use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

/// Well-known advisory lock id guarding schema setup. Concurrent edge
/// startups serialize on it so only one instance runs the DDL.
const MIGRATION_LOCK_ID: i64 = 0x7368_6f72_746c_6e6b; // "shortlnk"

/// Run database migrations under a Postgres advisory lock.
///
/// The lock is session-scoped on a dedicated connection: waiters block
/// in `pg_advisory_lock` until the winner commits the schema, then
/// re-run `migrate!` as a no-op.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let mut lock_conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *lock_conn)
        .await?;

    let result = sqlx::migrate!("../migrations").run(pool).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *lock_conn)
        .await
        .ok();

    result.map_err(|e| {
        error!("Failed to run migrations: {}", e);
        anyhow::anyhow!("Migration failed: {e}")
    })?;

    info!("Migrations completed");
    Ok(())
}
