use crate::error::DbError;
use configuration::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Resolves the database URL: the configured value first, then `DATABASE_URL`.
pub fn database_url(config: &DatabaseConfig) -> Option<String> {
    config
        .url
        .clone()
        .or_else(|| env::var("DATABASE_URL").ok())
        .filter(|url| !url.trim().is_empty())
}

/// Establishes a connection pool to the PostgreSQL database.
pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations so the reconciliation tables exist.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
