use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::CONFIG;
use crate::filter::FilterError;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Unique constraint violated on {table}.{column}")]
    UniqueViolation { table: String, column: String },

    #[error("No unit of work is open on this session")]
    NoTransaction,

    #[error("Row {key} in {table} was removed by a concurrent commit")]
    StaleRow { table: String, key: String },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Read DATABASE_URL from the environment
pub fn database_url() -> Result<String, DatabaseError> {
    std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))
}

/// Open a Postgres pool sized from `CONFIG.database`
pub async fn connect(url: &str) -> Result<PgPool, DatabaseError> {
    let settings = &CONFIG.database;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.connection_timeout))
        .connect(url)
        .await?;

    info!(
        "Created database pool (max {} connections, {}s acquire timeout)",
        settings.max_connections, settings.connection_timeout
    );
    Ok(pool)
}

/// Connect using DATABASE_URL
pub async fn connect_from_env() -> Result<PgPool, DatabaseError> {
    connect(&database_url()?).await
}

/// Pings the pool to ensure connectivity
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
