//! Invoice storage: connection pool setup and the store contract.

pub mod error;
pub mod invoice_store;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info};

use self::error::DatabaseError;

/// Database pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Initialize the database connection pool and verify connectivity.
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("failed to initialize database pool: {e}");
            DatabaseError::from_sqlx(e)
        })?;

    // Fail fast at startup rather than on the first request.
    pool.acquire().await.map_err(|e| {
        log_error!("failed to acquire test connection: {e}");
        DatabaseError::from_sqlx(e)
    })?;

    info!("database pool initialized");
    Ok(pool)
}
