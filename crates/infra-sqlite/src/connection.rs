// SQLite Connection Pool Setup

use mediaflow_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Create SQLite connection pool with WAL mode and optimizations
///
/// In-memory URLs get a single connection: every new connection would see
/// its own empty database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = is_memory_url(database_url);

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url {}: {}", database_url, e)))?
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let max_connections = if in_memory { 1 } else { 10 };
    let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
    if in_memory {
        // Closing the only connection drops the database
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    debug!(database_url, max_connections, "SQLite pool ready");
    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
