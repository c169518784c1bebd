// Migration Runner

use mediaflow_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Ordered migrations; the index + 1 is the schema version
const MIGRATIONS: &[(&str, &str)] = &[(
    "001: Initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Run database migrations, returns the resulting schema version
pub async fn run_migrations(pool: &SqlitePool) -> Result<i64> {
    info!("Running database migrations...");

    let current_version = current_version(pool).await?;
    info!("Current schema version: {}", current_version);

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if current_version < version {
            info!("Applying migration {}", name);
            apply_migration(pool, sql).await?;
        }
    }

    let version = MIGRATIONS.len() as i64;
    info!(version, "All migrations applied successfully");
    Ok(version)
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    // Check if schema_version table exists
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(migration_error)?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(migration_error)?;
    Ok(version.unwrap_or(0))
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    // Execute migration in a transaction
    let mut tx = pool.begin().await.map_err(migration_error)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        // Remove comments and trim
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(migration_error)?;
        }
    }

    tx.commit().await.map_err(migration_error)?;
    Ok(())
}

fn migration_error(err: sqlx::Error) -> AppError {
    AppError::Database(format!("migration failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let version = run_migrations(&pool).await.unwrap();
        assert_eq!(version, 1);

        // Check that tables exist
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert_ok!(run_migrations(&pool).await);
        assert_eq!(assert_ok!(run_migrations(&pool).await), 1);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
