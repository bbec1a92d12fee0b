//! Database connection and pool management.
//!
//! Sqlite via sqlx. The pool is sized above the harvest concurrency bound so
//! that contention surfaces as retryable lock-wait timeouts rather than pool
//! exhaustion; the busy-timeout pragma puts a deadline on those waits.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::infrastructure::config::DatabaseConfig;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db_path = config
            .url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(url = %config.url, max_connections = config.max_connections, "database connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema. Idempotent; nothing is ever deleted by the
    /// pipeline, so there are no destructive statements here.
    pub async fn migrate(&self) -> Result<()> {
        migrate_pool(&self.pool).await
    }
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    let create_parts_sql = r#"
        CREATE TABLE IF NOT EXISTS parts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            price INTEGER NOT NULL,
            image_url TEXT,
            star_rating REAL,
            review_count INTEGER,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
    "#;

    let create_part_spec_sql = r#"
        CREATE TABLE IF NOT EXISTS part_spec (
            part_id INTEGER NOT NULL UNIQUE,
            attributes TEXT NOT NULL,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (part_id) REFERENCES parts (id)
        )
    "#;

    let create_enrichment_sql = r#"
        CREATE TABLE IF NOT EXISTS enrichment_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            part_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            dedupe_key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (part_id) REFERENCES parts (id),
            UNIQUE (part_id, source, dedupe_key)
        )
    "#;

    sqlx::query(create_parts_sql).execute(pool).await?;
    sqlx::query(create_part_spec_sql).execute(pool).await?;
    sqlx::query(create_enrichment_sql).execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_parts_category ON parts (category)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enrichment_part ON enrichment_results (part_id, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connect_and_migrate_creates_the_schema() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", db_path.display()),
            max_connections: 2,
            busy_timeout_ms: 500,
        };

        let db = Database::connect(&config).await?;
        db.migrate().await?;
        // migrate twice: must be idempotent
        db.migrate().await?;

        for table in ["parts", "part_spec", "enrichment_results"] {
            let found = sqlx::query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_optional(db.pool())
            .await?;
            assert!(found.is_some(), "missing table {table}");
        }
        Ok(())
    }
}
