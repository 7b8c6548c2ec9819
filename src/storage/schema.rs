use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY. Set via pragma() so every
        // connection in the pool inherits it.
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        // An in-memory SQLite database exists per connection: pooling more
        // than one would hand each caller a different empty database.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Run schema migrations atomically within a transaction. Every
    /// statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                html_url TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT 'Uncategorized',
                content_hash INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // The composite key is the whole dedup story: re-ingesting a
        // document INSERT OR IGNOREs against it. No foreign key on feed_id;
        // post deletion is explicit (delete_feed, prune_posts) and an
        // insert racing a prune is acceptable rather than a hard failure.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                feed_id INTEGER NOT NULL,
                post_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                link TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                description TEXT NOT NULL,
                content TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (feed_id, post_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Covers both timeline reads and retention pruning, which filter by
        // feed_id and order by timestamp.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_feed_timestamp ON posts(feed_id, timestamp DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
