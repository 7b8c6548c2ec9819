use super::schema::Database;
use super::types::{DatabaseError, Feed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Inserts a feed, returning its id. The URL is the identity: inserting
    /// a URL that already exists is a no-op and returns the existing row's
    /// id, so importers can re-run over the same OPML freely.
    pub async fn insert_feed(&self, feed: &Feed) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO feeds (url, name, html_url, category, content_hash)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.name)
        .bind(&feed.html_url)
        .bind(&feed.category)
        .bind(feed.content_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(result.last_insert_rowid());
        }

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(&feed.url)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Updates a feed's editable fields (everything but id and hash).
    pub async fn update_feed(&self, feed: &Feed) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE feeds SET url = ?, name = ?, html_url = ?, category = ?
            WHERE id = ?
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.name)
        .bind(&feed.html_url)
        .bind(&feed.category)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records the content hash of the last document seen for a feed.
    pub async fn update_feed_hash(&self, feed_id: i64, hash: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET content_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a feed and all of its posts. There is no foreign-key
    /// cascade; the post delete is explicit.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, url, name, html_url, category, content_hash FROM feeds WHERE id = ?",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, url, name, html_url, category, content_hash FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Fetches the given feeds, ordered by name case-insensitively. Unknown
    /// ids are silently absent from the result.
    pub async fn get_feeds(&self, feed_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; feed_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, url, name, html_url, category, content_hash FROM feeds \
             WHERE id IN ({}) ORDER BY name COLLATE NOCASE",
            placeholders
        );

        let mut query = sqlx::query_as::<_, Feed>(&sql);
        for id in feed_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    /// All feeds, ordered by name case-insensitively.
    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT id, url, name, html_url, category, content_hash FROM feeds \
             ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }
}
