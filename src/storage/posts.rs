use super::schema::Database;
use super::types::{DatabaseError, Post};

/// Prune deletes run in small batches so a large backlog never produces one
/// statement with an unbounded IN list.
const PRUNE_CHUNK_SIZE: usize = 10;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Inserts posts, ignoring any whose `(feed_id, post_id)` already
    /// exists. Returns the number of rows actually written. Existing rows
    /// are never updated: a publisher editing an entry in place does not
    /// resurrect it as unread.
    pub async fn insert_posts(&self, posts: &[Post]) -> Result<usize, DatabaseError> {
        if posts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO posts
                    (feed_id, post_id, title, author, link, timestamp, description, content, read)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(post.feed_id)
            .bind(post.post_id)
            .bind(&post.title)
            .bind(&post.author)
            .bind(&post.link)
            .bind(post.timestamp)
            .bind(&post.description)
            .bind(&post.content)
            .bind(post.read)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Posts across the given feeds, ordered by timestamp. `include_read`
    /// false filters down to unread posts only.
    pub async fn posts_in_feeds(
        &self,
        feed_ids: &[i64],
        include_read: bool,
        ascending: bool,
    ) -> Result<Vec<Post>, DatabaseError> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; feed_ids.len()].join(", ");
        let sql = format!(
            "SELECT feed_id, post_id, title, author, link, timestamp, description, content, read \
             FROM posts WHERE feed_id IN ({}){} ORDER BY timestamp {}",
            placeholders,
            if include_read { "" } else { " AND read = 0" },
            if ascending { "ASC" } else { "DESC" },
        );

        let mut query = sqlx::query_as::<_, Post>(&sql);
        for id in feed_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn count_unread_posts(&self, feed_ids: &[i64]) -> Result<i64, DatabaseError> {
        if feed_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; feed_ids.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM posts WHERE feed_id IN ({}) AND read = 0",
            placeholders
        );

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for id in feed_ids {
            query = query.bind(id);
        }
        let (count,) = query.fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn set_read(
        &self,
        feed_id: i64,
        post_id: i64,
        read: bool,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE posts SET read = ? WHERE feed_id = ? AND post_id = ?")
            .bind(read)
            .bind(feed_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn toggle_read(&self, feed_id: i64, post_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE posts SET read = NOT read WHERE feed_id = ? AND post_id = ?")
            .bind(feed_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops a feed's oldest posts until at most `max_posts` remain.
    /// Retention is by timestamp, newest kept; deletes run in chunks of
    /// [`PRUNE_CHUNK_SIZE`]. Returns the number of posts deleted.
    pub async fn prune_posts(&self, feed_id: i64, max_posts: usize) -> Result<usize, DatabaseError> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT post_id FROM posts WHERE feed_id = ? ORDER BY timestamp DESC, post_id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        if ids.len() <= max_posts {
            return Ok(0);
        }

        let stale: Vec<i64> = ids[max_posts..].iter().map(|(id,)| *id).collect();
        for chunk in stale.chunks(PRUNE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM posts WHERE feed_id = ? AND post_id IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql).bind(feed_id);
            for id in chunk {
                query = query.bind(id);
            }
            query.execute(&self.pool).await?;
        }

        tracing::debug!(feed_id = feed_id, pruned = stale.len(), "Pruned old posts");
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Feed;

    fn post(feed_id: i64, post_id: i64, timestamp: i64) -> Post {
        Post {
            feed_id,
            post_id,
            title: format!("post {}", post_id),
            author: "(no author)".into(),
            link: String::new(),
            timestamp,
            description: String::new(),
            content: String::new(),
            read: false,
        }
    }

    async fn db_with_feed() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_feed(&Feed::new("https://a.example/feed", "A", "", ""))
            .await
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn test_insert_dedups_on_composite_key() {
        let (db, feed) = db_with_feed().await;

        let inserted = db
            .insert_posts(&[post(feed, 1, 100), post(feed, 2, 200)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        // Same ids again, one new
        let mut edited = post(feed, 1, 100);
        edited.title = "edited title".into();
        let inserted = db
            .insert_posts(&[edited, post(feed, 2, 200), post(feed, 3, 300)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        // The existing row was not updated by the ignored insert
        let posts = db.posts_in_feeds(&[feed], true, true).await.unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].title, "post 1");
    }

    #[tokio::test]
    async fn test_same_post_id_in_different_feeds() {
        let db = Database::open(":memory:").await.unwrap();
        let a = db
            .insert_feed(&Feed::new("https://a.example/feed", "A", "", ""))
            .await
            .unwrap();
        let b = db
            .insert_feed(&Feed::new("https://b.example/feed", "B", "", ""))
            .await
            .unwrap();

        let inserted = db
            .insert_posts(&[post(a, 7, 100), post(b, 7, 100)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn test_posts_ordered_by_timestamp() {
        let (db, feed) = db_with_feed().await;
        db.insert_posts(&[post(feed, 1, 300), post(feed, 2, 100), post(feed, 3, 200)])
            .await
            .unwrap();

        let desc = db.posts_in_feeds(&[feed], true, false).await.unwrap();
        let ids: Vec<_> = desc.iter().map(|p| p.post_id).collect();
        assert_eq!(ids, [1, 3, 2]);

        let asc = db.posts_in_feeds(&[feed], true, true).await.unwrap();
        let ids: Vec<_> = asc.iter().map(|p| p.post_id).collect();
        assert_eq!(ids, [2, 3, 1]);
    }

    #[tokio::test]
    async fn test_read_filter_and_counts() {
        let (db, feed) = db_with_feed().await;
        db.insert_posts(&[post(feed, 1, 100), post(feed, 2, 200)])
            .await
            .unwrap();

        db.set_read(feed, 1, true).await.unwrap();
        assert_eq!(db.count_unread_posts(&[feed]).await.unwrap(), 1);

        let unread = db.posts_in_feeds(&[feed], false, false).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].post_id, 2);

        db.toggle_read(feed, 1).await.unwrap();
        assert_eq!(db.count_unread_posts(&[feed]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let (db, feed) = db_with_feed().await;
        let posts: Vec<Post> = (0..25).map(|i| post(feed, i, i * 10)).collect();
        db.insert_posts(&posts).await.unwrap();

        let pruned = db.prune_posts(feed, 20).await.unwrap();
        assert_eq!(pruned, 5);

        let remaining = db.posts_in_feeds(&[feed], true, true).await.unwrap();
        assert_eq!(remaining.len(), 20);
        // The five oldest are gone
        assert!(remaining.iter().all(|p| p.post_id >= 5));
    }

    #[tokio::test]
    async fn test_prune_under_limit_is_noop() {
        let (db, feed) = db_with_feed().await;
        db.insert_posts(&[post(feed, 1, 100), post(feed, 2, 200)])
            .await
            .unwrap();

        assert_eq!(db.prune_posts(feed, 200).await.unwrap(), 0);
        assert_eq!(db.posts_in_feeds(&[feed], true, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_only_touches_target_feed() {
        let db = Database::open(":memory:").await.unwrap();
        let a = db
            .insert_feed(&Feed::new("https://a.example/feed", "A", "", ""))
            .await
            .unwrap();
        let b = db
            .insert_feed(&Feed::new("https://b.example/feed", "B", "", ""))
            .await
            .unwrap();

        db.insert_posts(&(0..30).map(|i| post(a, i, i)).collect::<Vec<_>>())
            .await
            .unwrap();
        db.insert_posts(&(0..30).map(|i| post(b, i, i)).collect::<Vec<_>>())
            .await
            .unwrap();

        db.prune_posts(a, 10).await.unwrap();
        assert_eq!(db.posts_in_feeds(&[a], true, true).await.unwrap().len(), 10);
        assert_eq!(db.posts_in_feeds(&[b], true, true).await.unwrap().len(), 30);
    }
}
