use thiserror::Error;

/// Category assigned to feeds with no explicit grouping. Every feed belongs
/// to exactly one category; this is the fallback, not an absence marker.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// One ingested feed entry.
///
/// Identity is the composite `(feed_id, post_id)` — `post_id` comes from the
/// entry's guid/id element when present, otherwise it is synthesized by the
/// parser from the title and timestamp. That pair is the sole deduplication
/// key at the storage boundary: inserts are INSERT OR IGNORE.
///
/// `read` is the only field mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Post {
    pub feed_id: i64,
    pub post_id: i64,
    pub title: String,
    pub author: String,
    pub link: String,
    /// Epoch milliseconds; 0 when the entry's date was missing or unparseable.
    pub timestamp: i64,
    /// HTML-stripped summary, at most 300 characters.
    pub description: String,
    /// Full body; may contain HTML.
    pub content: String,
    pub read: bool,
}

/// One subscribed source.
///
/// `id` is 0 until the row is inserted (SQLite assigns the rowid).
/// `content_hash` is the hash of the first 1000 characters of the last feed
/// document that was actually parsed; 0 means "never fetched".
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub html_url: String,
    pub category: String,
    pub content_hash: i64,
}

impl Feed {
    /// A not-yet-persisted feed with no content hash.
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        html_url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            url: url.into(),
            name: name.into(),
            html_url: html_url.into(),
            category: category.into(),
            content_hash: 0,
        }
    }
}

/// Returns true if the fields constitute a valid feed entry.
///
/// A plain boolean check, not an error path: callers (manual entry forms,
/// importers) are expected to test this before handing a feed to the store.
pub fn is_feed_entry_valid(url: &str, name: &str) -> bool {
    !url.trim().is_empty() && !name.trim().is_empty()
}
