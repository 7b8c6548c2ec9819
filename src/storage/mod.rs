mod feeds;
mod posts;
mod schema;
mod types;

pub use schema::Database;
pub use types::{is_feed_entry_valid, DatabaseError, Feed, Post, DEFAULT_CATEGORY};
