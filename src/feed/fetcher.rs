//! Feed fetching and ingestion orchestration.
//!
//! One refresh of a feed is: download the document (following redirects by
//! hand), compare a hash of its prefix against the hash stored from the
//! last parse, and only on change parse + insert + prune. Feeds whose
//! servers re-serve identical documents cost one HTTP round-trip and one
//! hash per poll, nothing more.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use url::Url;

use crate::feed::parser::parse_feed;
use crate::storage::{Database, Feed};
use crate::util::hash_to_i64;

/// Redirect hops before a fetch is abandoned.
const MAX_REDIRECTS: usize = 10;

/// How much of the document participates in change detection. Characters,
/// not bytes: the slice boundary must never split a multibyte sequence.
const HASH_PREFIX_CHARS: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while refreshing one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The feed URL (or a redirect target) could not be parsed.
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// Network-level error (DNS, connection, TLS, timeout).
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP response with a status we don't handle.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    /// Redirect chain exceeded [`MAX_REDIRECTS`] hops.
    #[error("Too many redirects")]
    TooManyRedirects,

    /// Feed XML could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Database operation failed during ingestion.
    #[error("Database error: {0}")]
    Database(String),
}

impl FetchError {
    /// Short, non-technical phrasing for end-user surfaces. The split that
    /// matters to a user is whether the feed arrived but was unreadable, or
    /// never arrived at all.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::Parse(_) => "failed to parse feed",
            _ => "couldn't load feed",
        }
    }
}

/// What a refresh did for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// Document hash matched the stored hash; nothing was parsed.
    Unchanged,
    /// Document changed and was ingested; `inserted` counts rows actually
    /// written (entries already present dedup to zero).
    Updated { inserted: usize },
}

/// Outcome of refreshing one feed, tagged with the feed for correlation.
pub struct RefreshOutcome {
    pub feed_id: i64,
    pub result: Result<RefreshStatus, FetchError>,
}

/// Builds the HTTP client used for feed fetches.
///
/// Automatic redirect following is disabled: redirects are handled manually
/// in [`download`] so the hop limit and target resolution stay under our
/// control.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("sift/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Refreshes every feed with bounded concurrency.
///
/// Failures are isolated per feed: one unreachable server or broken
/// document never aborts the rest of the batch. Results come back in
/// completion order.
pub async fn refresh_all(
    db: &Database,
    client: &reqwest::Client,
    feeds: &[Feed],
    max_posts_per_feed: usize,
    concurrency: usize,
) -> Vec<RefreshOutcome> {
    if feeds.is_empty() {
        return Vec::new();
    }

    stream::iter(feeds.iter().cloned())
        .map(|feed| {
            let db = db.clone();
            let client = client.clone();
            async move {
                let result = fetch_one(&db, &client, &feed, max_posts_per_feed).await;
                match &result {
                    Ok(RefreshStatus::Unchanged) => {
                        tracing::debug!(feed = %feed.url, "Feed unchanged");
                    }
                    Ok(RefreshStatus::Updated { inserted }) => {
                        tracing::info!(feed = %feed.url, inserted = inserted, "Feed refreshed");
                    }
                    Err(e) => {
                        tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                    }
                }
                RefreshOutcome {
                    feed_id: feed.id,
                    result,
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Refreshes a single feed end to end.
///
/// The stored content hash is updated as soon as a changed document is
/// seen, before parsing: a document that fails to parse is not re-parsed
/// on every poll until its content actually changes again.
pub async fn fetch_one(
    db: &Database,
    client: &reqwest::Client,
    feed: &Feed,
    max_posts_per_feed: usize,
) -> Result<RefreshStatus, FetchError> {
    let document = download(client, &feed.url).await?;

    let hash = content_hash(&document);
    if hash == feed.content_hash {
        return Ok(RefreshStatus::Unchanged);
    }
    db.update_feed_hash(feed.id, hash)
        .await
        .map_err(|e| FetchError::Database(e.to_string()))?;

    let posts =
        parse_feed(feed.id, document.trim()).map_err(|e| FetchError::Parse(e.to_string()))?;

    let inserted = db
        .insert_posts(&posts)
        .await
        .map_err(|e| FetchError::Database(e.to_string()))?;

    db.prune_posts(feed.id, max_posts_per_feed)
        .await
        .map_err(|e| FetchError::Database(e.to_string()))?;

    Ok(RefreshStatus::Updated { inserted })
}

/// Downloads a document, following 3xx redirects manually up to
/// [`MAX_REDIRECTS`] hops. Relative `Location` values are resolved against
/// the URL that issued them.
async fn download(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let mut current = Url::parse(url).map_err(|e| FetchError::MalformedUrl(e.to_string()))?;

    for _ in 0..=MAX_REDIRECTS {
        let response = client.get(current.clone()).send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(FetchError::HttpStatus(status.as_u16()))?;
            current = current
                .join(location)
                .map_err(|e| FetchError::MalformedUrl(e.to_string()))?;
            tracing::debug!(target_url = %current, status = status.as_u16(), "Following redirect");
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        return Ok(response.text().await?);
    }

    Err(FetchError::TooManyRedirects)
}

/// Hashes the first [`HASH_PREFIX_CHARS`] characters of a document.
/// Prefixes are enough: feed documents embed per-request noise rarely, and
/// when entries change the top of the document changes with them.
fn content_hash(document: &str) -> i64 {
    let prefix_end = document
        .char_indices()
        .nth(HASH_PREFIX_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(document.len());
    hash_to_i64(&document[..prefix_end])
}
