//! Headless RSS/Atom feed ingestion engine.
//!
//! sift subscribes to feeds, polls them with content-hash change gating,
//! normalizes the RSS/Atom/RDF dialect zoo into uniform post records, and
//! keeps per-feed retention bounded. Subscriptions round-trip through OPML.
//! State lives in SQLite; the `sift` binary is a thin CLI over this crate.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
