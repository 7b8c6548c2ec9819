use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sift::config::Config;
use sift::feed::{self, RefreshStatus};
use sift::storage::{is_feed_entry_valid, Database, Feed, DEFAULT_CATEGORY};

#[derive(Parser, Debug)]
#[command(name = "sift", about = "Headless RSS/Atom feed ingestion engine", version)]
struct Args {
    /// Path to the config file (defaults to ~/.config/sift/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        /// Display name (defaults to the URL until the feed is fetched)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
    },
    /// Unsubscribe from a feed and delete its posts
    Remove { id: i64 },
    /// List subscribed feeds with unread counts
    List,
    /// Import subscriptions from an OPML file
    Import { file: PathBuf },
    /// Export subscriptions to an OPML file, or to stdout when no file is
    /// given
    Export { file: Option<PathBuf> },
    /// Fetch feeds and ingest new posts
    Refresh {
        /// Refresh only these feed ids (defaults to every feed)
        #[arg(long = "feed", value_name = "ID")]
        feed_ids: Vec<i64>,
    },
}

fn config_path(args: &Args) -> Result<PathBuf> {
    if let Some(path) = &args.config {
        return Ok(path.clone());
    }
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("sift")
        .join("config.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&config_path(&args)?)?;
    let db = Database::open(&config.database).await?;

    match args.command {
        Command::Add {
            url,
            name,
            category,
        } => {
            let name = name.unwrap_or_else(|| url.clone());
            if !is_feed_entry_valid(&url, &name) {
                anyhow::bail!("Feed URL and name must be non-blank");
            }
            let id = db
                .insert_feed(&Feed::new(url.clone(), name, String::new(), category))
                .await?;
            println!("Added feed {} (id {})", url, id);
        }

        Command::Remove { id } => match db.get_feed(id).await? {
            Some(existing) => {
                db.delete_feed(existing.id).await?;
                println!("Removed feed {}", existing.url);
            }
            None => anyhow::bail!("No feed with id {}", id),
        },

        Command::List => {
            let feeds = db.get_all_feeds().await?;
            if feeds.is_empty() {
                println!("No feeds. Add one with `sift add <url>`.");
            }
            for feed in feeds {
                let unread = db.count_unread_posts(&[feed.id]).await?;
                println!(
                    "{:>4}  {} ({} unread) [{}]",
                    feed.id, feed.name, unread, feed.category
                );
            }
        }

        Command::Import { file } => {
            let path = file.to_str().context("Invalid UTF-8 in OPML path")?;
            let entries = feed::import_from_file(path).await?;
            let mut imported = 0;
            for entry in &entries {
                if !is_feed_entry_valid(&entry.url, &entry.name) {
                    tracing::warn!(url = %entry.url, "Skipping invalid OPML entry");
                    continue;
                }
                db.insert_feed(entry).await?;
                imported += 1;
            }
            println!("Imported {} feeds from {}", imported, file.display());
        }

        Command::Export { file } => {
            let feeds = db.get_all_feeds().await?;
            match file {
                Some(file) => {
                    feed::export_to_file(&feeds, &file)?;
                    println!("Exported {} feeds to {}", feeds.len(), file.display());
                }
                None => print!("{}", feed::export_opml(&feeds)?),
            }
        }

        Command::Refresh { feed_ids } => {
            let feeds = if feed_ids.is_empty() {
                db.get_all_feeds().await?
            } else {
                db.get_feeds(&feed_ids).await?
            };
            if feeds.is_empty() {
                println!("No feeds to refresh.");
                return Ok(());
            }

            let client = feed::build_client()?;
            let outcomes = feed::refresh_all(
                &db,
                &client,
                &feeds,
                config.max_posts_per_feed,
                config.fetch_concurrency,
            )
            .await;

            let mut inserted_total = 0;
            let mut unchanged = 0;
            let mut failures = Vec::new();
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(RefreshStatus::Updated { inserted }) => inserted_total += inserted,
                    Ok(RefreshStatus::Unchanged) => unchanged += 1,
                    Err(e) => failures.push((outcome.feed_id, e)),
                }
            }

            println!(
                "Refreshed {} feeds: {} new posts, {} unchanged, {} failed",
                outcomes.len(),
                inserted_total,
                unchanged,
                failures.len()
            );
            for (feed_id, error) in &failures {
                let name = feeds
                    .iter()
                    .find(|f| f.id == *feed_id)
                    .map(|f| f.name.as_str())
                    .unwrap_or("?");
                eprintln!("  {}: {} ({})", name, error.user_message(), error);
            }
        }
    }

    Ok(())
}
