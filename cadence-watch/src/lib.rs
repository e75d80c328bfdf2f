//! # cadence-watch
//!
//! Job-board watching for cadence.
//!
//! Runs every configured scraper kind concurrently, merges what they find,
//! and records each posting in a SQLite dedup store so a listing is reported
//! as new at most once per person. The caller gets back a rendered HTML
//! report (or nothing) and decides whether to email it.
//!
//! ## Design
//!
//! - One task per scraper kind; each scraper walks its own specs sequentially
//! - Kind-level failures are logged and contribute nothing; the run continues
//! - Dedup happens after every kind has settled, in one transaction
//! - Three run modes: render new postings, render everything, or ingest only
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> cadence_watch::Result<()> {
//! use cadence_watch::{ScraperConfig, WatchSettings};
//! use serde_json::json;
//!
//! let configs = vec![ScraperConfig::new("lever", "lever:acme")
//!     .with_param("list_url", json!("https://jobs.lever.co/acme"))];
//! let settings = WatchSettings::new("sam", configs).with_sqlite_path("/tmp/watch.db");
//! if let Some(report) = cadence_watch::run_once(&settings).await? {
//!     println!("{}", report.html);
//! }
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod registry;
pub mod render;
pub mod scraper;
pub mod scrapers;
pub mod store;
pub mod types;

pub use activity::{ActivitySink, MemorySink, TracingSink};
pub use config::{ScraperConfig, WatchSettings};
pub use engine::{run_once, RunMode, WatchEngine};
pub use error::{Result, WatchError};
pub use registry::{default_registry, ScraperRegistry};
pub use scraper::{Scraper, ScraperLookup};
pub use store::PostingStore;
pub use types::{Posting, PostingsBySource, ScrapeResult, WatchReport};
