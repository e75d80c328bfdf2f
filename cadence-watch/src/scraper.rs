//! The contract every scraper kind implements.
//!
//! A scraper walks its own specs one at a time (so per-tenant politeness
//! delays stay inside the scraper) and reports expected failures through
//! [`ScrapeResult::errors`]. Returning `Err` is reserved for conditions that
//! make the whole kind unusable; the engine logs those and moves on.

use crate::config::ScraperConfig;
use crate::error::Result;
use crate::types::ScrapeResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A pluggable job-board scraper.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Kind string this scraper registers under.
    fn kind(&self) -> &'static str;

    /// Implementation identity, used to tell a harmless re-registration
    /// apart from a conflicting one.
    fn implementation(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Scrape every spec in `specs` for `person`.
    ///
    /// # Errors
    ///
    /// Only for kind-wide failures. Per-target problems belong in the
    /// returned results' `errors`.
    async fn run(
        &self,
        person: &str,
        specs: &[ScraperConfig],
        skip_network: bool,
    ) -> Result<Vec<ScrapeResult>>;
}

/// Resolves a kind string to a scraper implementation.
pub trait ScraperLookup: Send + Sync {
    fn lookup(&self, kind: &str) -> Option<Arc<dyn Scraper>>;
}

impl<F> ScraperLookup for F
where
    F: Fn(&str) -> Option<Arc<dyn Scraper>> + Send + Sync,
{
    fn lookup(&self, kind: &str) -> Option<Arc<dyn Scraper>> {
        self(kind)
    }
}
