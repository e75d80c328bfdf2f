//! Core value types shared by scrapers, the dedup store and the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A discovered job listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Posting {
    /// Per-tenant label, e.g. `lever:acme`.
    pub source: String,
    /// Person the watch runs for.
    pub person: String,
    pub title: String,
    pub url: String,
}

impl Posting {
    pub fn new(
        source: impl Into<String>,
        person: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            person: person.into(),
            title: title.into(),
            url: url.into(),
        }
    }

    /// Dedup key: `(source, person, title, url)` with surrounding whitespace removed.
    pub fn fingerprint(&self) -> (&str, &str, &str, &str) {
        (
            self.source.trim(),
            self.person.trim(),
            self.title.trim(),
            self.url.trim(),
        )
    }

    /// Copy of this posting with every field trimmed.
    pub fn trimmed(&self) -> Self {
        let (source, person, title, url) = self.fingerprint();
        Self::new(source, person, title, url)
    }
}

/// Output of one scraper invocation, typically one tenant or target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub source: String,
    pub items: Vec<Posting>,
    /// Expected, per-target failures (HTTP errors, empty boards, bad params).
    pub errors: Vec<String>,
}

impl ScrapeResult {
    /// Empty result for `source`.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Result carrying a single error and no items.
    pub fn failed(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            items: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

/// Postings keyed by source, sorted by source name.
pub type PostingsBySource = BTreeMap<String, Vec<Posting>>;

/// Group postings by their `source`, keeping discovery order within a source.
pub fn group_by_source<'a>(postings: impl IntoIterator<Item = &'a Posting>) -> PostingsBySource {
    let mut grouped = PostingsBySource::new();
    for posting in postings {
        grouped
            .entry(posting.source.clone())
            .or_default()
            .push(posting.clone());
    }
    grouped
}

/// Total number of postings across all sources.
pub fn total_postings(by_source: &PostingsBySource) -> usize {
    by_source.values().map(Vec::len).sum()
}

/// Rendered email body plus run metadata, as returned by
/// [`crate::engine::run_once`] when there is something to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchReport {
    pub html: String,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl WatchReport {
    /// Subject line stored in `meta["subject"]`, if any.
    pub fn subject(&self) -> Option<&str> {
        self.meta.get("subject").and_then(serde_json::Value::as_str)
    }
}
