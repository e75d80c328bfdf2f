//! Zero-network scraper for tests and dry runs.
//!
//! Each spec's params may contain `items` (`[{title, url}]`) and `errors`
//! (`[string]` or a single value). One result is produced per spec.

use crate::config::ScraperConfig;
use crate::error::Result;
use crate::scraper::Scraper;
use crate::types::{Posting, ScrapeResult};
use async_trait::async_trait;
use serde_json::Value;

/// Deterministic scraper fed entirely from its params.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubScraper;

fn field(item: &serde_json::Map<String, Value>, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl Scraper for StubScraper {
    fn kind(&self) -> &'static str {
        "stub"
    }

    async fn run(
        &self,
        person: &str,
        specs: &[ScraperConfig],
        _skip_network: bool,
    ) -> Result<Vec<ScrapeResult>> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut items = Vec::new();
            if let Some(Value::Array(raw)) = spec.params.get("items") {
                for item in raw.iter().filter_map(Value::as_object) {
                    let url = field(item, "url");
                    if url.is_empty() {
                        continue;
                    }
                    let title = match field(item, "title") {
                        t if t.is_empty() => "(no title)".to_owned(),
                        t => t,
                    };
                    items.push(Posting::new(&spec.source, person, title, url));
                }
            }

            let errors = match spec.params.get("errors") {
                Some(Value::Array(raw)) => raw
                    .iter()
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
                    .collect(),
                Some(Value::Null) | None => Vec::new(),
                Some(Value::String(s)) => vec![s.clone()],
                Some(other) => vec![other.to_string()],
            };

            results.push(ScrapeResult {
                source: spec.source.clone(),
                items,
                errors,
            });
        }
        Ok(results)
    }
}
