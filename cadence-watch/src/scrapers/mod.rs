//! Built-in scraper implementations.

pub mod avature;
pub mod icims;
pub mod lever;
pub mod stub;
pub mod workday;

pub use avature::AvatureScraper;
pub use icims::IcimsScraper;
pub use lever::LeverScraper;
pub use stub::StubScraper;
pub use workday::WorkdayCxsScraper;

use crate::config::ScraperConfig;
use crate::error::{Result, WatchError};
use scraper::{ElementRef, Selector};
use serde_json::Value;

/// A `(url, source)` target parsed from scraper params.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Target {
    pub url: String,
    pub source: String,
    /// Extra JSON body fields (Workday only).
    pub payload: serde_json::Map<String, Value>,
}

/// Parse `[url, source, payload?]` pairs or `{url, source, payload}` objects.
///
/// Entries without a url are dropped; a missing source falls back to
/// `default_source` when one is given.
pub(crate) fn parse_targets(raw: Option<&Value>, default_source: Option<&str>) -> Vec<Target> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    let text = |v: Option<&Value>| -> String {
        match v {
            Some(Value::String(s)) => s.trim().to_owned(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };

    let mut targets = Vec::new();
    for item in items {
        let (url, source, payload) = match item {
            Value::Array(parts) => (
                text(parts.first()),
                text(parts.get(1)),
                parts.get(2).and_then(Value::as_object).cloned(),
            ),
            Value::Object(obj) => (
                text(
                    obj.get("url")
                        .or_else(|| obj.get("search_url"))
                        .or_else(|| obj.get("list_url"))
                        .or_else(|| obj.get("cxs_url")),
                ),
                text(obj.get("source").or_else(|| obj.get("source_label"))),
                obj.get("payload").and_then(Value::as_object).cloned(),
            ),
            Value::String(url) => (url.trim().to_owned(), String::new(), None),
            _ => continue,
        };
        let source = match (source.is_empty(), default_source) {
            (false, _) => source,
            (true, Some(fallback)) => fallback.trim().to_owned(),
            (true, None) => continue,
        };
        if url.is_empty() || source.is_empty() {
            continue;
        }
        targets.push(Target {
            url,
            source,
            payload: payload.unwrap_or_default(),
        });
    }
    targets
}

/// `start_urls` targets, else a single `search_url`/`list_url` labelled with
/// the `source` param or the entry's own source.
pub(crate) fn html_targets(spec: &ScraperConfig) -> Vec<Target> {
    let targets = parse_targets(spec.params.get("start_urls"), None);
    if !targets.is_empty() {
        return targets;
    }
    let url = spec.str_param("search_url").or_else(|| spec.str_param("list_url"));
    let source = spec
        .str_param("source")
        .or_else(|| spec.str_param("source_label"))
        .unwrap_or_else(|| spec.source.trim());
    match url {
        Some(url) if !source.is_empty() => vec![Target {
            url: url.to_owned(),
            source: source.to_owned(),
            payload: Default::default(),
        }],
        _ => Vec::new(),
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| WatchError::Parse(format!("invalid selector '{css}': {e:?}")))
}

/// Visible text of `el`, whitespace-collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased list param. Strings are split on commas.
pub(crate) fn lowercase_list(spec: &ScraperConfig, key: &str) -> Vec<String> {
    spec.str_list_param(key)
        .unwrap_or_default()
        .iter()
        .flat_map(|item| item.split(','))
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_search_url_falls_back_to_entry_source() {
        let spec = ScraperConfig::new("avature", "mantech:remote")
            .with_param("search_url", json!("https://mantech.avature.net/careers/SearchJobs"));
        let targets = html_targets(&spec);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].source, "mantech:remote");

        let labelled = spec.with_param("source", json!("mantech:labelled"));
        assert_eq!(html_targets(&labelled)[0].source, "mantech:labelled");
        assert!(html_targets(&ScraperConfig::new("avature", "x")).is_empty());
    }

    #[test]
    fn lowercase_list_splits_commas() {
        let spec = ScraperConfig::new("icims", "x")
            .with_param("filters", json!("Engineer, Developer ,,"))
            .with_param("excludes", json!(["Intern", "entry level, Co-op"]));
        assert_eq!(lowercase_list(&spec, "filters"), vec!["engineer", "developer"]);
        assert_eq!(lowercase_list(&spec, "excludes"), vec!["intern", "entry level", "co-op"]);
        assert!(lowercase_list(&spec, "missing").is_empty());
    }

    #[test]
    fn object_targets_accept_search_url() {
        let raw = json!([{"search_url": "https://x.icims.com/jobs/search", "source": "x:all"}]);
        assert_eq!(parse_targets(Some(&raw), None)[0].url, "https://x.icims.com/jobs/search");
    }

    #[test]
    fn parses_pairs_objects_and_strings() {
        let raw = json!([
            ["https://jobs.lever.co/acme", "lever:acme"],
            {"url": "https://jobs.lever.co/globex", "source": "lever:globex"},
            "https://jobs.lever.co/initech",
            ["https://jobs.lever.co/nosource"],
            {"source": "lever:nourl"},
            42
        ]);
        let targets = parse_targets(Some(&raw), None);
        let labels: Vec<&str> = targets.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(labels, vec!["lever:acme", "lever:globex"]);

        let with_default = parse_targets(Some(&raw), Some("lever:default"));
        assert_eq!(with_default.len(), 4);
        assert_eq!(with_default[2].source, "lever:default");
    }

    #[test]
    fn keeps_payload() {
        let raw = json!([["https://x/wday/cxs/x/Site/jobs", "workday:x", {"searchText": "rust"}]]);
        let targets = parse_targets(Some(&raw), None);
        assert_eq!(targets[0].payload["searchText"], json!("rust"));
    }

    #[test]
    fn missing_or_wrong_shape_is_empty() {
        assert!(parse_targets(None, None).is_empty());
        assert!(parse_targets(Some(&json!("x")), None).is_empty());
    }
}
