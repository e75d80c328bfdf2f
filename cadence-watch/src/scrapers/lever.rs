//! Lever job boards (`jobs.lever.co/<tenant>`).
//!
//! Params per config entry:
//! - `start_urls`: `[url, source]` pairs or `{url, source}` objects, one per tenant
//! - `list_url`: single board URL, labelled with the entry's own source
//! - `delay_seconds`: pause between tenants (default 3.0)
//! - `query`: case-insensitive title substring filter
//! - `exclude`: category substrings to drop (default on-site, onsite, internship)

use super::{parse_targets, selector, Target};
use crate::config::ScraperConfig;
use crate::error::{Result, WatchError};
use crate::http::{self, RetryPolicy};
use crate::scraper::Scraper;
use crate::types::{Posting, ScrapeResult};
use async_trait::async_trait;
use scraper::Html;
use url::Url;

const DEFAULT_DELAY_SECONDS: f64 = 3.0;
const DEFAULT_EXCLUDE: &[&str] = &["on-site", "onsite", "internship"];

/// Scraper for Lever-hosted career pages.
#[derive(Debug, Clone)]
pub struct LeverScraper {
    retry: RetryPolicy,
}

impl Default for LeverScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl LeverScraper {
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn scrape_target(
        &self,
        client: &reqwest::Client,
        target: &Target,
        person: &str,
        filter: &Filter,
    ) -> Result<Vec<Posting>> {
        let base = Url::parse(&target.url)
            .map_err(|e| WatchError::Config(format!("invalid list url '{}': {e}", target.url)))?;
        let response = http::send_with_retry(client.get(base.clone()), self.retry).await?;
        let html = response
            .text()
            .await
            .map_err(|e| WatchError::Http(format!("Lever response read failed: {e}")))?;
        tracing::trace!(bytes = html.len(), source = %target.source, "Lever page received");

        Ok(parse_lever_html(&html, &base, filter)?
            .into_iter()
            .map(|(title, url)| Posting::new(&target.source, person, title, url))
            .collect())
    }
}

/// Title and category filters for one config entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct Filter {
    /// Lowercased title substring.
    pub query: Option<String>,
    /// Lowercased category substrings.
    pub exclude: Vec<String>,
}

impl Filter {
    fn from_spec(spec: &ScraperConfig) -> Self {
        let exclude = spec
            .str_list_param("exclude")
            .unwrap_or_else(|| DEFAULT_EXCLUDE.iter().map(|s| (*s).to_owned()).collect());
        Self {
            query: spec.str_param("query").map(str::to_lowercase),
            exclude: exclude.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn keeps(&self, title: &str, categories: &str) -> bool {
        if let Some(query) = &self.query {
            if !title.to_lowercase().contains(query) {
                return false;
            }
        }
        let categories = categories.to_lowercase();
        !self.exclude.iter().any(|ex| categories.contains(ex.as_str()))
    }
}

#[async_trait]
impl Scraper for LeverScraper {
    fn kind(&self) -> &'static str {
        "lever"
    }

    async fn run(
        &self,
        person: &str,
        specs: &[ScraperConfig],
        skip_network: bool,
    ) -> Result<Vec<ScrapeResult>> {
        if skip_network {
            return Ok(Vec::new());
        }
        let client = http::build_client()?;
        let mut results = Vec::new();

        for spec in specs {
            let mut targets = parse_targets(spec.params.get("start_urls"), None);
            if targets.is_empty() {
                if let Some(list_url) = spec.str_param("list_url") {
                    targets.push(Target {
                        url: list_url.to_owned(),
                        source: spec.source.clone(),
                        payload: Default::default(),
                    });
                }
            }
            if targets.is_empty() {
                results.push(ScrapeResult::failed(
                    &spec.source,
                    format!("{}: no start_urls or list_url configured", spec.source),
                ));
                continue;
            }

            let delay = spec.f64_param("delay_seconds", DEFAULT_DELAY_SECONDS);
            let filter = Filter::from_spec(spec);

            for (idx, target) in targets.iter().enumerate() {
                if idx > 0 {
                    http::polite_delay(delay).await;
                }
                let result = match self.scrape_target(&client, target, person, &filter).await {
                    Ok(items) => ScrapeResult {
                        source: target.source.clone(),
                        items,
                        errors: Vec::new(),
                    },
                    Err(e) => ScrapeResult::failed(&target.source, format!("{}: {e}", target.source)),
                };
                results.push(result);
            }
        }
        Ok(results)
    }
}

/// Parse a Lever listing page into `(title, absolute url)` pairs.
///
/// Extracted as a separate function for testability with mock HTML.
pub(crate) fn parse_lever_html(html: &str, base: &Url, filter: &Filter) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let posting_sel = selector("div.postings-group a.posting-title")?;
    let title_sel = selector(r#"h5[data-qa="posting-name"]"#)?;
    let categories_sel = selector("div.posting-categories")?;

    let mut out = Vec::new();
    for anchor in document.select(&posting_sel) {
        let Some(href) = anchor.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let Ok(url) = base.join(href) else {
            continue;
        };
        let title = anchor
            .select(&title_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_owned())
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        let categories = anchor
            .select(&categories_sel)
            .next()
            .map(|el| el.text().map(str::trim).filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if !filter.keeps(&title, &categories) {
            continue;
        }
        out.push((title, url.to_string()));
    }

    tracing::debug!(count = out.len(), "Lever postings parsed");
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MOCK_LEVER_HTML: &str = r#"<!DOCTYPE html>
<html><body>
<div class="postings-group">
  <div class="posting">
    <a class="posting-title" href="https://jobs.lever.co/acme/1111">
      <h5 data-qa="posting-name">Senior Rust Engineer</h5>
      <div class="posting-categories">
        <span>Remote</span> <span>Engineering</span> <span>Full-time</span>
      </div>
    </a>
  </div>
  <div class="posting">
    <a class="posting-title" href="/acme/2222">
      <h5 data-qa="posting-name">Summer Internship</h5>
      <div class="posting-categories"><span>Internship</span></div>
    </a>
  </div>
  <div class="posting">
    <a class="posting-title" href="/acme/3333">
      <h5 data-qa="posting-name">Site Reliability Engineer</h5>
      <div class="posting-categories"><span>Boston</span><span>On-site</span></div>
    </a>
  </div>
  <div class="posting">
    <a class="posting-title" href="/acme/4444">
      <h5 data-qa="posting-name">Data Engineer</h5>
    </a>
  </div>
  <div class="posting">
    <a class="posting-title" href="/acme/5555"><h5 data-qa="posting-name">  </h5></a>
  </div>
</div>
<a class="posting-title" href="/acme/outside"><h5 data-qa="posting-name">Not in a group</h5></a>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://jobs.lever.co/acme?team=Engineering").unwrap()
    }

    fn default_filter() -> Filter {
        Filter::from_spec(&ScraperConfig::new("lever", "lever:acme"))
    }

    #[test]
    fn parses_and_applies_default_excludes() {
        let parsed = parse_lever_html(MOCK_LEVER_HTML, &base(), &default_filter()).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("Senior Rust Engineer".to_string(), "https://jobs.lever.co/acme/1111".to_string()),
                ("Data Engineer".to_string(), "https://jobs.lever.co/acme/4444".to_string()),
            ]
        );
    }

    #[test]
    fn query_filters_titles() {
        let spec = ScraperConfig::new("lever", "lever:acme")
            .with_param("query", json!("RUST"))
            .with_param("exclude", json!([]));
        let parsed = parse_lever_html(MOCK_LEVER_HTML, &base(), &Filter::from_spec(&spec)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "Senior Rust Engineer");
    }

    #[test]
    fn empty_exclude_keeps_everything_titled() {
        let spec = ScraperConfig::new("lever", "lever:acme").with_param("exclude", json!([]));
        let parsed = parse_lever_html(MOCK_LEVER_HTML, &base(), &Filter::from_spec(&spec)).unwrap();
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn empty_page_yields_nothing() {
        let parsed = parse_lever_html("<html></html>", &base(), &default_filter()).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn one_result_per_tenant_with_errors_captured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_LEVER_HTML))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/globex"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let spec = ScraperConfig::new("lever", "lever")
            .with_param(
                "start_urls",
                json!([
                    [format!("{}/acme", server.uri()), "lever:acme"],
                    {"url": format!("{}/globex", server.uri()), "source": "lever:globex"}
                ]),
            )
            .with_param("delay_seconds", json!(0));

        let scraper = LeverScraper::new().with_retry(RetryPolicy::immediate(1));
        let results = scraper.run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "lever:acme");
        assert_eq!(results[0].items.len(), 2);
        assert_eq!(results[0].items[1].url, format!("{}/acme/4444", server.uri()));
        assert!(results[0].errors.is_empty());
        assert_eq!(results[1].source, "lever:globex");
        assert!(results[1].items.is_empty());
        assert!(results[1].errors[0].starts_with("lever:globex: "));
    }

    #[tokio::test]
    async fn list_url_uses_spec_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_LEVER_HTML))
            .mount(&server)
            .await;
        let spec = ScraperConfig::new("lever", "lever:acme")
            .with_param("list_url", json!(format!("{}/acme", server.uri())));
        let results = LeverScraper::new().run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "lever:acme");
    }

    #[tokio::test]
    async fn missing_targets_reported_as_error() {
        let spec = ScraperConfig::new("lever", "lever:empty");
        let results = LeverScraper::new().run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].errors[0].contains("no start_urls"));
    }

    #[tokio::test]
    async fn skip_network_returns_nothing() {
        let spec = ScraperConfig::new("lever", "lever:acme").with_param("list_url", json!("https://jobs.lever.co/acme"));
        assert!(LeverScraper::new().run("sam", &[spec], true).await.unwrap().is_empty());
    }
}
