//! Avature career sites (`<tenant>.avature.net/.../SearchJobs`).
//!
//! Pages with `jobOffset` in steps of `jobRecordsPerPage` until the declared
//! total is reached, a page comes back empty or a page is short.
//!
//! Params per config entry:
//! - `start_urls`: `[url, source]` pairs or `{url, source}` objects
//! - `search_url` / `list_url`: single search, labelled with `source` or the entry's source
//! - `query`: case-insensitive title substring filter
//! - `per_page`: overrides `jobRecordsPerPage` (default: the URL's value, else 500)
//! - `delay_seconds`: pause between pages and tenants (default 2.0)

use super::{element_text, html_targets, selector, Target};
use crate::config::ScraperConfig;
use crate::error::{Result, WatchError};
use crate::http::{self, RetryPolicy};
use crate::scraper::Scraper;
use crate::types::{Posting, ScrapeResult};
use async_trait::async_trait;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use url::Url;

const DEFAULT_DELAY_SECONDS: f64 = 2.0;
const DEFAULT_PER_PAGE: u64 = 500;
const PER_PAGE_KEY: &str = "jobRecordsPerPage";
const OFFSET_KEY: &str = "jobOffset";

const CONTAINERS: &[&str] = &[".results--grided", ".section__content__results", "main"];
const LINKS: &[&str] = &[
    "h3 a.link",
    ".article__header__text__title a",
    "a[href*='/JobDetail/']",
];

/// Scraper for Avature-hosted job searches.
#[derive(Debug, Clone)]
pub struct AvatureScraper {
    retry: RetryPolicy,
}

impl Default for AvatureScraper {
    fn default() -> Self {
        Self::new()
    }
}

/// One parsed listing page.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct AvaturePage {
    /// Result count from the list legend, when present.
    pub total: Option<u64>,
    pub jobs: Vec<(String, String)>,
}

impl AvatureScraper {
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
        spec: &ScraperConfig,
    ) -> ScrapeResult {
        let mut result = ScrapeResult::empty(&target.source);
        let search = match Url::parse(&target.url) {
            Ok(url) => url,
            Err(e) => {
                result
                    .errors
                    .push(format!("{}: invalid search url '{}': {e}", target.source, target.url));
                return result;
            }
        };
        let per_page = match spec.u64_param("per_page", 0) {
            0 => url_per_page(&search).unwrap_or(DEFAULT_PER_PAGE),
            n => n,
        };
        let query = spec.str_param("query").map(str::to_lowercase);
        let delay = spec.f64_param("delay_seconds", DEFAULT_DELAY_SECONDS);

        let mut offset = 0u64;
        let mut total = u64::MAX;
        loop {
            if offset > 0 {
                http::polite_delay(delay).await;
            }
            let url = page_url(&search, per_page, offset);
            let page = match self.fetch(client, &url).await.and_then(|html| {
                parse_avature_html(&html, &url, query.as_deref())
            }) {
                Ok(page) => page,
                Err(e) => {
                    result.errors.push(format!("{}: offset {offset}: {e}", target.source));
                    break;
                }
            };
            if offset == 0 {
                total = page.total.unwrap_or(u64::MAX);
                tracing::info!(source = %target.source, declared_total = ?page.total, per_page, "Avature search opened");
            }

            let count = page.jobs.len() as u64;
            result.items.extend(
                page.jobs
                    .into_iter()
                    .map(|(title, url)| Posting::new(&target.source, person, title, url)),
            );
            offset = offset.saturating_add(per_page);
            if count == 0 || count < per_page || offset >= total {
                break;
            }
        }

        tracing::info!(source = %target.source, count = result.items.len(), "Avature postings collected");
        result
    }

    async fn fetch(&self, client: &reqwest::Client, url: &Url) -> Result<String> {
        let request = client
            .get(url.clone())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Upgrade-Insecure-Requests", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate");
        http::send_with_retry(request, self.retry)
            .await?
            .text()
            .await
            .map_err(|e| WatchError::Http(format!("Avature response read failed: {e}")))
    }
}

#[async_trait]
impl Scraper for AvatureScraper {
    fn kind(&self) -> &'static str {
        "avature"
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
            let targets = html_targets(spec);
            if targets.is_empty() {
                results.push(ScrapeResult::failed(
                    &spec.source,
                    format!("{}: no start_urls or search_url configured", spec.source),
                ));
                continue;
            }
            let delay = spec.f64_param("delay_seconds", DEFAULT_DELAY_SECONDS);

            for (idx, target) in targets.iter().enumerate() {
                if idx > 0 {
                    http::polite_delay(delay).await;
                }
                results.push(self.scrape_target(&client, target, person, spec).await);
            }
        }
        Ok(results)
    }
}

fn url_per_page(url: &Url) -> Option<u64> {
    url.query_pairs()
        .find(|(k, _)| k == PER_PAGE_KEY)
        .and_then(|(_, v)| v.trim().parse().ok())
        .filter(|n| *n > 0)
}

/// `search` with paging pairs applied: `listFilterMode` defaults to 1,
/// `jobRecordsPerPage` is forced, `jobOffset` is set past the first page.
fn page_url(search: &Url, per_page: u64, offset: u64) -> Url {
    let mut pairs: Vec<(String, String)> = search
        .query_pairs()
        .filter(|(k, _)| k != PER_PAGE_KEY && k != OFFSET_KEY)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.iter().any(|(k, _)| k == "listFilterMode") {
        pairs.push(("listFilterMode".into(), "1".into()));
    }
    pairs.push((PER_PAGE_KEY.into(), per_page.to_string()));
    if offset > 0 {
        pairs.push((OFFSET_KEY.into(), offset.to_string()));
    }
    let mut url = search.clone();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url
}

/// Largest number in the list legend ("1-20 of 57" → 57).
fn legend_total(document: &Html) -> Result<Option<u64>> {
    let legend_sel = selector(".list-controls__text__legend")?;
    let Some(legend) = document.select(&legend_sel).next() else {
        return Ok(None);
    };
    let text = element_text(legend);
    Ok(text
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|n| n.parse::<u64>().ok())
        .max())
}

/// Parse one Avature results page.
///
/// Links are taken from the first results container present, across the
/// known card layouts, deduplicated on `(href, title)`.
pub(crate) fn parse_avature_html(html: &str, page: &Url, query: Option<&str>) -> Result<AvaturePage> {
    let document = Html::parse_document(html);
    let total = legend_total(&document)?;

    let mut container: ElementRef<'_> = document.root_element();
    for css in CONTAINERS {
        if let Some(found) = document.select(&selector(css)?).next() {
            container = found;
            break;
        }
    }

    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    for css in LINKS {
        for anchor in container.select(&selector(css)?) {
            let title = element_text(anchor);
            let href = anchor.value().attr("href").map(str::trim).unwrap_or_default();
            if title.is_empty() || href.is_empty() {
                continue;
            }
            if let Some(query) = query {
                if !title.to_lowercase().contains(query) {
                    continue;
                }
            }
            if !seen.insert((href.to_owned(), title.clone())) {
                continue;
            }
            let Ok(url) = page.join(href) else {
                continue;
            };
            jobs.push((title, url.to_string()));
        }
    }

    tracing::debug!(count = jobs.len(), ?total, "Avature cards parsed");
    Ok(AvaturePage { total, jobs })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cards(start: usize, n: usize) -> String {
        let articles: String = (start..start + n)
            .map(|i| {
                format!(
                    r#"<article class="article"><div class="article__header__text__title">
                         <a class="link" href="/careers/JobDetail/Job-{i}/{i}">Systems Engineer {i}</a>
                       </div></article>"#
                )
            })
            .collect();
        format!(
            r#"<html><body>
<nav><a href="/careers/JobDetail/Nav/0">Featured job</a></nav>
<div class="list-controls__text__legend">1-2 of 3 results</div>
<div class="section__content__results">{articles}</div>
</body></html>"#
        )
    }

    fn page() -> Url {
        Url::parse("https://mantech.avature.net/en_US/careers/SearchJobs/?1328=%5B7006%5D").unwrap()
    }

    #[test]
    fn parses_cards_inside_results_container() {
        let parsed = parse_avature_html(&cards(0, 2), &page(), None).unwrap();
        assert_eq!(parsed.total, Some(3));
        assert_eq!(
            parsed.jobs,
            vec![
                (
                    "Systems Engineer 0".to_string(),
                    "https://mantech.avature.net/careers/JobDetail/Job-0/0".to_string()
                ),
                (
                    "Systems Engineer 1".to_string(),
                    "https://mantech.avature.net/careers/JobDetail/Job-1/1".to_string()
                ),
            ]
        );
    }

    #[test]
    fn h3_links_and_query_filter() {
        let html = r#"<main>
            <h3><a class="link" href="https://mantech.avature.net/careers/JobDetail/A/1">Cyber Analyst</a></h3>
            <h3><a class="link" href="/careers/JobDetail/B/2">Network Engineer</a></h3>
            <a href="/careers/JobDetail/B/2">Network Engineer</a>
            <a href="/careers/About">About us</a>
        </main>"#;
        let all = parse_avature_html(html, &page(), None).unwrap();
        assert_eq!(all.total, None);
        assert_eq!(all.jobs.len(), 2);

        let filtered = parse_avature_html(html, &page(), Some("engineer")).unwrap();
        assert_eq!(filtered.jobs.len(), 1);
        assert_eq!(filtered.jobs[0].1, "https://mantech.avature.net/careers/JobDetail/B/2");
    }

    #[test]
    fn paging_pairs_are_applied() {
        let first = page_url(&page(), 2, 0);
        let pairs: Vec<(String, String)> = first.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert_eq!(
            pairs,
            vec![
                ("1328".to_string(), "[7006]".to_string()),
                ("listFilterMode".to_string(), "1".to_string()),
                ("jobRecordsPerPage".to_string(), "2".to_string()),
            ]
        );
        let second = page_url(&first, 2, 2);
        assert_eq!(second.query_pairs().filter(|(k, _)| k == "jobRecordsPerPage").count(), 1);
        assert!(second.query_pairs().any(|(k, v)| k == "jobOffset" && v == "2"));
    }

    #[test]
    fn per_page_comes_from_url() {
        let url = Url::parse("https://x.avature.net/SearchJobs?jobRecordsPerPage=25").unwrap();
        assert_eq!(url_per_page(&url), Some(25));
        assert_eq!(url_per_page(&page()), None);
    }

    #[tokio::test]
    async fn follows_offsets_up_to_declared_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers/SearchJobs"))
            .and(query_param("jobOffset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(cards(2, 1)))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/careers/SearchJobs"))
            .and(query_param("jobRecordsPerPage", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(cards(0, 2)))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ScraperConfig::new("avature", "mantech:remote")
            .with_param(
                "search_url",
                json!(format!("{}/careers/SearchJobs?jobRecordsPerPage=2", server.uri())),
            )
            .with_param("delay_seconds", json!(0));

        let scraper = AvatureScraper::new().with_retry(RetryPolicy::immediate(1));
        let results = scraper.run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "mantech:remote");
        assert!(results[0].errors.is_empty(), "{:?}", results[0].errors);
        let titles: Vec<&str> = results[0].items.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Systems Engineer 0", "Systems Engineer 1", "Systems Engineer 2"]);
    }

    #[tokio::test]
    async fn first_page_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let spec = ScraperConfig::new("avature", "avature").with_param(
            "start_urls",
            json!([[format!("{}/careers/SearchJobs", server.uri()), "bae:remote"]]),
        );
        let scraper = AvatureScraper::new().with_retry(RetryPolicy::immediate(1));
        let results = scraper.run("sam", &[spec], false).await.unwrap();
        assert_eq!(results[0].source, "bae:remote");
        assert!(results[0].items.is_empty());
        assert!(results[0].errors[0].starts_with("bae:remote: offset 0: "));
    }

    #[tokio::test]
    async fn skip_network_returns_nothing() {
        let spec = ScraperConfig::new("avature", "x").with_param("search_url", json!("https://x.avature.net/SearchJobs"));
        assert!(AvatureScraper::new().run("sam", &[spec], true).await.unwrap().is_empty());
    }
}
