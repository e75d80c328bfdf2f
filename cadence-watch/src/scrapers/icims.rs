//! iCIMS career portals (`careers-<tenant>.icims.com/jobs/search`).
//!
//! Listing pages are fetched in the iframe variant (`in_iframe=1`) and paged
//! with `pr=0,1,2,...` until a page yields nothing.
//!
//! Params per config entry:
//! - `start_urls`: `[url, source]` pairs or `{url, source}` objects
//! - `search_url` / `list_url`: single search, labelled with `source` or the entry's source
//! - `filters`: title substrings, at least one must match (list or comma-separated)
//! - `excludes`: title substrings that drop a posting
//! - `delay_seconds`: pause between tenants (default 0.5)
//! - `max_pages`: page cap per tenant (default 10)

use super::{element_text, html_targets, lowercase_list, selector, Target};
use crate::config::ScraperConfig;
use crate::error::{Result, WatchError};
use crate::http::{self, RetryPolicy};
use crate::scraper::Scraper;
use crate::types::{Posting, ScrapeResult};
use async_trait::async_trait;
use scraper::Html;
use std::collections::HashSet;
use url::Url;

const DEFAULT_DELAY_SECONDS: f64 = 0.5;
const DEFAULT_MAX_PAGES: u64 = 10;
const PAGE_KEY: &str = "pr";
const TITLE_PREFIX: &str = "External Job Posting Title";

/// Scraper for iCIMS-hosted job searches.
#[derive(Debug, Clone)]
pub struct IcimsScraper {
    retry: RetryPolicy,
}

impl Default for IcimsScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl IcimsScraper {
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
        filter: &TitleFilter,
        max_pages: u64,
    ) -> ScrapeResult {
        let mut result = ScrapeResult::empty(&target.source);
        let search = match Url::parse(&target.url) {
            Ok(url) => iframe_url(url),
            Err(e) => {
                result
                    .errors
                    .push(format!("{}: invalid search url '{}': {e}", target.source, target.url));
                return result;
            }
        };

        for page in 0..max_pages {
            let url = page_url(&search, page);
            let html = match self.fetch(client, &url).await {
                Ok(html) => html,
                Err(e) => {
                    result.errors.push(format!("{}: page {page}: {e}", target.source));
                    break;
                }
            };
            if html.trim().is_empty() || html.contains("<title>Access Denied</title>") {
                result
                    .errors
                    .push(format!("{}: blocked or empty on page {page}", target.source));
                break;
            }
            let jobs = match parse_icims_html(&html, &url, filter) {
                Ok(Some(jobs)) => jobs,
                Ok(None) => {
                    result
                        .errors
                        .push(format!("{}: no iCIMS jobs table on page {page}", target.source));
                    break;
                }
                Err(e) => {
                    result.errors.push(format!("{}: page {page}: {e}", target.source));
                    break;
                }
            };
            tracing::debug!(source = %target.source, page, count = jobs.len(), "iCIMS page parsed");
            if jobs.is_empty() {
                break;
            }
            result.items.extend(
                jobs.into_iter()
                    .map(|(title, url)| Posting::new(&target.source, person, title, url)),
            );
        }

        tracing::info!(source = %target.source, count = result.items.len(), "iCIMS postings collected");
        result
    }

    async fn fetch(&self, client: &reqwest::Client, url: &Url) -> Result<String> {
        let request = client
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9");
        http::send_with_retry(request, self.retry)
            .await?
            .text()
            .await
            .map_err(|e| WatchError::Http(format!("iCIMS response read failed: {e}")))
    }
}

/// Title include/exclude substrings, lowercased.
#[derive(Debug, Clone, Default)]
pub(crate) struct TitleFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl TitleFilter {
    fn from_spec(spec: &ScraperConfig) -> Self {
        Self {
            include: lowercase_list(spec, "filters"),
            exclude: lowercase_list(spec, "excludes"),
        }
    }

    fn keeps(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        if self.exclude.iter().any(|ex| title.contains(ex.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|inc| title.contains(inc.as_str()))
    }
}

#[async_trait]
impl Scraper for IcimsScraper {
    fn kind(&self) -> &'static str {
        "icims"
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

            let filter = TitleFilter::from_spec(spec);
            let delay = spec.f64_param("delay_seconds", DEFAULT_DELAY_SECONDS);
            let max_pages = spec.u64_param("max_pages", DEFAULT_MAX_PAGES);

            for (idx, target) in targets.iter().enumerate() {
                if idx > 0 {
                    http::polite_delay(delay).await;
                }
                results.push(
                    self.scrape_target(&client, target, person, &filter, max_pages)
                        .await,
                );
            }
        }
        Ok(results)
    }
}

/// Force the iframe variant of a search URL.
fn iframe_url(mut url: Url) -> Url {
    let framed = url
        .query_pairs()
        .any(|(k, v)| k == "in_iframe" && v == "1");
    if !framed {
        url.query_pairs_mut().append_pair("in_iframe", "1");
    }
    url
}

/// `search` with `pr` set to `page`, every other query pair kept in order.
fn page_url(search: &Url, page: u64) -> Url {
    let pairs: Vec<(String, String)> = search
        .query_pairs()
        .filter(|(k, _)| k != PAGE_KEY)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = search.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(PAGE_KEY, &page.to_string());
    url
}

/// Parse one iCIMS listing page into `(title, absolute url)` pairs.
///
/// `Ok(None)` means the page has no jobs table, which is what the portal
/// serves outside its iframe.
pub(crate) fn parse_icims_html(
    html: &str,
    page: &Url,
    filter: &TitleFilter,
) -> Result<Option<Vec<(String, String)>>> {
    let document = Html::parse_document(html);
    let table_sel = selector(".iCIMS_JobsTable")?;
    let row_sel = selector(".iCIMS_JobsTable .row")?;
    let anchor_sel = selector("a[href*='/job/'], .title a, h3 a")?;

    if document.select(&table_sel).next().is_none() {
        return Ok(None);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in document.select(&row_sel) {
        let Some(anchor) = row.select(&anchor_sel).next() else {
            continue;
        };
        let raw = element_text(anchor);
        let title = raw.strip_prefix(TITLE_PREFIX).unwrap_or(&raw).trim();
        let href = anchor.value().attr("href").map(str::trim).unwrap_or_default();
        if title.is_empty() || href.is_empty() || !filter.keeps(title) {
            continue;
        }
        if !seen.insert((href.to_owned(), title.to_owned())) {
            continue;
        }
        let Ok(url) = page.join(href) else {
            continue;
        };
        out.push((title.to_owned(), url.to_string()));
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MOCK_ICIMS_HTML: &str = r#"<!DOCTYPE html>
<html><head><title>Search Jobs</title></head><body>
<div class="iCIMS_JobsTable">
  <div class="row">
    <div class="title">
      <a href="https://careers-peraton.icims.com/jobs/1001/software-engineer/job?in_iframe=1">
        <span class="sr-only field-label">External Job Posting Title</span>
        <h3>Software Engineer</h3>
      </a>
    </div>
  </div>
  <div class="row">
    <div class="title"><a href="/jobs/1002/engineering-intern/job"><h3>Engineering Intern</h3></a></div>
  </div>
  <div class="row">
    <div class="title"><a href="/jobs/1003/recruiter/job"><h3>Recruiter</h3></a></div>
  </div>
  <div class="row">
    <div class="title"><a href="/jobs/1004/cloud-architect/job"><h3>Cloud Architect</h3></a></div>
  </div>
  <div class="row">
    <div class="title"><a href="/jobs/1004/cloud-architect/job"><h3>Cloud Architect</h3></a></div>
  </div>
  <div class="row"><div class="header">No link here</div></div>
</div>
</body></html>"#;

    fn filter() -> TitleFilter {
        let spec = ScraperConfig::new("icims", "peraton:remote")
            .with_param("filters", json!(["engineer", "architect"]))
            .with_param("excludes", json!("intern"));
        TitleFilter::from_spec(&spec)
    }

    fn page() -> Url {
        Url::parse("https://careers-peraton.icims.com/jobs/search?ss=1&in_iframe=1&pr=0").unwrap()
    }

    #[test]
    fn parses_rows_strips_label_and_filters() {
        let jobs = parse_icims_html(MOCK_ICIMS_HTML, &page(), &filter()).unwrap().unwrap();
        assert_eq!(
            jobs,
            vec![
                (
                    "Software Engineer".to_string(),
                    "https://careers-peraton.icims.com/jobs/1001/software-engineer/job?in_iframe=1".to_string()
                ),
                (
                    "Cloud Architect".to_string(),
                    "https://careers-peraton.icims.com/jobs/1004/cloud-architect/job".to_string()
                ),
            ]
        );
    }

    #[test]
    fn no_filters_keeps_every_titled_row() {
        let jobs = parse_icims_html(MOCK_ICIMS_HTML, &page(), &TitleFilter::default())
            .unwrap()
            .unwrap();
        assert_eq!(jobs.len(), 4);
    }

    #[test]
    fn page_outside_iframe_has_no_table() {
        assert!(parse_icims_html("<html><body><p>Apply</p></body></html>", &page(), &filter())
            .unwrap()
            .is_none());
    }

    #[test]
    fn search_urls_are_framed_and_paged() {
        let url = iframe_url(Url::parse("https://x.icims.com/jobs/search?ss=1&searchKeyword=Remote+work").unwrap());
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "in_iframe").count(), 1);
        let again = iframe_url(url.clone());
        assert_eq!(again, url);

        let paged = page_url(&page(), 2);
        let pairs: Vec<(String, String)> = paged.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert_eq!(
            pairs,
            vec![
                ("ss".to_string(), "1".to_string()),
                ("in_iframe".to_string(), "1".to_string()),
                ("pr".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn pages_until_an_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/search"))
            .and(query_param("pr", "0"))
            .and(query_param("in_iframe", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_ICIMS_HTML))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/search"))
            .and(query_param("pr", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div class="iCIMS_JobsTable"></div>"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let spec = ScraperConfig::new("icims", "peraton")
            .with_param(
                "start_urls",
                json!([[format!("{}/jobs/search?ss=1", server.uri()), "peraton:remote"]]),
            )
            .with_param("filters", json!("engineer,architect"))
            .with_param("excludes", json!(["intern"]));

        let scraper = IcimsScraper::new().with_retry(RetryPolicy::immediate(1));
        let results = scraper.run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "peraton:remote");
        assert!(results[0].errors.is_empty(), "{:?}", results[0].errors);
        let titles: Vec<&str> = results[0].items.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Software Engineer", "Cloud Architect"]);
        assert_eq!(
            results[0].items[1].url,
            format!("{}/jobs/1004/cloud-architect/job", server.uri())
        );
    }

    #[tokio::test]
    async fn blocked_and_failing_tenants_report_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked/jobs/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><title>Access Denied</title></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down/jobs/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let spec = ScraperConfig::new("icims", "icims")
            .with_param(
                "start_urls",
                json!([
                    [format!("{}/blocked/jobs/search", server.uri()), "icims:blocked"],
                    {"url": format!("{}/down/jobs/search", server.uri()), "source": "icims:down"}
                ]),
            )
            .with_param("delay_seconds", json!(0));

        let scraper = IcimsScraper::new().with_retry(RetryPolicy::immediate(1));
        let results = scraper.run("sam", &[spec], false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].errors, vec!["icims:blocked: blocked or empty on page 0"]);
        assert!(results[1].errors[0].starts_with("icims:down: page 0: "));
        assert!(results.iter().all(|r| r.items.is_empty()));
    }

    #[tokio::test]
    async fn missing_targets_reported_as_error() {
        let spec = ScraperConfig::new("icims", "icims:empty");
        let results = IcimsScraper::new().run("sam", &[spec], false).await.unwrap();
        assert!(results[0].errors[0].contains("no start_urls"));
    }
}
