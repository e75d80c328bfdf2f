//! Workday career sites through the CxS JSON API.
//!
//! Params per config entry:
//! - `start_targets` (or `start_urls`): `[url, source, payload?]` or
//!   `{url, source, payload}`. Plain career-site URLs are mapped to their
//!   `/wday/cxs/<tenant>/<site>/jobs` endpoint.
//! - `limit` (default 20), `max_pages` (default 3), `delay_seconds` (default 4.0)
//! - `base_payload`: merged under every target payload

use super::{parse_targets, Target};
use crate::config::ScraperConfig;
use crate::error::{Result, WatchError};
use crate::http::{self, RetryPolicy};
use crate::scraper::Scraper;
use crate::types::{Posting, ScrapeResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use url::Url;

const DEFAULT_LIMIT: u64 = 20;
const DEFAULT_MAX_PAGES: u64 = 3;
const DEFAULT_DELAY_SECONDS: f64 = 4.0;
const FALLBACK_SOURCE: &str = "workday:cxs";
const FACET_KEYS: &[&str] = &["locations", "jobFamilyGroup", "remoteType"];

/// Scraper for Workday-hosted career sites.
#[derive(Debug, Clone)]
pub struct WorkdayCxsScraper {
    retry: RetryPolicy,
}

impl Default for WorkdayCxsScraper {
    fn default() -> Self {
        Self::new()
    }
}

/// Paging knobs for one config entry.
#[derive(Debug, Clone)]
struct Paging {
    limit: u64,
    max_pages: u64,
    delay: f64,
    base_payload: Map<String, Value>,
}

impl WorkdayCxsScraper {
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
        paging: &Paging,
    ) -> ScrapeResult {
        let mut result = ScrapeResult::empty(&target.source);
        let endpoint = match resolve_endpoint(&target.url) {
            Some(url) => url,
            None => {
                result
                    .errors
                    .push(format!("{}: cannot derive CxS endpoint from '{}'", target.source, target.url));
                return result;
            }
        };
        let payload_in = merge_query_into_payload(&target.url, &target.payload);

        let mut offset = 0u64;
        for page in 0..paging.max_pages {
            let mut payload = paging.base_payload.clone();
            payload.extend(payload_in.clone());
            let limit = payload
                .entry("limit")
                .or_insert(json!(paging.limit))
                .as_u64()
                .filter(|n| *n > 0)
                .unwrap_or(paging.limit);
            payload.insert("offset".into(), json!(offset));

            let jobs = match self.fetch_page(client, &endpoint, &payload).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    result
                        .errors
                        .push(format!("{}: page {}: {e}", target.source, page + 1));
                    break;
                }
            };
            tracing::debug!(source = %target.source, page = page + 1, count = jobs.len(), "Workday page fetched");
            if jobs.is_empty() {
                break;
            }

            let page_len = jobs.len() as u64;
            result.items.extend(
                jobs.into_iter()
                    .map(|(title, url)| Posting::new(&target.source, person, title, url)),
            );
            if page_len < limit {
                break;
            }
            offset += page_len;
            http::polite_delay(paging.delay).await;
        }
        result
    }

    async fn fetch_page(
        &self,
        client: &reqwest::Client,
        endpoint: &Url,
        payload: &Map<String, Value>,
    ) -> Result<Vec<(String, String)>> {
        let request = client
            .post(endpoint.clone())
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .json(payload);
        let body: Value = http::send_with_retry(request, self.retry)
            .await?
            .json()
            .await
            .map_err(|e| WatchError::Parse(format!("Workday response is not JSON: {e}")))?;
        Ok(extract_jobs(&body, endpoint))
    }
}

#[async_trait]
impl Scraper for WorkdayCxsScraper {
    fn kind(&self) -> &'static str {
        "workday-cxs"
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
            let fallback = if spec.source.trim().is_empty() {
                FALLBACK_SOURCE
            } else {
                spec.source.as_str()
            };
            let raw = spec
                .params
                .get("start_targets")
                .or_else(|| spec.params.get("start_urls"));
            let targets = parse_targets(raw, Some(fallback));
            if targets.is_empty() {
                results.push(ScrapeResult::failed(
                    &spec.source,
                    format!("{}: no start_targets configured", spec.source),
                ));
                continue;
            }

            let paging = Paging {
                limit: spec.u64_param("limit", DEFAULT_LIMIT).max(1),
                max_pages: spec.u64_param("max_pages", DEFAULT_MAX_PAGES),
                delay: spec.f64_param("delay_seconds", DEFAULT_DELAY_SECONDS),
                base_payload: spec
                    .params
                    .get("base_payload")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            };

            for (idx, target) in targets.iter().enumerate() {
                if idx > 0 {
                    http::polite_delay(paging.delay).await;
                }
                results.push(self.scrape_target(&client, target, person, &paging).await);
            }
        }
        Ok(results)
    }
}

fn is_locale(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 5
        && bytes[0].is_ascii_lowercase()
        && bytes[1].is_ascii_lowercase()
        && bytes[2] == b'-'
        && bytes[3].is_ascii_uppercase()
        && bytes[4].is_ascii_uppercase()
}

/// Map a career-site URL to its CxS jobs endpoint.
///
/// `https://acme.wd5.myworkdayjobs.com/en-US/External?q=rust` becomes
/// `https://acme.wd5.myworkdayjobs.com/wday/cxs/acme/External/jobs`.
/// A leading locale segment is skipped.
pub(crate) fn infer_cxs_url(list_url: &str) -> Option<Url> {
    let url = Url::parse(list_url).ok()?;
    let host = url.host_str()?;
    let tenant = host.split('.').next().filter(|t| !t.is_empty())?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty()).peekable();
    if segments.peek().is_some_and(|s| is_locale(s)) {
        segments.next();
    }
    let site = segments.next()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    Url::parse(&format!(
        "{}://{authority}/wday/cxs/{tenant}/{site}/jobs",
        url.scheme()
    ))
    .ok()
}

fn resolve_endpoint(raw: &str) -> Option<Url> {
    if raw.contains("/wday/cxs/") {
        Url::parse(raw).ok().map(|mut u| {
            u.set_query(None);
            u
        })
    } else {
        infer_cxs_url(raw)
    }
}

/// Fold `q`/`searchText` and facet query params into the request payload.
pub(crate) fn merge_query_into_payload(url: &str, payload: &Map<String, Value>) -> Map<String, Value> {
    let mut out = payload.clone();
    let Ok(parsed) = Url::parse(url) else {
        return out;
    };
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

    let search = pairs
        .iter()
        .find(|(k, v)| k == "q" && !v.is_empty())
        .or_else(|| pairs.iter().find(|(k, v)| k == "searchText" && !v.is_empty()));
    if let Some((_, text)) = search {
        out.insert("searchText".into(), json!(text));
    }

    let mut facets = out
        .get("appliedFacets")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for key in FACET_KEYS {
        let values: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            facets.insert((*key).to_owned(), json!(values));
        }
    }
    out.insert("appliedFacets".into(), Value::Object(facets));
    out
}

/// Pull `(title, absolute url)` pairs out of a CxS response.
///
/// Accepts `{jobPostings: [...]}` and `{body: {jobPostings: [...]}}`.
pub(crate) fn extract_jobs(body: &Value, endpoint: &Url) -> Vec<(String, String)> {
    let postings = body
        .get("jobPostings")
        .and_then(Value::as_array)
        .or_else(|| body.get("body")?.get("jobPostings")?.as_array());
    let Some(postings) = postings else {
        return Vec::new();
    };

    postings
        .iter()
        .filter_map(|job| {
            let title = job.get("title")?.as_str()?.trim();
            let path = job
                .get("externalPath")
                .or_else(|| job.get("canonicalPositionUrl"))?
                .as_str()?
                .trim();
            if title.is_empty() || path.is_empty() {
                return None;
            }
            let url = if path.starts_with('/') {
                endpoint.join(path).ok()?.to_string()
            } else {
                path.to_owned()
            };
            Some((title.to_owned(), url))
        })
        .collect()
}
