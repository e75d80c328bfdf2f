//! Scrape orchestration: fan out kinds, merge, dedupe, decide.
//!
//! # Pipeline
//!
//! 1. Spawn one task per scraper kind, at most `min(kinds, max_threads)` at once
//! 2. Catch and log kind-level errors and panics; that kind yields nothing
//! 3. Merge every result into a per-source "found" view
//! 4. Insert all found postings into the dedup store (one transaction)
//! 5. Emit the summary record
//! 6. Pick the outcome: ingest-only, render-all, render-new or nothing

use crate::activity::{ActivitySink, TracingSink};
use crate::config::{ScraperConfig, WatchSettings};
use crate::error::{Result, WatchError};
use crate::registry;
use crate::render;
use crate::scraper::ScraperLookup;
use crate::store::PostingStore;
use crate::types::{group_by_source, total_postings, Posting, PostingsBySource, ScrapeResult, WatchReport};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const COMPONENT: &str = "career_watch.engine";

/// Which rendering branch a run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Store updated, nothing rendered.
    IngestOnly,
    /// Everything found is rendered, seen or not.
    RenderAll,
    /// Only newly inserted postings are rendered.
    RenderNew,
    /// Nothing to send.
    NoOp,
}

/// Outcome of one kind's task.
struct KindOutcome {
    kind: String,
    elapsed: Duration,
    results: std::result::Result<Vec<ScrapeResult>, String>,
}

/// Runs watch settings against a scraper lookup and the dedup store.
#[derive(Clone)]
pub struct WatchEngine {
    lookup: Arc<dyn ScraperLookup>,
    activity: Arc<dyn ActivitySink>,
}

impl WatchEngine {
    pub fn new(lookup: Arc<dyn ScraperLookup>) -> Self {
        Self {
            lookup,
            activity: Arc::new(TracingSink),
        }
    }

    /// Route activity and error records to `sink`.
    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    /// Run one complete watch cycle.
    ///
    /// Returns `Ok(None)` when there is nothing to email.
    ///
    /// # Errors
    ///
    /// Invalid settings and dedup store failures. Scraper failures never
    /// surface here.
    pub async fn run_once(&self, settings: &WatchSettings) -> Result<Option<WatchReport>> {
        settings.validate()?;
        let started = Instant::now();
        let person = settings.person.trim().to_owned();

        let outcomes = self.fan_out(settings, &person).await;

        let mut durations_us: BTreeMap<String, u64> = BTreeMap::new();
        let mut found = PostingsBySource::new();
        let mut all_postings: Vec<Posting> = Vec::new();
        for outcome in outcomes {
            durations_us.insert(outcome.kind.clone(), micros(outcome.elapsed));
            match outcome.results {
                Ok(results) => {
                    for result in results {
                        for error in &result.errors {
                            tracing::warn!(kind = %outcome.kind, source = %result.source, error = %error, "scraper reported error");
                        }
                        all_postings.extend(result.items.iter().cloned());
                        found.entry(result.source).or_default().extend(result.items);
                    }
                }
                Err(error) => {
                    tracing::warn!(kind = %outcome.kind, error = %error, "scraper kind failed");
                    self.activity.record_error(json!({
                        "component": COMPONENT,
                        "op": "scraper_run",
                        "person": person,
                        "kind": outcome.kind,
                        "error": error,
                    }));
                }
            }
        }

        // Barrier: every kind has settled before novelty is evaluated.
        let batch = all_postings.len();
        let fresh = match insert_all(settings, &person, all_postings).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::error!(
                    person = %person,
                    sqlite_path = %settings.sqlite_path.display(),
                    batch,
                    error = %e,
                    "dedup store failed"
                );
                self.activity.record_error(json!({
                    "component": "career_watch.db",
                    "op": "filter_new",
                    "person": person,
                    "sqlite_path": settings.sqlite_path.display().to_string(),
                    "batch": batch,
                    "error": e.to_string(),
                }));
                return Err(e);
            }
        };
        let new_by_source = group_by_source(&fresh);
        let total_us = micros(started.elapsed());

        self.activity.record(json!({
            "component": COMPONENT,
            "op": "summary",
            "person": person,
            "skip_network": settings.skip_network,
            "email_all_even_if_seen": settings.email_all_even_if_seen,
            "ingest_only_no_email": settings.ingest_only_no_email,
            "planned_specs_by_kind": settings.planned_specs_by_kind(),
            "found_by_source": counts(&found),
            "new_by_source": counts(&new_by_source),
            "durations_us": durations_us,
            "total_us": total_us,
        }));

        let new_total = total_postings(&new_by_source);
        let mode = decide_mode(settings, total_postings(&found), new_total);
        tracing::info!(person = %person, ?mode, found = total_postings(&found), new = new_total, "watch run finished");

        let (render_set, label) = match mode {
            RunMode::IngestOnly => {
                self.activity.record(json!({
                    "component": COMPONENT,
                    "op": "ingest_only",
                    "person": person,
                    "new_total": new_total,
                    "sources": new_by_source.keys().collect::<Vec<_>>(),
                    "durations_us": durations_us,
                    "total_us": total_us,
                }));
                return Ok(None);
            }
            RunMode::NoOp => {
                self.activity.record(json!({
                    "component": COMPONENT,
                    "op": "no_new",
                    "person": person,
                    "durations_us": durations_us,
                    "total_us": total_us,
                }));
                return Ok(None);
            }
            RunMode::RenderAll => (&found, "all postings"),
            RunMode::RenderNew => (&new_by_source, "new postings"),
        };

        let message = summary_message(render_set, &person, label);
        let subject = subject_line(&new_by_source);
        let heading = format!("Career Watch — {person}");
        let html = render::wrap_document(
            &render::build_tables(render_set),
            Some(&heading),
            Some(&message),
        );
        let by_source = counts(render_set);

        self.activity.record(json!({
            "component": COMPONENT,
            "op": "rendered",
            "person": person,
            "counts": by_source,
            "new_total": new_total,
            "email_all_even_if_seen": settings.email_all_even_if_seen,
            "durations_us": durations_us,
            "total_us": total_us,
        }));

        let mut timing: Map<String, Value> = durations_us
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        timing.insert("_total_us".into(), json!(total_us));

        let mut meta = Map::new();
        meta.insert("message".into(), json!(message));
        meta.insert("person".into(), json!(person));
        meta.insert("new_total".into(), json!(new_total));
        meta.insert("found_total".into(), json!(total_postings(&found)));
        meta.insert("by_source".into(), json!(by_source));
        meta.insert("subject".into(), json!(subject));
        meta.insert("durations_us".into(), Value::Object(timing));
        meta.insert(
            "email_all_even_if_seen".into(),
            json!(settings.email_all_even_if_seen),
        );
        meta.insert(
            "ingest_only_no_email".into(),
            json!(settings.ingest_only_no_email),
        );

        Ok(Some(WatchReport { html, meta }))
    }

    async fn fan_out(&self, settings: &WatchSettings, person: &str) -> Vec<KindOutcome> {
        let cap = settings.groups.len().min(settings.max_threads).max(1);
        let permits = Arc::new(Semaphore::new(cap));
        let mut tasks = JoinSet::new();

        for (kind, specs) in &settings.groups {
            let kind = kind.clone();
            let specs = specs.clone();
            let person = person.to_owned();
            let skip_network = settings.skip_network;
            let lookup = Arc::clone(&self.lookup);
            let activity = Arc::clone(&self.activity);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let started = Instant::now();
                let results = if skip_network {
                    tracing::info!(kind = %kind, specs = specs.len(), "skip_network set, kind not scraped");
                    activity.record(json!({
                        "component": COMPONENT,
                        "op": "skipped_kind",
                        "person": person,
                        "kind": kind,
                        "reason": "skip_network",
                        "spec_count": specs.len(),
                        "sources": specs.iter().map(|s| s.source.as_str()).collect::<Vec<_>>(),
                    }));
                    Ok(Vec::new())
                } else {
                    run_kind(lookup.as_ref(), &kind, &person, &specs).await
                };
                KindOutcome {
                    kind,
                    elapsed: started.elapsed(),
                    results,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(settings.groups.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                // Panics are caught inside the task, so this is cancellation only.
                Err(e) => tracing::error!(error = %e, "scraper task did not complete"),
            }
        }
        outcomes.sort_by(|a, b| a.kind.cmp(&b.kind));
        outcomes
    }
}

async fn run_kind(
    lookup: &dyn ScraperLookup,
    kind: &str,
    person: &str,
    specs: &[ScraperConfig],
) -> std::result::Result<Vec<ScrapeResult>, String> {
    let scraper = lookup
        .lookup(kind)
        .ok_or_else(|| WatchError::Registry(format!("unknown scraper kind '{kind}'")).to_string())?;

    match AssertUnwindSafe(scraper.run(person, specs, false))
        .catch_unwind()
        .await
    {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("scraper panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("scraper panicked: {s}")
    } else {
        "scraper panicked".to_owned()
    }
}

async fn insert_all(settings: &WatchSettings, person: &str, postings: Vec<Posting>) -> Result<Vec<Posting>> {
    let path = settings.sqlite_path.clone();
    let person = person.to_owned();
    tokio::task::spawn_blocking(move || {
        PostingStore::open(&path)?.insert_new(&person, &postings)
    })
    .await
    .map_err(|e| WatchError::Store(format!("dedup task failed: {e}")))?
}

/// Pick the rendering branch from the mode flags and the counts.
pub fn decide_mode(settings: &WatchSettings, found_total: usize, new_total: usize) -> RunMode {
    if settings.ingest_only_no_email {
        RunMode::IngestOnly
    } else if settings.email_all_even_if_seen {
        if found_total == 0 {
            RunMode::NoOp
        } else {
            RunMode::RenderAll
        }
    } else if new_total == 0 {
        RunMode::NoOp
    } else {
        RunMode::RenderNew
    }
}

/// `"Career Watch — 3 new at lever:acme"` or the multi-source phrasing.
pub fn subject_line(new_by_source: &PostingsBySource) -> String {
    let new_total = total_postings(new_by_source);
    let sources: Vec<&String> = new_by_source
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(source, _)| source)
        .collect();
    match sources.as_slice() {
        [only] => format!("Career Watch — {new_total} new at {only}"),
        _ => format!(
            "Career Watch — {new_total} new jobs ({} companies)",
            sources.len()
        ),
    }
}

fn summary_message(by_source: &PostingsBySource, person: &str, label: &str) -> String {
    let total = total_postings(by_source);
    let sources = by_source.values().filter(|items| !items.is_empty()).count();
    format!("{total} {label} across {sources} sources for {person}")
}

fn counts(by_source: &PostingsBySource) -> BTreeMap<&str, usize> {
    by_source
        .iter()
        .map(|(source, items)| (source.as_str(), items.len()))
        .collect()
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Run `settings` against the process-wide registry.
///
/// Falls back to [`registry::default_registry`] when none is installed.
pub async fn run_once(settings: &WatchSettings) -> Result<Option<WatchReport>> {
    let lookup: Arc<dyn ScraperLookup> = match registry::global() {
        Some(installed) => installed,
        None => Arc::new(registry::default_registry()?),
    };
    WatchEngine::new(lookup).run_once(settings).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::activity::MemorySink;
    use crate::registry::ScraperRegistry;
    use crate::scraper::Scraper;
    use crate::scrapers::StubScraper;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Exploding;

    #[async_trait]
    impl Scraper for Exploding {
        fn kind(&self) -> &'static str {
            "exploding"
        }

        async fn run(&self, _: &str, _: &[ScraperConfig], _: bool) -> Result<Vec<ScrapeResult>> {
            Err(WatchError::Scraper("board is down".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Scraper for Panicking {
        fn kind(&self) -> &'static str {
            "panicking"
        }

        async fn run(&self, _: &str, _: &[ScraperConfig], _: bool) -> Result<Vec<ScrapeResult>> {
            panic!("selector blew up");
        }
    }

    /// Counts invocations so tests can assert a kind was never called.
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Scraper for Counting {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, person: &str, specs: &[ScraperConfig], _: bool) -> Result<Vec<ScrapeResult>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(specs
                .iter()
                .map(|s| ScrapeResult {
                    source: s.source.clone(),
                    items: vec![Posting::new(&s.source, person, "Counted", "https://c/1")],
                    errors: vec![],
                })
                .collect())
        }
    }

    fn stub_config(source: &str, titles: &[&str]) -> ScraperConfig {
        let items: Vec<Value> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"title": t, "url": format!("https://jobs.example/{source}/{i}")}))
            .collect();
        ScraperConfig::new("stub", source).with_param("items", Value::Array(items))
    }

    fn engine(registry: ScraperRegistry) -> (WatchEngine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = WatchEngine::new(Arc::new(registry)).with_activity(sink.clone());
        (engine, sink)
    }

    fn stub_registry() -> ScraperRegistry {
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(StubScraper)).unwrap();
        registry
    }

    fn settings(dir: &tempfile::TempDir, configs: Vec<ScraperConfig>) -> WatchSettings {
        WatchSettings::new("sam", configs).with_sqlite_path(dir.path().join("watch.db"))
    }

    #[tokio::test]
    async fn first_run_renders_new_postings() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine(stub_registry());
        let s = settings(&dir, vec![stub_config("lever:acme", &["Backend Engineer", "SRE"])]);

        let report = engine.run_once(&s).await.unwrap().expect("report");
        assert!(report.html.contains("Backend Engineer"));
        assert!(report.html.contains("SRE"));
        assert!(report.html.contains("<h2>Career Watch — sam</h2>"));
        assert_eq!(report.meta["new_total"], json!(2));
        assert_eq!(report.subject(), Some("Career Watch — 2 new at lever:acme"));
        assert_eq!(report.meta["message"], json!("2 new postings across 1 sources for sam"));
        assert!(report.meta["durations_us"].get("_total_us").is_some());
        let summaries = sink.matching("op", "summary");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0]["new_by_source"]["lever:acme"], json!(2));
    }

    #[tokio::test]
    async fn second_run_with_same_output_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(stub_registry());
        let s = settings(&dir, vec![stub_config("lever:acme", &["Backend Engineer", "SRE"])]);

        assert!(engine.run_once(&s).await.unwrap().is_some());
        assert!(engine.run_once(&s).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn email_all_renders_seen_postings() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(stub_registry());
        let mut s = settings(&dir, vec![stub_config("lever:acme", &["Backend Engineer"])]);
        engine.run_once(&s).await.unwrap();

        s.email_all_even_if_seen = true;
        let report = engine.run_once(&s).await.unwrap().expect("forced resend");
        assert!(report.html.contains("Backend Engineer"));
        assert_eq!(report.meta["new_total"], json!(0));
        assert_eq!(report.meta["by_source"]["lever:acme"], json!(1));
        assert_eq!(report.subject(), Some("Career Watch — 0 new jobs (0 companies)"));
    }

    #[tokio::test]
    async fn email_all_with_nothing_found_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(stub_registry());
        let mut s = settings(&dir, vec![stub_config("lever:acme", &[])]);
        s.email_all_even_if_seen = true;
        assert!(engine.run_once(&s).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ingest_only_updates_store_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine(stub_registry());
        let mut s = settings(&dir, vec![stub_config("lever:acme", &["A", "B"])]);
        s.ingest_only_no_email = true;

        assert!(engine.run_once(&s).await.unwrap().is_none());
        let store = PostingStore::open(&s.sqlite_path).unwrap();
        assert_eq!(store.count_rows().unwrap(), 2);
        let ingest = sink.matching("op", "ingest_only");
        assert_eq!(ingest[0]["new_total"], json!(2));
    }

    #[tokio::test]
    async fn skip_network_never_calls_scrapers() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ScraperRegistry::new();
        registry.register(Arc::new(Counting(calls.clone()))).unwrap();
        let (engine, sink) = engine(registry);
        let mut s = settings(&dir, vec![ScraperConfig::new("counting", "c:1")]);
        s.skip_network = true;

        assert!(engine.run_once(&s).await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.matching("op", "skipped_kind").len(), 1);
    }

    #[tokio::test]
    async fn failing_kinds_do_not_sink_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = stub_registry();
        registry.register(Arc::new(Exploding)).unwrap();
        registry.register(Arc::new(Panicking)).unwrap();
        let (engine, sink) = engine(registry);
        let s = settings(
            &dir,
            vec![
                stub_config("lever:acme", &["Platform Engineer"]),
                ScraperConfig::new("exploding", "x:1"),
                ScraperConfig::new("panicking", "p:1"),
                ScraperConfig::new("greenhouse", "g:1"),
            ],
        );

        let report = engine.run_once(&s).await.unwrap().expect("stub still reports");
        assert_eq!(report.meta["new_total"], json!(1));
        let failed: Vec<String> = sink
            .errors()
            .iter()
            .map(|e| e["kind"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(failed, vec!["exploding", "greenhouse", "panicking"]);
        assert!(sink.errors()[2]["error"]
            .as_str()
            .unwrap()
            .contains("selector blew up"));
    }

    #[tokio::test]
    async fn multi_source_subject_counts_companies() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(stub_registry());
        let s = settings(
            &dir,
            vec![
                stub_config("lever:acme", &["A"]),
                stub_config("lever:globex", &["B", "C"]),
            ],
        );
        let report = engine.run_once(&s).await.unwrap().unwrap();
        assert_eq!(report.subject(), Some("Career Watch — 3 new jobs (2 companies)"));
        assert!(report.html.find("lever:acme").unwrap() < report.html.find("lever:globex").unwrap());
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, sink) = engine(stub_registry());
        // A directory where the database file should be.
        let blocked = dir.path().join("blocked.db");
        std::fs::create_dir_all(&blocked).unwrap();
        let s = WatchSettings::new("sam", vec![stub_config("lever:acme", &["A"])])
            .with_sqlite_path(&blocked);
        assert!(matches!(engine.run_once(&s).await, Err(WatchError::Store(_))));

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["component"], json!("career_watch.db"));
        assert_eq!(errors[0]["op"], json!("filter_new"));
        assert_eq!(errors[0]["person"], json!("sam"));
        assert_eq!(errors[0]["sqlite_path"], json!(blocked.display().to_string()));
        assert_eq!(errors[0]["batch"], json!(1));
        assert!(!errors[0]["error"].as_str().unwrap().is_empty());
        assert!(sink.matching("op", "summary").is_empty());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let (engine, _) = engine(stub_registry());
        let s = WatchSettings::new("", vec![]);
        assert!(matches!(engine.run_once(&s).await, Err(WatchError::Config(_))));
    }

    #[test]
    fn decide_mode_table() {
        let mut s = WatchSettings::new("sam", vec![]);
        assert_eq!(decide_mode(&s, 0, 0), RunMode::NoOp);
        assert_eq!(decide_mode(&s, 3, 1), RunMode::RenderNew);
        s.email_all_even_if_seen = true;
        assert_eq!(decide_mode(&s, 3, 0), RunMode::RenderAll);
        assert_eq!(decide_mode(&s, 0, 0), RunMode::NoOp);
        s.ingest_only_no_email = true;
        assert_eq!(decide_mode(&s, 3, 3), RunMode::IngestOnly);
    }
}
