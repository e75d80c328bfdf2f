//! `career_watch`: run the job-board watch for one person.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cadence_watch::config::{load_groups, ScraperConfig, DEFAULT_MAX_THREADS, DEFAULT_SQLITE_PATH};
use cadence_watch::registry;
use cadence_watch::{ScraperLookup, WatchEngine, WatchSettings};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{Module, ModuleContext};
use crate::error::{CadenceError, Result};

/// Directory holding per-person groups files.
pub const DEFAULT_GROUPS_DIR: &str = "/app/local/config";

pub struct CareerWatch;

#[async_trait]
impl Module for CareerWatch {
    fn name(&self) -> &str {
        "career_watch"
    }

    async fn run(&self, ctx: ModuleContext, kwargs: Map<String, Value>) -> Result<Value> {
        let settings = settings_from_kwargs(&kwargs)?;

        ctx.activity.record(json!({
            "component": "career_watch.main",
            "op": "start",
            "run_id": ctx.run_id,
            "person": settings.person,
            "kinds": settings.groups.keys().collect::<Vec<_>>(),
            "flags": {
                "email_all_even_if_seen": settings.email_all_even_if_seen,
                "ingest_only_no_email": settings.ingest_only_no_email,
                "skip_network": settings.skip_network,
            },
        }));

        let lookup: Arc<dyn ScraperLookup> = match registry::global() {
            Some(installed) => installed,
            None => Arc::new(registry::default_registry()?),
        };
        let report = WatchEngine::new(lookup)
            .with_activity(Arc::clone(&ctx.activity))
            .run_once(&settings)
            .await?;

        Ok(match report {
            Some(report) => json!({ "html": report.html, "meta": report.meta }),
            None => Value::Null,
        })
    }
}

/// Build watch settings from normalized kwargs.
///
/// The person comes from `person` or a resolved `person_env`. Scraper
/// configs come from inline `groups`, else `groups_path`, else the per-person
/// file `career_watch_groups.<slug>.json` under `groups_dir`.
pub fn settings_from_kwargs(kwargs: &Map<String, Value>) -> Result<WatchSettings> {
    let person = ["person", "person_env"]
        .iter()
        .filter_map(|key| kwargs.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned);
    let groups_path = kwargs
        .get("groups_path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let configs = match kwargs.get("groups") {
        Some(inline @ Value::Array(_)) => serde_json::from_value::<Vec<ScraperConfig>>(inline.clone())
            .map_err(|e| invalid(format!("groups: {e}")))?,
        Some(Value::Null) | None => {
            let path = match (&groups_path, &person) {
                (Some(path), _) => path.clone(),
                (None, Some(person)) => {
                    let dir = kwargs
                        .get("groups_dir")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_GROUPS_DIR);
                    groups_file_for(Path::new(dir), person)
                }
                (None, None) => {
                    return Err(invalid(
                        "missing person; provide 'person', 'person_env' or an explicit 'groups_path'",
                    ))
                }
            };
            if !path.exists() {
                return Err(invalid(format!("groups file not found: {}", path.display())));
            }
            load_groups(&path)?
        }
        Some(other) => return Err(invalid(format!("groups must be a list (got {other})"))),
    };
    if configs.is_empty() {
        return Err(invalid("no scrapers selected"));
    }

    // Without a person the groups file name stands in for one.
    let person = match person {
        Some(person) => person,
        None => groups_path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_owned()),
    };

    let sqlite_path = kwargs
        .get("sqlite_path")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SQLITE_PATH);
    let max_threads = match kwargs.get("max_threads") {
        None | Some(Value::Null) => DEFAULT_MAX_THREADS,
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| invalid(format!("max_threads must be an integer >= 1 (got {v})")))?,
    };

    let mut settings = WatchSettings::new(person, configs)
        .with_sqlite_path(sqlite_path)
        .with_max_threads(max_threads);
    settings.skip_network = flag(kwargs, "skip_network");
    settings.email_all_even_if_seen = flag(kwargs, "email_all_even_if_seen");
    settings.ingest_only_no_email = flag(kwargs, "ingest_only_no_email");
    settings.validate()?;
    Ok(settings)
}

/// `<dir>/career_watch_groups.<slug>.json`
pub fn groups_file_for(dir: &Path, person: &str) -> PathBuf {
    dir.join(format!("career_watch_groups.{}.json", slugify(person)))
}

/// Lowercase, runs of non-alphanumerics become one `_`, trimmed of `_`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

fn flag(kwargs: &Map<String, Value>, key: &str) -> bool {
    match kwargs.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => crate::config::is_truthy(s),
        _ => false,
    }
}

fn invalid(reason: impl Into<String>) -> CadenceError {
    CadenceError::Runner(format!("career_watch: {}", reason.into()))
}
