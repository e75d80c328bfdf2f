//! Watch settings and scraper configuration.
//!
//! [`WatchSettings`] bundles everything one [`crate::run_once`] call needs:
//! the person, the scraper configs grouped by kind, the dedup store location,
//! the concurrency cap and the three run-mode flags.

use crate::error::WatchError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default location of the dedup database.
pub const DEFAULT_SQLITE_PATH: &str = "/app/local/state/careerwatch.db";

/// Default cap on concurrently running scraper kinds.
pub const DEFAULT_MAX_THREADS: usize = 8;

/// One logical scraper invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Scraper family, e.g. `lever` or `workday-cxs`.
    pub kind: String,
    /// Stable per-tenant label used for grouping and dedup.
    pub source: String,
    /// Scraper-specific options (targets, filters, pacing).
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ScraperConfig {
    pub fn new(kind: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            params: Map::new(),
        }
    }

    /// Builder-style parameter setter.
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_owned(), value);
        self
    }

    /// Non-empty trimmed string parameter.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Float parameter, accepting numbers or numeric strings.
    pub fn f64_param(&self, key: &str, default: f64) -> f64 {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Unsigned integer parameter, accepting numbers or numeric strings.
    pub fn u64_param(&self, key: &str, default: u64) -> u64 {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// List of strings. A single string counts as a one-element list.
    pub fn str_list_param(&self, key: &str) -> Option<Vec<String>> {
        match self.params.get(key)? {
            Value::String(s) => Some(vec![s.clone()]),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Canonical form of a scraper kind: trimmed and lowercased.
pub fn normalize_kind(kind: &str) -> String {
    kind.trim().to_lowercase()
}

/// Partition configs by normalized kind, preserving order within a kind.
pub fn group_by_kind(
    configs: impl IntoIterator<Item = ScraperConfig>,
) -> BTreeMap<String, Vec<ScraperConfig>> {
    let mut groups: BTreeMap<String, Vec<ScraperConfig>> = BTreeMap::new();
    for cfg in configs {
        groups.entry(normalize_kind(&cfg.kind)).or_default().push(cfg);
    }
    groups
}

/// Load a JSON list of `{kind, source, params}` objects.
pub fn load_groups(path: &Path) -> Result<Vec<ScraperConfig>, WatchError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        WatchError::Config(format!("invalid groups file {}: {e}", path.display()))
    })
}

/// Settings for one orchestration run.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Person identifier stamped on every posting.
    pub person: String,
    /// Scraper configs keyed by normalized kind.
    pub groups: BTreeMap<String, Vec<ScraperConfig>>,
    /// Dedup database file.
    pub sqlite_path: PathBuf,
    /// Upper bound on concurrently running kinds.
    pub max_threads: usize,
    /// Do not touch the network; every kind yields nothing.
    pub skip_network: bool,
    /// Render everything found, not only new postings.
    pub email_all_even_if_seen: bool,
    /// Update the dedup store but never produce an email.
    pub ingest_only_no_email: bool,
}

impl WatchSettings {
    /// Settings with defaults for everything except the person and configs.
    pub fn new(person: impl Into<String>, configs: Vec<ScraperConfig>) -> Self {
        Self {
            person: person.into(),
            groups: group_by_kind(configs),
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            max_threads: DEFAULT_MAX_THREADS,
            skip_network: false,
            email_all_even_if_seen: false,
            ingest_only_no_email: false,
        }
    }

    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite_path = path.into();
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Number of scraper specs per kind.
    pub fn planned_specs_by_kind(&self) -> BTreeMap<String, usize> {
        self.groups
            .iter()
            .map(|(kind, specs)| (kind.clone(), specs.len()))
            .collect()
    }

    /// Validates these settings.
    ///
    /// Checks:
    /// - `person` must not be blank
    /// - `max_threads` must be at least 1
    /// - every config needs a non-blank `kind` and `source`
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.person.trim().is_empty() {
            return Err(WatchError::Config("person must not be empty".into()));
        }
        if self.max_threads == 0 {
            return Err(WatchError::Config(
                "max_threads must be at least 1".into(),
            ));
        }
        for (kind, specs) in &self.groups {
            if kind.is_empty() {
                return Err(WatchError::Config("scraper kind must not be empty".into()));
            }
            if let Some(spec) = specs.iter().find(|s| s.source.trim().is_empty()) {
                return Err(WatchError::Config(format!(
                    "scraper of kind '{}' has an empty source",
                    spec.kind
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn group_by_kind_normalizes_kind() {
        let groups = group_by_kind(vec![
            ScraperConfig::new(" Lever", "lever:acme"),
            ScraperConfig::new("lever", "lever:globex"),
            ScraperConfig::new("STUB", "stub:one"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["lever"].len(), 2);
        assert_eq!(groups["stub"][0].source, "stub:one");
    }

    #[test]
    fn defaults() {
        let s = WatchSettings::new("sam", vec![]);
        assert_eq!(s.max_threads, 8);
        assert_eq!(s.sqlite_path, PathBuf::from(DEFAULT_SQLITE_PATH));
        assert!(!s.skip_network);
        assert!(!s.email_all_even_if_seen);
        assert!(!s.ingest_only_no_email);
    }

    #[test]
    fn validate_rejects_blank_person() {
        let s = WatchSettings::new("  ", vec![]);
        assert!(matches!(s.validate(), Err(WatchError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_threads() {
        let s = WatchSettings::new("sam", vec![]).with_max_threads(0);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("max_threads"));
    }

    #[test]
    fn validate_rejects_blank_source() {
        let s = WatchSettings::new("sam", vec![ScraperConfig::new("stub", " ")]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn params_accept_numbers_and_strings() {
        let cfg = ScraperConfig::new("lever", "lever:acme")
            .with_param("delay_seconds", json!("1.5"))
            .with_param("max_pages", json!(2))
            .with_param("exclude", json!("onsite"))
            .with_param("query", json!("  "));
        assert!((cfg.f64_param("delay_seconds", 3.0) - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.u64_param("max_pages", 3), 2);
        assert_eq!(cfg.u64_param("limit", 20), 20);
        assert_eq!(cfg.str_list_param("exclude"), Some(vec!["onsite".into()]));
        assert_eq!(cfg.str_param("query"), None);
    }

    #[test]
    fn load_groups_reads_json_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        std::fs::write(
            &path,
            r#"[{"kind": "stub", "source": "stub:a", "params": {"items": []}},
                {"kind": "lever", "source": "lever:acme"}]"#,
        )
        .unwrap();
        let configs = load_groups(&path).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs[1].params.is_empty());
    }

    #[test]
    fn load_groups_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_groups(&path), Err(WatchError::Config(_))));
    }
}
