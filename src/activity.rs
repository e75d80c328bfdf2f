//! JSON-lines activity and error logs.
//!
//! Records go to `activity-YYYY-MM-DD.jsonl` and `errors-YYYY-MM-DD.jsonl`
//! under the configured directory, one object per line, each stamped with a
//! `ts` field. Secret-looking keys are redacted before anything is written.
//! A record that cannot be written is logged at `warn` and dropped.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use cadence_watch::activity::ActivitySink;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{CadenceError, Result};

const REDACTED: &str = "***";
const SECRET_MARKERS: [&str; 4] = ["password", "token", "secret", "api_key"];

/// Which of the two daily files a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Activity,
    Errors,
}

impl LogKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Errors => "errors",
        }
    }
}

/// File-backed activity sink. Without a directory, records become
/// `tracing` events.
#[derive(Debug, Default)]
pub struct ActivityLog {
    dir: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Sink that only emits `tracing` events.
    pub fn tracing_only() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// File holding `kind` records for `date`.
    pub fn file_for(&self, kind: LogKind, date: NaiveDate) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{}.jsonl", kind.prefix(), date.format("%Y-%m-%d"))))
    }

    /// Append `record` to today's `kind` file.
    pub fn append(&self, kind: LogKind, record: Value) -> Result<()> {
        let mut record = redact(record);
        stamp(&mut record);
        let Some(path) = self.file_for(kind, Utc::now().date_naive()) else {
            match kind {
                LogKind::Activity => info!(target: "cadence::activity", record = %record),
                LogKind::Errors => warn!(target: "cadence::activity", record = %record),
            }
            return Ok(());
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if std::fs::symlink_metadata(&path).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Err(CadenceError::Config(format!(
                "activity log {} cannot be a symlink",
                path.display()
            )));
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The most recent `limit` records of `kind` for `date`, oldest first.
    pub fn read_recent(&self, kind: LogKind, date: NaiveDate, limit: usize) -> Result<Vec<Value>> {
        let Some(path) = self.file_for(kind, date) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tail = VecDeque::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else {
                continue;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(record) => {
                    if tail.len() == limit {
                        tail.pop_front();
                    }
                    tail.push_back(record);
                }
                Err(e) => warn!(error = %e, "activity: skipping malformed line"),
            }
        }
        Ok(tail.into_iter().collect())
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, record: Value) {
        if let Err(e) = self.append(LogKind::Activity, record) {
            warn!(error = %e, "failed to write activity record");
        }
    }

    fn record_error(&self, record: Value) {
        if let Err(e) = self.append(LogKind::Errors, record) {
            warn!(error = %e, "failed to write error record");
        }
    }
}

fn stamp(record: &mut Value) {
    let ts = Value::String(Utc::now().to_rfc3339());
    match record {
        Value::Object(map) => {
            map.insert("ts".to_owned(), ts);
        }
        other => {
            let mut map = Map::new();
            map.insert("ts".to_owned(), ts);
            map.insert("value".to_owned(), other.take());
            *other = Value::Object(map);
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("smtp_") || SECRET_MARKERS.iter().any(|m| key.contains(m))
}

/// Replace values under secret-looking keys with `"***"`, recursively.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = if is_secret_key(&k) {
                        Value::String(REDACTED.to_owned())
                    } else {
                        redact(v)
                    };
                    (k, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_nested_secrets() {
        let redacted = redact(json!({
            "module": "career_watch",
            "kwargs": {"api_key": "abc", "nested": [{"SMTP_PASSWORD": "x", "keep": 1}]},
            "smtp_host": "mail.example.com",
            "auth_token": null
        }));
        assert_eq!(redacted["module"], "career_watch");
        assert_eq!(redacted["kwargs"]["api_key"], "***");
        assert_eq!(redacted["kwargs"]["nested"][0]["SMTP_PASSWORD"], "***");
        assert_eq!(redacted["kwargs"]["nested"][0]["keep"], 1);
        assert_eq!(redacted["smtp_host"], "***");
        assert_eq!(redacted["auth_token"], "***");
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = ActivityLog::new(dir.path().join("logs"));
        log.record(json!({"event": "job_run", "job_id": "a"}));
        log.record(json!({"event": "job_run", "job_id": "b", "password": "hunter2"}));
        log.record_error(json!({"event": "job_run", "status": "error"}));

        let today = Utc::now().date_naive();
        let activity = log.read_recent(LogKind::Activity, today, 10).unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[1]["job_id"], "b");
        assert_eq!(activity[1]["password"], "***");
        assert!(activity[0]["ts"].as_str().is_some());

        let errors = log.read_recent(LogKind::Errors, today, 10).unwrap();
        assert_eq!(errors.len(), 1);

        let file = log.file_for(LogKind::Activity, today).unwrap();
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("activity-{}.jsonl", today.format("%Y-%m-%d")));
    }

    #[test]
    fn read_recent_returns_tail_and_skips_malformed_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = ActivityLog::new(dir.path());
        let today = Utc::now().date_naive();
        for i in 0..3 {
            log.record(json!({"n": i}));
        }
        let path = log.file_for(LogKind::Activity, today).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n").unwrap();

        let tail = log.read_recent(LogKind::Activity, today, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0]["n"], 1);
        assert_eq!(tail[1]["n"], 2);
    }

    #[test]
    fn unwritable_directory_is_swallowed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let log = ActivityLog::new(blocker.join("sub"));
        log.record(json!({"event": "x"}));
        assert!(log.append(LogKind::Activity, json!({})).is_err());
    }

    #[test]
    fn tracing_only_never_fails() {
        let log = ActivityLog::tracing_only();
        assert!(log.append(LogKind::Errors, json!({"event": "x"})).is_ok());
        assert!(log.read_recent(LogKind::Activity, Utc::now().date_naive(), 5).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn append_rejects_symlinked_log_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = ActivityLog::new(dir.path());
        let real = dir.path().join("elsewhere.jsonl");
        std::fs::write(&real, "").unwrap();
        let target = log.file_for(LogKind::Activity, Utc::now().date_naive()).unwrap();
        std::os::unix::fs::symlink(&real, &target).unwrap();

        assert!(log.append(LogKind::Activity, json!({"event": "x"})).is_err());
        assert!(std::fs::read_to_string(&real).unwrap().is_empty());
    }
}
