//! SQLite dedup store for discovered postings.
//!
//! One append-only table keyed by `(source, person, title, url)`. The only
//! write path is [`PostingStore::insert_new`], which runs a single
//! `BEGIN IMMEDIATE` transaction per batch and reports which postings were
//! actually inserted. Cross-process safety comes from SQLite's own locking.

use crate::error::{Result, WatchError};
use crate::types::Posting;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits on another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// DDL for the dedup database. Idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS postings (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    source         TEXT NOT NULL,
    person         TEXT NOT NULL,
    title          TEXT NOT NULL,
    url            TEXT NOT NULL,
    first_seen_utc TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_postings_dedupe
    ON postings(source, person, title, url);
"#;

/// Handle on the dedup database.
pub struct PostingStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for PostingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingStore").field("path", &self.path).finish()
    }
}

impl PostingStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WatchError::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WatchError::Store(format!("connection mutex poisoned: {e}")))
    }

    /// Insert every posting not seen before and return exactly those.
    ///
    /// Fields are trimmed and `person` replaces each posting's own person.
    /// The batch is all-or-nothing: on error nothing from this call is
    /// visible and the error is returned.
    pub fn insert_new(&self, person: &str, postings: &[Posting]) -> Result<Vec<Posting>> {
        let person = person.trim();
        let mut conn = self.lock()?;
        let result = insert_batch(&mut conn, person, postings);
        if let Err(e) = &result {
            tracing::error!(
                path = %self.path.display(),
                person,
                batch = postings.len(),
                error = %e,
                "dedup insert transaction failed"
            );
        }
        result
    }

    /// Number of stored postings.
    pub fn count_rows(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM postings", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

fn insert_batch(conn: &mut Connection, person: &str, postings: &[Posting]) -> Result<Vec<Posting>> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut fresh = Vec::new();
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO postings (source, person, title, url, first_seen_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for posting in postings {
            let (source, _, title, url) = posting.fingerprint();
            let changed = stmt.execute(params![source, person, title, url, now])?;
            if changed == 1 {
                fresh.push(Posting::new(source, person, title, url));
            }
        }
    }
    tx.commit()?;
    Ok(fresh)
}

/// One-shot form of [`PostingStore::insert_new`] against the database at `path`.
pub fn insert_new(path: &Path, person: &str, postings: &[Posting]) -> Result<Vec<Posting>> {
    PostingStore::open(path)?.insert_new(person, postings)
}

/// Delete the database at `path` together with its WAL side files.
///
/// Test and administrative use only.
pub fn reset(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        targets.push(PathBuf::from(side));
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
