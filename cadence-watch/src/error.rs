//! Error types for the cadence-watch crate.
//!
//! Scraper-level problems that a well-behaved scraper can anticipate are
//! reported through [`crate::types::ScrapeResult::errors`]; the variants here
//! are reserved for configuration mistakes, store failures and genuinely
//! unexpected conditions.

/// Errors that can occur while watching job boards.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Invalid watch settings or scraper parameters.
    #[error("config error: {0}")]
    Config(String),

    /// The dedup store could not complete a transaction.
    #[error("store error: {0}")]
    Store(String),

    /// An HTTP request to a job board failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Failed to parse a job board response.
    #[error("parse error: {0}")]
    Parse(String),

    /// A scraper kind failed as a whole.
    #[error("scraper error: {0}")]
    Scraper(String),

    /// Registering or resolving a scraper kind failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// Filesystem failure outside of SQLite itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for WatchError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Convenience type alias for cadence-watch results.
pub type Result<T> = std::result::Result<T, WatchError>;
