//! Error types for the cadence host.

use crate::scheduler::TriggerError;

/// Top-level error type for the automation host.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// Configuration file or host-level setting error.
    #[error("config error: {0}")]
    Config(String),

    /// A job definition is malformed.
    #[error("job '{job_id}': {reason}")]
    InvalidJob { job_id: String, reason: String },

    /// A job's trigger failed validation or compilation.
    #[error("job '{job_id}': invalid trigger: {source}")]
    InvalidTrigger {
        job_id: String,
        #[source]
        source: TriggerError,
    },

    /// Scheduler lifecycle error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Module resolution or execution error.
    #[error("runner error: {0}")]
    Runner(String),

    /// A module invocation exceeded its timeout.
    #[error("module '{module}' timed out after {secs}s")]
    Timeout { module: String, secs: u64 },

    /// Outbound email error.
    #[error("email error: {0}")]
    Email(String),

    /// Job-board watch error.
    #[error("watch error: {0}")]
    Watch(#[from] cadence_watch::WatchError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    /// Short status label for activity records.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            _ => "error",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_job() {
        let err = CadenceError::InvalidJob {
            job_id: "morning".into(),
            reason: "max_instances must be >= 1".into(),
        };
        assert_eq!(err.to_string(), "job 'morning': max_instances must be >= 1");
    }

    #[test]
    fn display_invalid_trigger_names_field() {
        let err = CadenceError::InvalidTrigger {
            job_id: "watch".into(),
            source: TriggerError::InvalidField {
                field: "cron".into(),
                reason: "cron string must have 5 or 6 fields (got 3)".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "job 'watch': invalid trigger: cron: cron string must have 5 or 6 fields (got 3)"
        );
    }

    #[test]
    fn timeout_status() {
        let err = CadenceError::Timeout {
            module: "career_watch".into(),
            secs: 30,
        };
        assert_eq!(err.status(), "timeout");
        assert_eq!(err.to_string(), "module 'career_watch' timed out after 30s");
        assert_eq!(CadenceError::Runner("x".into()).status(), "error");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CadenceError>();
    }
}
