//! Host configuration.
//!
//! Loaded from TOML or JSON (chosen by file extension). Jobs stay open JSON
//! objects here and are validated by [`crate::scheduler::jobs`], so every
//! problem is reported against a job id.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CadenceError, Result};
use crate::scheduler::jobs::derive_job_id;

/// Env var naming the config file when no `--config` flag is given.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Env var forcing dry-run mode (no email is sent).
pub const DRY_RUN_ENV: &str = "SCHEDULED_MODULES_DRY_RUN";

/// Top-level configuration for the automation host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// IANA timezone for triggers that name none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Concurrently executing job runs.
    pub executor_workers: usize,
    /// Directory for activity logs and the rolling diagnostic log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Run modules but never send email.
    pub dry_run: bool,
    /// Recipients for jobs that route nowhere.
    pub default_email_to: Vec<String>,
    /// Outbound mail server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
    /// Raw job objects.
    pub jobs: Vec<Value>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            executor_workers: crate::scheduler::controller::DEFAULT_WORKERS,
            log_dir: None,
            dry_run: false,
            default_email_to: Vec::new(),
            smtp: None,
            jobs: Vec::new(),
        }
    }
}

/// SMTP relay settings. Credentials come from `SMTP_USERNAME` and
/// `SMTP_PASSWORD`, never from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Sender address, e.g. `"Cadence <cadence@example.com>"`.
    pub from: String,
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

impl HostConfig {
    /// Load configuration from a file. `.json` files are read as JSON,
    /// anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CadenceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| CadenceError::Config(format!("invalid JSON in {}: {e}", path.display())))
        } else {
            toml::from_str(&content)
                .map_err(|e| CadenceError::Config(format!("invalid TOML in {}: {e}", path.display())))
        }
    }

    /// Load from `explicit`, else `CONFIG_PATH`, else the default location.
    ///
    /// A missing file at the default location yields an empty configuration;
    /// a missing file that was asked for explicitly is an error.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        match requested {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => {
                let path = Self::default_config_path();
                if path.exists() {
                    Ok((Self::from_file(&path)?, Some(path)))
                } else {
                    info!(path = %path.display(), "no config file found, using empty configuration");
                    Ok((Self::default(), None))
                }
            }
        }
    }

    /// Save configuration as TOML, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CadenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/cadence/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("cadence").join("config.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".config").join("cadence").join("config.toml")
        } else {
            PathBuf::from("/tmp/cadence-config/config.toml")
        }
    }

    /// Host-level checks: worker count, job shape, unique job ids.
    ///
    /// Trigger and policy validation happens per job at registration.
    pub fn validate(&self) -> Result<()> {
        if self.executor_workers == 0 {
            return Err(CadenceError::Config("executor_workers must be >= 1".into()));
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.trim().is_empty() || smtp.from.trim().is_empty() {
                return Err(CadenceError::Config("smtp.host and smtp.from are required".into()));
            }
        }
        let mut seen = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            let Some(obj) = job.as_object() else {
                return Err(CadenceError::Config(format!("job at index {index} must be an object")));
            };
            let id = derive_job_id(obj, index);
            if !seen.insert(id.clone()) {
                return Err(CadenceError::Config(format!("duplicate job id '{id}'")));
            }
        }
        Ok(())
    }

    /// Scheduler timezone from config, then `TZ`, then UTC.
    pub fn scheduler_timezone(&self) -> Tz {
        resolve_timezone(self.timezone.as_deref(), std::env::var("TZ").ok().as_deref())
    }

    /// Dry-run from config or `SCHEDULED_MODULES_DRY_RUN`.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run || std::env::var(DRY_RUN_ENV).is_ok_and(|v| is_truthy(&v))
    }
}

/// First non-blank of `configured` and `env_tz`, else UTC. An unknown name
/// logs a warning and falls back to UTC.
pub fn resolve_timezone(configured: Option<&str>, env_tz: Option<&str>) -> Tz {
    let name = [configured, env_tz]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty());
    let Some(name) = name else {
        return Tz::UTC;
    };
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = name, "invalid timezone, falling back to UTC");
        Tz::UTC
    })
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
