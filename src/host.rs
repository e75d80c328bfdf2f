//! Wiring from a loaded [`HostConfig`] to a runnable host.

use std::sync::Arc;

use cadence_watch::activity::ActivitySink;
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::config::HostConfig;
use crate::emailer::SmtpEmailer;
use crate::error::{CadenceError, Result};
use crate::modules::{default_modules, ModuleRegistry};
use crate::runner::ModuleRunner;
use crate::scheduler::{JobDefaults, Scheduler};

/// Shared services built once per process.
pub struct Host {
    pub config: HostConfig,
    pub activity: Arc<ActivityLog>,
    pub runner: Arc<ModuleRunner>,
    pub timezone: Tz,
}

impl Host {
    /// Build the host with the built-in modules.
    pub fn from_config(config: HostConfig) -> Result<Self> {
        Self::with_modules(config, default_modules())
    }

    /// Build the host around an explicit module registry.
    ///
    /// # Errors
    ///
    /// Invalid config or SMTP settings.
    pub fn with_modules(config: HostConfig, modules: ModuleRegistry) -> Result<Self> {
        config.validate()?;
        let activity = Arc::new(match &config.log_dir {
            Some(dir) => ActivityLog::new(dir),
            None => ActivityLog::tracing_only(),
        });
        let dry_run = config.is_dry_run();
        if dry_run {
            info!("dry run: email delivery disabled");
        }

        let mut runner = ModuleRunner::new(modules)
            .with_activity(Arc::clone(&activity) as Arc<dyn ActivitySink>)
            .with_default_email_to(config.default_email_to.clone())
            .with_dry_run(dry_run);
        match &config.smtp {
            Some(smtp) => runner = runner.with_emailer(Arc::new(SmtpEmailer::from_config(smtp)?)),
            None => warn!("no smtp section configured; module HTML will not be emailed"),
        }

        let timezone = config.scheduler_timezone();
        Ok(Self {
            config,
            activity,
            runner: Arc::new(runner),
            timezone,
        })
    }

    /// A scheduler with every valid configured job registered, plus the
    /// errors of the jobs that were skipped.
    pub fn scheduler(&self) -> (Scheduler, Vec<CadenceError>) {
        let mut scheduler = Scheduler::new(Arc::clone(&self.runner) as Arc<dyn crate::runner::Runner>)
            .with_activity(Arc::clone(&self.activity) as Arc<dyn ActivitySink>)
            .with_workers(self.config.executor_workers);
        let failures = scheduler.register_jobs(&self.config.jobs, &JobDefaults::default(), self.timezone);
        (scheduler, failures)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn scheduler_registers_valid_jobs_and_reports_the_rest() {
        let config = HostConfig {
            timezone: Some("America/Chicago".into()),
            jobs: vec![
                json!({"id": "daily", "module": "example_daily", "cron": "0 7 * * *"}),
                json!({"id": "broken", "module": "example_daily", "cron": "0 7 *"}),
            ],
            ..HostConfig::default()
        };
        let host = Host::from_config(config).unwrap();
        assert_eq!(host.timezone, chrono_tz::America::Chicago);

        let (scheduler, failures) = host.scheduler();
        assert_eq!(scheduler.jobs().len(), 1);
        assert_eq!(scheduler.jobs()[0].id, "daily");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("job 'broken'"));
    }

    #[test]
    fn duplicate_ids_fail_host_construction() {
        let config = HostConfig {
            jobs: vec![
                json!({"id": "a", "module": "example_daily", "cron": "0 7 * * *"}),
                json!({"name": "a", "module": "example_daily", "cron": "0 8 * * *"}),
            ],
            ..HostConfig::default()
        };
        let err = Host::from_config(config).err().unwrap();
        assert!(err.to_string().contains("duplicate job id 'a'"));
    }
}
