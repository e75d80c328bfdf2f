//! Module invocation.
//!
//! [`ModuleRunner::run_module_once`] is the single entry point used by the
//! scheduler and the CLI: it normalizes kwargs, runs the module under an
//! optional timeout, coerces its output, emails the HTML when asked to and
//! writes one `module_run` activity record per invocation.

pub mod kwargs;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_watch::activity::{ActivitySink, TracingSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::emailer::{wrap_email_html, Emailer, OutboundEmail};
use crate::error::{CadenceError, Result};
use crate::modules::{ModuleContext, ModuleRegistry};
use crate::scheduler::{EmailRouting, JobSpec};

pub use kwargs::{normalize_kwargs, normalize_kwargs_with};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Cli,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Cli => "cli",
            Self::Manual => "manual",
        }
    }
}

/// Scheduler metadata attached to a scheduled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: String,
    pub scheduled_for: DateTime<Utc>,
}

/// One module invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub module: String,
    pub kwargs: Map<String, Value>,
    pub send_email: bool,
    pub timeout: Option<Duration>,
    pub email: EmailRouting,
    pub subject: Option<String>,
    pub trigger_type: TriggerType,
    pub job: Option<JobContext>,
}

impl RunRequest {
    /// A manual request with no kwargs that emails its output.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            run_id: new_run_id(),
            module: module.into(),
            kwargs: Map::new(),
            send_email: true,
            timeout: None,
            email: EmailRouting::default(),
            subject: None,
            trigger_type: TriggerType::Manual,
            job: None,
        }
    }

    /// The request a scheduled firing of `spec` makes.
    pub fn for_job(spec: &JobSpec, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            run_id: new_run_id(),
            module: spec.module.clone(),
            kwargs: spec.kwargs.clone(),
            send_email: spec.send_email,
            timeout: spec.timeout_sec.map(Duration::from_secs),
            email: spec.email.clone(),
            subject: spec.subject.clone(),
            trigger_type: TriggerType::Scheduled,
            job: Some(JobContext {
                job_id: spec.id.clone(),
                scheduled_for,
            }),
        }
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_send_email(mut self, send_email: bool) -> Self {
        self.send_email = send_email;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_email(mut self, email: EmailRouting) -> Self {
        self.email = email;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A module's return value in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleOutput {
    pub html: Option<String>,
    pub subject: Option<String>,
    pub message: String,
    pub meta: Map<String, Value>,
}

impl ModuleOutput {
    /// Coerce a module's raw return value.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Runner`] for numbers, booleans and arrays that are
    /// not an `[html, meta]` pair.
    pub fn from_value(module: &str, value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::with_meta(None, Map::new())),
            Value::String(html) => Ok(Self::with_meta(Some(html), Map::new())),
            Value::Object(mut obj) if obj.contains_key("html") => {
                let html = match obj.remove("html") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                };
                let meta = match obj.remove("meta") {
                    Some(Value::Object(m)) => m,
                    _ => Map::new(),
                };
                Ok(Self::with_meta(html, meta))
            }
            Value::Object(meta) => Ok(Self::with_meta(None, meta)),
            Value::Array(pair) => match <[Value; 2]>::try_from(pair) {
                Ok([Value::String(html), Value::Object(meta)]) => Ok(Self::with_meta(Some(html), meta)),
                _ => Err(unsupported(module)),
            },
            Value::Bool(_) | Value::Number(_) => Err(unsupported(module)),
        }
    }

    fn with_meta(html: Option<String>, meta: Map<String, Value>) -> Self {
        let subject = meta.get("subject").and_then(Value::as_str).map(str::to_owned);
        let message = meta
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("OK")
            .to_owned();
        Self {
            html,
            subject,
            message,
            meta,
        }
    }
}

fn unsupported(module: &str) -> CadenceError {
    CadenceError::Runner(format!(
        "module '{module}' returned an unsupported value (expected string, null, [html, meta] or {{html, meta}})"
    ))
}

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub module: String,
    pub output: ModuleOutput,
    pub emailed: bool,
    pub message_id: Option<String>,
    pub duration: Duration,
}

impl RunReport {
    /// One-line summary for history and logs.
    pub fn describe(&self) -> String {
        let mut line = self.output.message.clone();
        if self.emailed {
            line.push_str(" (emailed)");
        } else if self.output.html.is_some() {
            line.push_str(" (html not sent)");
        }
        line
    }
}

/// Executes module runs on behalf of the scheduler and the CLI.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn invoke(&self, request: RunRequest) -> Result<RunReport>;
}

/// [`Runner`] backed by a [`ModuleRegistry`].
#[derive(Clone)]
pub struct ModuleRunner {
    modules: Arc<ModuleRegistry>,
    emailer: Option<Arc<dyn Emailer>>,
    activity: Arc<dyn ActivitySink>,
    default_email_to: Vec<String>,
    dry_run: bool,
}

impl ModuleRunner {
    pub fn new(modules: ModuleRegistry) -> Self {
        Self {
            modules: Arc::new(modules),
            emailer: None,
            activity: Arc::new(TracingSink),
            default_email_to: Vec::new(),
            dry_run: false,
        }
    }

    pub fn with_emailer(mut self, emailer: Arc<dyn Emailer>) -> Self {
        self.emailer = Some(emailer);
        self
    }

    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    pub fn with_default_email_to(mut self, to: Vec<String>) -> Self {
        self.default_email_to = to;
        self
    }

    /// Dry-run suppresses all email regardless of the request.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Run one module invocation end to end.
    ///
    /// # Errors
    ///
    /// Unknown modules, module failures, [`CadenceError::Timeout`] and
    /// unsupported return values. Email failures are logged, not returned.
    pub async fn run_module_once(&self, request: RunRequest) -> Result<RunReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let kwargs = normalize_kwargs(&request.kwargs);

        let mut context = json!({
            "run_id": request.run_id,
            "module": request.module,
            "trigger_type": request.trigger_type.as_str(),
            "started_at": started_at.to_rfc3339(),
        });
        if let Some(job) = &request.job {
            context["job_id"] = json!(job.job_id);
            context["scheduled_for"] = json!(job.scheduled_for.to_rfc3339());
        }

        info!(run_id = %request.run_id, module = %request.module, trigger = request.trigger_type.as_str(), "module run starting");
        let result = self.invoke_module(&request, kwargs.clone()).await;
        let duration = started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!(run_id = %request.run_id, module = %request.module, duration_ms, error = %e, "module run failed");
                let meta = match &e {
                    CadenceError::Timeout { secs, .. } => json!({ "timeout_sec": secs }),
                    other => json!({ "error_kind": other.status() }),
                };
                let mut record = Self::run_record(&request, false, &e.to_string(), duration_ms, context, &kwargs, meta);
                record["emailed"] = json!(false);
                record["error"] = json!(e.to_string());
                self.activity.record(record.clone());
                self.activity.record_error(record);
                return Err(e);
            }
        };

        let (emailed, message_id) = match (&output.html, request.send_email && !self.dry_run) {
            (Some(html), true) => self.deliver(&request, &output, html).await,
            (Some(_), false) if self.dry_run => {
                info!(run_id = %request.run_id, module = %request.module, "dry run: email suppressed");
                (false, None)
            }
            _ => (false, None),
        };

        let mut record = Self::run_record(
            &request,
            true,
            &output.message,
            duration_ms,
            context,
            &kwargs,
            Value::Object(output.meta.clone()),
        );
        record["emailed"] = json!(emailed);
        record["email_message_id"] = json!(message_id);
        self.activity.record(record);

        info!(run_id = %request.run_id, module = %request.module, duration_ms, emailed, "module run finished");
        Ok(RunReport {
            run_id: request.run_id,
            module: request.module,
            output,
            emailed,
            message_id,
            duration,
        })
    }

    async fn invoke_module(&self, request: &RunRequest, kwargs: Map<String, Value>) -> Result<ModuleOutput> {
        let module = self.modules.resolve(&request.module)?;
        let ctx = ModuleContext {
            run_id: request.run_id.clone(),
            trigger_type: request.trigger_type,
            activity: Arc::clone(&self.activity),
        };

        // Detached so that an expired timeout can abandon the module.
        let mut task = tokio::spawn(async move { module.run(ctx, kwargs).await });
        let joined = match request.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(CadenceError::Timeout {
                        module: request.module.clone(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => task.await,
        };

        let value = joined.map_err(|e| {
            CadenceError::Runner(format!("module '{}' aborted: {e}", request.module))
        })??;
        ModuleOutput::from_value(&request.module, value)
    }

    /// Send the HTML. Returns `(emailed, message_id)`; never fails the run.
    async fn deliver(&self, request: &RunRequest, output: &ModuleOutput, html: &str) -> (bool, Option<String>) {
        let Some(emailer) = &self.emailer else {
            warn!(module = %request.module, "email requested but no SMTP relay is configured");
            return (false, None);
        };

        let subject = output
            .subject
            .clone()
            .or_else(|| request.subject.clone())
            .unwrap_or_else(|| format!("{} run — OK", request.module));
        let to = if !request.email.to.is_empty() {
            request.email.to.clone()
        } else if !self.default_email_to.is_empty() {
            self.default_email_to.clone()
        } else {
            emailer.sender_address().into_iter().collect()
        };

        let email = OutboundEmail {
            html: wrap_email_html(&subject, html),
            subject,
            to,
            cc: request.email.cc.clone(),
            bcc: request.email.bcc.clone(),
        };
        if email.to.is_empty() && email.cc.is_empty() && email.bcc.is_empty() {
            warn!(module = %request.module, "no recipients resolved; email not sent");
            return (false, None);
        }

        match emailer.send(&email).await {
            Ok(message_id) => (true, Some(message_id)),
            Err(e) => {
                error!(run_id = %request.run_id, module = %request.module, error = %e, "email send failed");
                (false, None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_record(
        request: &RunRequest,
        ok: bool,
        message: &str,
        duration_ms: u64,
        context: Value,
        kwargs: &Map<String, Value>,
        meta: Value,
    ) -> Value {
        json!({
            "event": "module_run",
            "run_id": request.run_id,
            "module": request.module,
            "trigger_type": request.trigger_type.as_str(),
            "ok": ok,
            "message": message,
            "duration_ms": duration_ms,
            "email_to": request.email.to,
            "cc": request.email.cc,
            "bcc": request.email.bcc,
            "context": context,
            "kwargs": kwargs,
            "meta": meta,
        })
    }
}

#[async_trait]
impl Runner for ModuleRunner {
    async fn invoke(&self, request: RunRequest) -> Result<RunReport> {
        self.run_module_once(request).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn output_shapes() {
        let out = ModuleOutput::from_value("m", json!("<p>x</p>")).unwrap();
        assert_eq!(out.html.as_deref(), Some("<p>x</p>"));
        assert_eq!(out.message, "OK");

        let out = ModuleOutput::from_value("m", Value::Null).unwrap();
        assert!(out.html.is_none());

        let out = ModuleOutput::from_value(
            "m",
            json!({"html": "<b>y</b>", "meta": {"subject": "S", "message": "2 new"}}),
        )
        .unwrap();
        assert_eq!(out.html.as_deref(), Some("<b>y</b>"));
        assert_eq!(out.subject.as_deref(), Some("S"));
        assert_eq!(out.message, "2 new");

        let out = ModuleOutput::from_value("m", json!(["<i>z</i>", {"count": 3}])).unwrap();
        assert_eq!(out.html.as_deref(), Some("<i>z</i>"));
        assert_eq!(out.meta["count"], json!(3));

        let out = ModuleOutput::from_value("m", json!({"volume": 20, "message": "set"})).unwrap();
        assert!(out.html.is_none());
        assert_eq!(out.message, "set");
        assert_eq!(out.meta["volume"], json!(20));
    }

    #[test]
    fn unsupported_outputs_are_errors() {
        assert!(ModuleOutput::from_value("m", json!(42)).is_err());
        assert!(ModuleOutput::from_value("m", json!(["a", "b"])).is_err());
        assert!(ModuleOutput::from_value("m", json!(["a", {}, 1])).is_err());
    }

    #[test]
    fn describe_mentions_email() {
        let mut report = RunReport {
            run_id: "r".into(),
            module: "m".into(),
            output: ModuleOutput::from_value("m", json!("<p/>")).unwrap(),
            emailed: true,
            message_id: Some("<id@cadence>".into()),
            duration: Duration::from_millis(5),
        };
        assert_eq!(report.describe(), "OK (emailed)");
        report.emailed = false;
        assert_eq!(report.describe(), "OK (html not sent)");
    }

    #[test]
    fn requests_get_fresh_run_ids() {
        let a = RunRequest::new("m");
        let b = RunRequest::new("m");
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.run_id.len(), 32);
        assert_eq!(a.trigger_type, TriggerType::Manual);
        assert!(a.send_email);
    }
}
