//! Job definitions: validation of raw config objects into [`JobSpec`].

use chrono_tz::Tz;
use serde_json::{Map, Value};

use super::compile::{compile, CompiledTrigger};
use super::trigger::{has_trigger_keys, non_negative_int, TriggerError, TriggerSpec};
use crate::error::{CadenceError, Result};

/// Policy applied when a job leaves a field unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    pub max_instances: usize,
    pub coalesce: bool,
    pub misfire_grace_time: Option<u64>,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_instances: 1,
            coalesce: true,
            misfire_grace_time: None,
        }
    }
}

/// Email recipients attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailRouting {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl EmailRouting {
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }
}

/// A validated, schedulable job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub module: String,
    pub kwargs: Map<String, Value>,
    pub trigger: CompiledTrigger,
    pub send_email: bool,
    /// Seconds; `None` runs without a timeout.
    pub timeout_sec: Option<u64>,
    pub max_instances: usize,
    pub coalesce: bool,
    /// Seconds a firing may be late and still run; `None` is unbounded.
    pub misfire_grace_time: Option<u64>,
    pub email: EmailRouting,
    pub subject: Option<String>,
    pub summary: Option<String>,
}

/// Job id from `id`, `name` or `module`, else a positional fallback.
pub fn derive_job_id(raw: &Map<String, Value>, index: usize) -> String {
    ["id", "name", "module"]
        .iter()
        .find_map(|key| {
            raw.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map_or_else(|| format!("job_{index}"), str::to_owned)
}

/// Validate and compile a raw job object, reading `email_*_env` variables
/// from the process environment.
pub fn make_job_spec(
    raw: &Map<String, Value>,
    index: usize,
    defaults: &JobDefaults,
    tz: Tz,
) -> Result<JobSpec> {
    make_job_spec_with(raw, index, defaults, tz, |name| std::env::var(name).ok())
}

/// [`make_job_spec`] with an explicit environment lookup.
pub fn make_job_spec_with(
    raw: &Map<String, Value>,
    index: usize,
    defaults: &JobDefaults,
    tz: Tz,
    env: impl Fn(&str) -> Option<String>,
) -> Result<JobSpec> {
    let id = derive_job_id(raw, index);
    let invalid = |reason: String| CadenceError::InvalidJob {
        job_id: id.clone(),
        reason,
    };

    let module = raw
        .get("module")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| invalid("'module' is required and must be a non-empty string".into()))?
        .to_owned();

    let kwargs = match raw.get("kwargs") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(invalid("'kwargs' must be an object".into())),
    };

    let send_email = optional_bool(raw, "send_email").map_err(&invalid)?.unwrap_or(true);
    let coalesce = optional_bool(raw, "coalesce")
        .map_err(&invalid)?
        .unwrap_or(defaults.coalesce);
    let timeout_sec = optional_int(raw, "timeout_sec")
        .map_err(&invalid)?
        .filter(|t| *t > 0);
    let misfire_grace_time = optional_int(raw, "misfire_grace_time")
        .map_err(&invalid)?
        .or(defaults.misfire_grace_time);
    let max_instances = match optional_int(raw, "max_instances").map_err(&invalid)? {
        Some(0) => return Err(invalid("'max_instances' must be >= 1 (got 0)".into())),
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        None => defaults.max_instances.max(1),
    };

    let email = EmailRouting {
        to: email_list(raw, "email_to", &env).map_err(&invalid)?,
        cc: email_list(raw, "email_cc", &env).map_err(&invalid)?,
        bcc: email_list(raw, "email_bcc", &env).map_err(&invalid)?,
    };

    let subject = optional_text(raw, "subject").map_err(&invalid)?;
    let summary = match optional_text(raw, "summary").map_err(&invalid)? {
        Some(s) => Some(s),
        None => optional_text(raw, "description").map_err(&invalid)?,
    };

    let trigger = trigger_spec(raw, &id).and_then(|spec| {
        compile(&spec, tz).map_err(|source| CadenceError::InvalidTrigger {
            job_id: id.clone(),
            source,
        })
    })?;

    Ok(JobSpec {
        id,
        module,
        kwargs,
        trigger,
        send_email,
        timeout_sec,
        max_instances,
        coalesce,
        misfire_grace_time,
        email,
        subject,
        summary,
    })
}

/// The trigger lives under `trigger` or at the top level, never both.
fn trigger_spec(raw: &Map<String, Value>, job_id: &str) -> Result<TriggerSpec> {
    let wrap = |source: TriggerError| CadenceError::InvalidTrigger {
        job_id: job_id.to_owned(),
        source,
    };
    match raw.get("trigger") {
        None | Some(Value::Null) => TriggerSpec::from_container(raw).map_err(wrap),
        Some(Value::Object(nested)) => {
            if has_trigger_keys(raw) {
                return Err(CadenceError::InvalidJob {
                    job_id: job_id.to_owned(),
                    reason: "do not mix top-level trigger keys with a nested 'trigger'".into(),
                });
            }
            TriggerSpec::from_container(nested).map_err(wrap)
        }
        Some(_) => Err(CadenceError::InvalidJob {
            job_id: job_id.to_owned(),
            reason: "'trigger' must be an object when present".into(),
        }),
    }
}

fn optional_bool(raw: &Map<String, Value>, field: &str) -> std::result::Result<Option<bool>, String> {
    let bad = || format!("'{field}' must be a boolean (or boolean-like string)");
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(bad()),
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(bad()),
        },
        Some(_) => Err(bad()),
    }
}

fn optional_int(raw: &Map<String, Value>, field: &str) -> std::result::Result<Option<u64>, String> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => non_negative_int(field, v)
            .map(Some)
            .map_err(|e| match e {
                TriggerError::InvalidField { reason, .. } => format!("'{field}' {reason}"),
                other => other.to_string(),
            }),
    }
}

fn optional_text(raw: &Map<String, Value>, field: &str) -> std::result::Result<Option<String>, String> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_owned())),
        Some(_) => Err(format!("'{field}' must be a string")),
    }
}

fn split_addresses(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Recipients for `field`. A string value under `{field}_env` names an
/// environment variable whose contents replace the inline value.
fn email_list(
    raw: &Map<String, Value>,
    field: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> std::result::Result<Vec<String>, String> {
    let env_key = format!("{field}_env");
    if let Some(var) = raw.get(&env_key) {
        let name = var
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("'{env_key}' must name an environment variable"))?;
        return Ok(env(name).map(|v| split_addresses(&v)).unwrap_or_default());
    }
    match raw.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(split_addresses(s)),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| format!("{field}[{i}] must be a non-empty string"))
            })
            .collect(),
        Some(_) => Err(format!("'{field}' must be a string or list of strings")),
    }
}
