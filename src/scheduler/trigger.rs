//! Declarative trigger descriptions.
//!
//! A job's trigger is one of four shapes, read from JSON/TOML config:
//!
//! ```text
//! {"cron": "0 7 * * mon-fri"}
//! {"cron": {"hour": "5-6", "minute": "0,45", "day_of_week": "mon-sat"}}
//! {"interval": {"hours": 6, "jitter": 30}}
//! {"date": {"run_at": "2026-03-01T09:00:00", "timezone": "Europe/Oslo"}}
//! {"daily_time": {"time": ["05:00", "06:30"], "day_of_week": "mon-sat"}}
//! ```
//!
//! Parsing here only checks shape: the variant count, the field sets and the
//! scalar types. Semantic checks (cron syntax, time ranges, timezone names,
//! dates) happen in [`super::compile`].

use serde_json::{Map, Value};

/// Trigger keys, in the order they are reported.
pub const TRIGGER_KINDS: [&str; 4] = ["cron", "interval", "date", "daily_time"];

const INTERVAL_FIELDS: &[&str] = &[
    "weeks",
    "days",
    "hours",
    "minutes",
    "seconds",
    "jitter",
    "timezone",
    "start_date",
    "end_date",
];

const CRON_FIELDS: &[&str] = &[
    "second",
    "minute",
    "hour",
    "day",
    "day_of_week",
    "month",
    "timezone",
    "start_date",
    "end_date",
    "jitter",
];

const DATE_FIELDS: &[&str] = &["run_at", "timezone"];

const DAILY_TIME_FIELDS: &[&str] = &["time", "day_of_week", "timezone"];

/// Why a trigger description was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// Zero or several of `cron`/`interval`/`date`/`daily_time` were given.
    #[error("exactly one of cron, interval, date or daily_time must be provided (found {found})")]
    VariantCount { found: String },

    /// A field outside the variant's field set.
    #[error("{variant} has unknown field(s): {fields}")]
    UnknownFields { variant: &'static str, fields: String },

    /// A field with an unusable value.
    #[error("{field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl TriggerError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A date/time as written in config: epoch seconds or text.
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    Epoch(f64),
    Text(String),
}

/// Cron trigger: a crontab line or per-field expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum CronSpec {
    Crontab(String),
    Fields(CronFields),
}

/// Object-form cron. `None` means the field's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronFields {
    pub second: Option<String>,
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub day: Option<String>,
    pub day_of_week: Option<String>,
    pub month: Option<String>,
    pub timezone: Option<String>,
    pub start_date: Option<DateInput>,
    pub end_date: Option<DateInput>,
    pub jitter: Option<u64>,
}

/// Fixed-period recurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalSpec {
    pub weeks: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub jitter: Option<u64>,
    pub timezone: Option<String>,
    pub start_date: Option<DateInput>,
    pub end_date: Option<DateInput>,
}

impl IntervalSpec {
    /// Period in seconds, saturating.
    pub fn total_seconds(&self) -> u64 {
        let days = self.weeks.saturating_mul(7).saturating_add(self.days);
        days.saturating_mul(86_400)
            .saturating_add(self.hours.saturating_mul(3_600))
            .saturating_add(self.minutes.saturating_mul(60))
            .saturating_add(self.seconds)
    }
}

/// One-shot trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct DateSpec {
    pub run_at: DateInput,
    pub timezone: Option<String>,
}

/// Exact wall-clock times of day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTimeSpec {
    /// Raw `HH:MM[:SS]` strings as written.
    pub times: Vec<String>,
    pub day_of_week: Option<String>,
    pub timezone: Option<String>,
}

/// Exactly one trigger shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Cron(CronSpec),
    Interval(IntervalSpec),
    Date(DateSpec),
    DailyTime(DailyTimeSpec),
}

impl TriggerSpec {
    /// Parse from an object holding exactly one trigger key.
    ///
    /// Keys with a `null` value count as absent. Other keys in `container`
    /// are ignored, so a whole job object can be passed when the trigger is
    /// written at the job's top level.
    pub fn from_container(container: &Map<String, Value>) -> Result<Self, TriggerError> {
        let present: Vec<&str> = TRIGGER_KINDS
            .iter()
            .copied()
            .filter(|k| container.get(*k).is_some_and(|v| !v.is_null()))
            .collect();
        let [kind] = present.as_slice() else {
            let found = if present.is_empty() {
                "none".to_owned()
            } else {
                present.join(", ")
            };
            return Err(TriggerError::VariantCount { found });
        };
        let value = &container[*kind];
        match *kind {
            "cron" => parse_cron(value).map(Self::Cron),
            "interval" => parse_interval(value).map(Self::Interval),
            "date" => parse_date(value).map(Self::Date),
            _ => parse_daily_time(value).map(Self::DailyTime),
        }
    }

    /// `cron`, `interval`, `date` or `daily_time`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Interval(_) => "interval",
            Self::Date(_) => "date",
            Self::DailyTime(_) => "daily_time",
        }
    }
}

/// True when `obj` carries any trigger key (null values ignored).
pub fn has_trigger_keys(obj: &Map<String, Value>) -> bool {
    TRIGGER_KINDS
        .iter()
        .any(|k| obj.get(*k).is_some_and(|v| !v.is_null()))
}

fn object<'a>(variant: &'static str, value: &'a Value) -> Result<&'a Map<String, Value>, TriggerError> {
    value
        .as_object()
        .ok_or_else(|| TriggerError::field(variant, "must be an object"))
}

fn reject_unknown(
    variant: &'static str,
    obj: &Map<String, Value>,
    allowed: &[&str],
) -> Result<(), TriggerError> {
    let mut unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(TriggerError::UnknownFields {
        variant,
        fields: unknown.join(", "),
    })
}

/// Non-negative integer from a number or a digit string.
pub(crate) fn non_negative_int(field: &str, value: &Value) -> Result<u64, TriggerError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v >= 0 => Ok(v as u64),
        Some(_) => Err(TriggerError::field(field, "must be >= 0")),
        None => Err(TriggerError::field(field, "must be an integer")),
    }
}

/// Cron field expression from a string or an integer.
fn expression(field: &str, value: &Value) -> Result<Option<String>, TriggerError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => {
            Err(TriggerError::field(field, "must not be empty"))
        }
        Value::String(s) => Ok(Some(s.trim().to_owned())),
        Value::Number(n) if n.is_u64() => Ok(Some(n.to_string())),
        _ => Err(TriggerError::field(
            field,
            "must be a cron expression string or a non-negative integer",
        )),
    }
}

fn optional_string(field: &str, value: Option<&Value>) -> Result<Option<String>, TriggerError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_owned())),
        Some(_) => Err(TriggerError::field(field, "must be a non-empty string")),
    }
}

/// TOML datetimes arrive as `{"$__toml_private_datetime": "..."}` when
/// converted through `serde_json::Value`.
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

pub(crate) fn date_input(field: &str, value: &Value) -> Result<Option<DateInput>, TriggerError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(|f| Some(DateInput::Epoch(f)))
            .ok_or_else(|| TriggerError::field(field, "invalid epoch seconds")),
        Value::String(s) if !s.trim().is_empty() => Ok(Some(DateInput::Text(s.trim().to_owned()))),
        Value::Object(obj) => match obj.get(TOML_DATETIME_KEY) {
            Some(Value::String(s)) if obj.len() == 1 => Ok(Some(DateInput::Text(s.clone()))),
            _ => Err(TriggerError::field(field, "must be an ISO-8601 string or epoch seconds")),
        },
        _ => Err(TriggerError::field(field, "must be an ISO-8601 string or epoch seconds")),
    }
}

fn jitter(field: &str, obj: &Map<String, Value>) -> Result<Option<u64>, TriggerError> {
    match obj.get("jitter") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => non_negative_int(field, v).map(|j| (j > 0).then_some(j)),
    }
}

fn parse_cron(value: &Value) -> Result<CronSpec, TriggerError> {
    if let Value::String(line) = value {
        let count = line.split_whitespace().count();
        if count != 5 && count != 6 {
            return Err(TriggerError::field(
                "cron",
                format!("cron string must have 5 or 6 fields (got {count})"),
            ));
        }
        return Ok(CronSpec::Crontab(line.trim().to_owned()));
    }
    let obj = value
        .as_object()
        .ok_or_else(|| TriggerError::field("cron", "must be a crontab string or an object"))?;
    reject_unknown("cron", obj, CRON_FIELDS)?;
    let expr = |name: &str| -> Result<Option<String>, TriggerError> {
        obj.get(name)
            .map_or(Ok(None), |v| expression(&format!("cron.{name}"), v))
    };
    Ok(CronSpec::Fields(CronFields {
        second: expr("second")?,
        minute: expr("minute")?,
        hour: expr("hour")?,
        day: expr("day")?,
        day_of_week: expr("day_of_week")?,
        month: expr("month")?,
        timezone: optional_string("cron.timezone", obj.get("timezone"))?,
        start_date: obj
            .get("start_date")
            .map_or(Ok(None), |v| date_input("cron.start_date", v))?,
        end_date: obj
            .get("end_date")
            .map_or(Ok(None), |v| date_input("cron.end_date", v))?,
        jitter: jitter("cron.jitter", obj)?,
    }))
}

fn parse_interval(value: &Value) -> Result<IntervalSpec, TriggerError> {
    let obj = object("interval", value)?;
    reject_unknown("interval", obj, INTERVAL_FIELDS)?;
    let unit = |name: &str| -> Result<u64, TriggerError> {
        match obj.get(name) {
            None | Some(Value::Null) => Ok(0),
            Some(v) => non_negative_int(&format!("interval.{name}"), v),
        }
    };
    let spec = IntervalSpec {
        weeks: unit("weeks")?,
        days: unit("days")?,
        hours: unit("hours")?,
        minutes: unit("minutes")?,
        seconds: unit("seconds")?,
        jitter: jitter("interval.jitter", obj)?,
        timezone: optional_string("interval.timezone", obj.get("timezone"))?,
        start_date: obj
            .get("start_date")
            .map_or(Ok(None), |v| date_input("interval.start_date", v))?,
        end_date: obj
            .get("end_date")
            .map_or(Ok(None), |v| date_input("interval.end_date", v))?,
    };
    if spec.total_seconds() == 0 {
        return Err(TriggerError::field(
            "interval",
            "must be > 0 (provide at least one nonzero time field)",
        ));
    }
    Ok(spec)
}

fn parse_date(value: &Value) -> Result<DateSpec, TriggerError> {
    let (run_at, timezone) = match value {
        Value::Object(obj) if !obj.contains_key(TOML_DATETIME_KEY) => {
            reject_unknown("date", obj, DATE_FIELDS)?;
            let run_at = obj
                .get("run_at")
                .map_or(Ok(None), |v| date_input("date.run_at", v))?;
            (run_at, optional_string("date.timezone", obj.get("timezone"))?)
        }
        scalar => (date_input("date.run_at", scalar)?, None),
    };
    let run_at = run_at.ok_or_else(|| TriggerError::field("date.run_at", "is required"))?;
    Ok(DateSpec { run_at, timezone })
}

fn parse_daily_time(value: &Value) -> Result<DailyTimeSpec, TriggerError> {
    let obj = object("daily_time", value)?;
    reject_unknown("daily_time", obj, DAILY_TIME_FIELDS)?;
    let times = match obj.get("time") {
        None | Some(Value::Null) => {
            return Err(TriggerError::field("daily_time.time", "is required"));
        }
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(TriggerError::field(
                    "daily_time.time",
                    format!("entries must be strings, got {other}"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(TriggerError::field(
                "daily_time.time",
                "must be a string or a non-empty list of strings",
            ));
        }
    };
    let day_of_week = match obj.get("day_of_week") {
        None | Some(Value::Null) => None,
        Some(v) => expression("daily_time.day_of_week", v)?,
    };
    Ok(DailyTimeSpec {
        times,
        day_of_week,
        timezone: optional_string("daily_time.timezone", obj.get("timezone"))?,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Result<TriggerSpec, TriggerError> {
        TriggerSpec::from_container(v.as_object().unwrap())
    }

    #[test]
    fn requires_exactly_one_variant() {
        let none = parse(json!({"kwargs": {}})).unwrap_err();
        assert!(matches!(none, TriggerError::VariantCount { ref found } if found == "none"));

        let two = parse(json!({"cron": "0 7 * * *", "interval": {"hours": 1}})).unwrap_err();
        assert!(two.to_string().contains("found cron, interval"));

        // null counts as absent
        assert!(parse(json!({"cron": "0 7 * * *", "date": null})).is_ok());
    }

    #[test]
    fn every_single_variant_missing_or_doubled_fails() {
        let samples = [
            ("cron", json!("0 7 * * *")),
            ("interval", json!({"minutes": 5})),
            ("date", json!("2030-01-01T00:00:00Z")),
            ("daily_time", json!({"time": "07:00"})),
        ];
        for (i, (a, va)) in samples.iter().enumerate() {
            let mut one = Map::new();
            one.insert((*a).to_owned(), va.clone());
            assert!(TriggerSpec::from_container(&one).is_ok(), "{a}");
            for (b, vb) in samples.iter().skip(i + 1) {
                let mut two = one.clone();
                two.insert((*b).to_owned(), vb.clone());
                assert!(TriggerSpec::from_container(&two).is_err(), "{a}+{b}");
            }
        }
    }

    #[test]
    fn crontab_field_count_is_checked() {
        let err = parse(json!({"cron": "*/15 * *"})).unwrap_err();
        assert_eq!(
            err,
            TriggerError::field("cron", "cron string must have 5 or 6 fields (got 3)")
        );
        assert!(parse(json!({"cron": "0 0 7 * * *"})).is_ok());
        assert!(parse(json!({"cron": "0 0 7 * * * 2030"})).is_err());
    }

    #[test]
    fn cron_object_accepts_ints_and_rejects_unknown_fields() {
        let spec = parse(json!({"cron": {"hour": 7, "minute": "0,45", "day_of_week": "mon-fri"}})).unwrap();
        let TriggerSpec::Cron(CronSpec::Fields(f)) = spec else {
            panic!("expected cron fields");
        };
        assert_eq!(f.hour.as_deref(), Some("7"));
        assert_eq!(f.minute.as_deref(), Some("0,45"));
        assert_eq!(f.second, None);

        let err = parse(json!({"cron": {"hour": 7, "hours": 8}})).unwrap_err();
        assert_eq!(err.to_string(), "cron has unknown field(s): hours");
    }

    #[test]
    fn interval_units_are_validated() {
        let TriggerSpec::Interval(iv) = parse(json!({"interval": {"weeks": 1, "days": "2", "seconds": 5}})).unwrap()
        else {
            panic!("expected interval");
        };
        assert_eq!(iv.total_seconds(), 9 * 86_400 + 5);

        assert!(parse(json!({"interval": {"hours": -1}})).unwrap_err().to_string().contains(">= 0"));
        assert!(parse(json!({"interval": {"hours": "soon"}})).unwrap_err().to_string().contains("integer"));
        assert!(parse(json!({"interval": {"hours": 0}})).unwrap_err().to_string().contains("> 0"));
        assert!(matches!(
            parse(json!({"interval": {"hour": 1}})).unwrap_err(),
            TriggerError::UnknownFields { variant: "interval", .. }
        ));
        assert!(parse(json!({"interval": 3600})).is_err());
    }

    #[test]
    fn date_accepts_scalar_object_and_toml_datetime() {
        let TriggerSpec::Date(d) = parse(json!({"date": 1_800_000_000})).unwrap() else {
            panic!("expected date");
        };
        assert_eq!(d.run_at, DateInput::Epoch(1_800_000_000.0));

        let TriggerSpec::Date(d) = parse(json!({"date": {"run_at": "2030-01-01 09:00", "timezone": "UTC"}})).unwrap()
        else {
            panic!("expected date");
        };
        assert_eq!(d.timezone.as_deref(), Some("UTC"));

        let toml_dt = json!({"date": {"$__toml_private_datetime": "2030-01-01T09:00:00Z"}});
        assert!(parse(toml_dt).is_ok());

        assert!(parse(json!({"date": {"timezone": "UTC"}})).unwrap_err().to_string().contains("required"));
        assert!(parse(json!({"date": {"run_at": "x", "at": 1}})).is_err());
    }

    #[test]
    fn daily_time_shapes() {
        let TriggerSpec::DailyTime(d) = parse(json!({"daily_time": {"time": "07:30"}})).unwrap() else {
            panic!("expected daily_time");
        };
        assert_eq!(d.times, vec!["07:30".to_string()]);

        assert!(parse(json!({"daily_time": {"time": []}})).is_err());
        assert!(parse(json!({"daily_time": {"time": [7]}})).is_err());
        assert!(parse(json!({"daily_time": {"day_of_week": "mon"}})).is_err());
        assert!(parse(json!({"daily_time": "07:00"})).is_err());
        assert!(parse(json!({"daily_time": {"time": "07:00", "minute": 5}})).is_err());
    }
}
