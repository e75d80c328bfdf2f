//! Trigger compilation: [`TriggerSpec`] to concrete recurrence rules.
//!
//! Compilation is pure and deterministic. Every semantic problem (bad cron
//! syntax, out-of-range times, unknown timezones, unparsable dates) surfaces
//! here, so firing only ever consumes validated rules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use rand::Rng;

use super::cron_fields;
use super::trigger::{
    CronSpec, DailyTimeSpec, DateInput, DateSpec, IntervalSpec, TriggerError, TriggerSpec,
};

const MAX_INTERVAL_SECONDS: i64 = 100 * 366 * 86_400;

/// Cron-expression rule evaluated in a fixed timezone.
#[derive(Debug, Clone)]
pub struct CronRule {
    expression: String,
    schedule: Schedule,
    tz: Tz,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    jitter: Option<u64>,
}

impl CronRule {
    fn new(
        expression: String,
        tz: Tz,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        jitter: Option<u64>,
    ) -> Result<Self, TriggerError> {
        let schedule = Schedule::from_str(&expression).map_err(|e| {
            TriggerError::field("cron", format!("invalid expression '{expression}': {e}"))
        })?;
        check_window(start, end)?;
        Ok(Self {
            expression,
            schedule,
            tz,
            start,
            end,
            jitter,
        })
    }

    /// Seconds-first expression as handed to the `cron` crate.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        // `Schedule::after` is exclusive, so step back a tick for the
        // inclusive lower bounds.
        let tick = Duration::nanoseconds(1);
        let mut after = previous.unwrap_or(now - tick);
        if let Some(start) = self.start {
            after = after.max(start - tick);
        }
        let next = self
            .schedule
            .after(&after.with_timezone(&self.tz))
            .next()?
            .with_timezone(&Utc);
        within_end(next, self.end)
    }
}

/// Fixed-period rule.
#[derive(Debug, Clone)]
pub struct IntervalRule {
    period: Duration,
    tz: Tz,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    jitter: Option<u64>,
}

impl IntervalRule {
    pub fn period(&self) -> Duration {
        self.period
    }

    fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next = match (previous, self.start) {
            (Some(prev), _) => prev + self.period,
            (None, Some(start)) if now <= start => start,
            (None, Some(start)) => {
                let period_ms = self.period.num_milliseconds().max(1);
                let elapsed_ms = (now - start).num_milliseconds();
                let steps = (elapsed_ms + period_ms - 1) / period_ms;
                start + Duration::milliseconds(steps.saturating_mul(period_ms))
            }
            (None, None) => now + self.period,
        };
        within_end(next, self.end)
    }
}

/// One-shot rule.
#[derive(Debug, Clone)]
pub struct DateRule {
    run_at: DateTime<Utc>,
    tz: Tz,
}

impl DateRule {
    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }
}

/// A single immutable recurrence rule.
#[derive(Debug, Clone)]
pub enum Recurrence {
    Cron(CronRule),
    Interval(IntervalRule),
    Date(DateRule),
}

impl Recurrence {
    /// Next nominal fire time, before jitter.
    ///
    /// With `previous`, the first instant strictly after it. Without, the
    /// first instant at or after `now` (and `start_date`).
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(rule) => rule.next_fire_time(previous, now),
            Self::Interval(rule) => rule.next_fire_time(previous, now),
            Self::Date(rule) => previous.is_none().then_some(rule.run_at),
        }
    }

    pub fn jitter(&self) -> Option<u64> {
        match self {
            Self::Cron(rule) => rule.jitter,
            Self::Interval(rule) => rule.jitter,
            Self::Date(_) => None,
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            Self::Cron(rule) => rule.tz,
            Self::Interval(rule) => rule.tz,
            Self::Date(rule) => rule.tz,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(rule) => write!(f, "cron[{}] ({})", rule.expression, rule.tz),
            Self::Interval(rule) => {
                write!(f, "interval[every {}s]", rule.period.num_seconds())?;
                if let Some(start) = rule.start {
                    write!(f, " from {}", start.with_timezone(&rule.tz).to_rfc3339())?;
                }
                Ok(())
            }
            Self::Date(rule) => write!(f, "date[{}]", rule.run_at.with_timezone(&rule.tz).to_rfc3339()),
        }
    }
}

/// Output of [`compile`]: one rule, or an OR-combination of several.
#[derive(Debug, Clone)]
pub enum CompiledTrigger {
    Single(Recurrence),
    /// Fires whenever any constituent rule fires.
    Any(Vec<Recurrence>),
}

impl CompiledTrigger {
    /// Next nominal fire time, before jitter. For an OR-combination, the
    /// earliest across its rules.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Single(rule) => rule.next_fire_time(previous, now),
            Self::Any(rules) => rules
                .iter()
                .filter_map(|rule| rule.next_fire_time(previous, now))
                .min(),
        }
    }

    /// Upper jitter bound in seconds.
    pub fn jitter(&self) -> Option<u64> {
        match self {
            Self::Single(rule) => rule.jitter(),
            Self::Any(rules) => rules.iter().filter_map(Recurrence::jitter).max(),
        }
    }

    /// Nominal fire time delayed by a uniform offset in `[0, jitter]` seconds.
    pub fn jittered(&self, nominal: DateTime<Utc>) -> DateTime<Utc> {
        match self.jitter() {
            Some(bound) if bound > 0 => {
                let offset = rand::thread_rng().gen_range(0..=bound);
                nominal + Duration::seconds(offset as i64)
            }
            _ => nominal,
        }
    }

    /// The next `count` nominal fire times from `now`.
    pub fn preview(&self, count: usize, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut previous = None;
        while times.len() < count {
            let Some(next) = self.next_fire_time(previous, now) else {
                break;
            };
            times.push(next);
            previous = Some(next);
        }
        times
    }

    pub fn rules(&self) -> &[Recurrence] {
        match self {
            Self::Single(rule) => std::slice::from_ref(rule),
            Self::Any(rules) => rules,
        }
    }
}

impl fmt::Display for CompiledTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(rule) => write!(f, "{rule}"),
            Self::Any(rules) => {
                f.write_str("any[")?;
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{rule}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Compile a trigger description. `default_tz` applies wherever the
/// description names no timezone of its own.
pub fn compile(spec: &TriggerSpec, default_tz: Tz) -> Result<CompiledTrigger, TriggerError> {
    match spec {
        TriggerSpec::Cron(cron) => compile_cron(cron, default_tz).map(CompiledTrigger::Single),
        TriggerSpec::Interval(interval) => {
            compile_interval(interval, default_tz).map(CompiledTrigger::Single)
        }
        TriggerSpec::Date(date) => compile_date(date, default_tz).map(CompiledTrigger::Single),
        TriggerSpec::DailyTime(daily) => compile_daily_time(daily, default_tz),
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(field: &str, name: &str) -> Result<Tz, TriggerError> {
    name.parse::<Tz>()
        .map_err(|e| TriggerError::field(field, format!("unknown timezone '{name}': {e}")))
}

fn effective_tz(field: &str, own: Option<&str>, default_tz: Tz) -> Result<Tz, TriggerError> {
    own.map_or(Ok(default_tz), |name| parse_timezone(field, name))
}

/// Resolve a configured date. Naive values adopt `tz`.
pub fn resolve_date(field: &str, input: &DateInput, tz: Tz) -> Result<DateTime<Utc>, TriggerError> {
    let invalid = |detail: &str| TriggerError::field(field, format!("invalid date: {detail}"));
    match input {
        DateInput::Epoch(secs) => {
            if !secs.is_finite() {
                return Err(invalid("epoch seconds must be finite"));
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round() as u32;
            DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
                .ok_or_else(|| invalid("epoch seconds out of range"))
        }
        DateInput::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(&text.replacen(' ', "T", 1)) {
                return Ok(dt.with_timezone(&Utc));
            }
            let naive = parse_naive(text).ok_or_else(|| invalid(text))?;
            tz.from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| invalid(&format!("{text} does not exist in {tz}")))
        }
    }
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn resolve_optional(
    field: &str,
    input: Option<&DateInput>,
    tz: Tz,
) -> Result<Option<DateTime<Utc>>, TriggerError> {
    input.map(|i| resolve_date(field, i, tz)).transpose()
}

fn check_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), TriggerError> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(TriggerError::field(
            "end_date",
            "must not be earlier than start_date",
        )),
        _ => Ok(()),
    }
}

fn within_end(next: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match end {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

fn compile_cron(spec: &CronSpec, default_tz: Tz) -> Result<Recurrence, TriggerError> {
    match spec {
        CronSpec::Crontab(line) => {
            let expression = cron_fields::from_crontab(line)?;
            CronRule::new(expression, default_tz, None, None, None).map(Recurrence::Cron)
        }
        CronSpec::Fields(fields) => {
            let tz = effective_tz("cron.timezone", fields.timezone.as_deref(), default_tz)?;
            let expression = cron_fields::from_fields(
                fields.second.as_deref().unwrap_or("0"),
                fields.minute.as_deref().unwrap_or("0"),
                fields.hour.as_deref().unwrap_or("0"),
                fields.day.as_deref().unwrap_or("*"),
                fields.month.as_deref().unwrap_or("*"),
                fields.day_of_week.as_deref(),
            )
            .map_err(|e| TriggerError::field("cron.day_of_week", e.to_string()))?;
            let start = resolve_optional("cron.start_date", fields.start_date.as_ref(), tz)?;
            let end = resolve_optional("cron.end_date", fields.end_date.as_ref(), tz)?;
            CronRule::new(expression, tz, start, end, fields.jitter).map(Recurrence::Cron)
        }
    }
}

fn compile_interval(spec: &IntervalSpec, default_tz: Tz) -> Result<Recurrence, TriggerError> {
    let tz = effective_tz("interval.timezone", spec.timezone.as_deref(), default_tz)?;
    let secs = i64::try_from(spec.total_seconds())
        .ok()
        .filter(|s| *s > 0 && *s <= MAX_INTERVAL_SECONDS)
        .ok_or_else(|| TriggerError::field("interval", "period out of range"))?;
    let start = resolve_optional("interval.start_date", spec.start_date.as_ref(), tz)?;
    let end = resolve_optional("interval.end_date", spec.end_date.as_ref(), tz)?;
    check_window(start, end)?;
    Ok(Recurrence::Interval(IntervalRule {
        period: Duration::seconds(secs),
        tz,
        start,
        end,
        jitter: spec.jitter,
    }))
}

fn compile_date(spec: &DateSpec, default_tz: Tz) -> Result<Recurrence, TriggerError> {
    let tz = effective_tz("date.timezone", spec.timezone.as_deref(), default_tz)?;
    let run_at = resolve_date("date.run_at", &spec.run_at, tz)?;
    Ok(Recurrence::Date(DateRule { run_at, tz }))
}

/// Parse `HH:MM` or `HH:MM:SS` into an `(hour, minute, second)` triple.
pub fn parse_time_of_day(text: &str) -> Result<(u32, u32, u32), TriggerError> {
    let invalid = || {
        TriggerError::field(
            "daily_time.time",
            format!("must be 'HH:MM' or 'HH:MM:SS' (got '{text}')"),
        )
    };
    let parts: Vec<&str> = text.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(invalid());
    }
    let widths_ok = (1..=2).contains(&parts[0].len()) && parts[1..].iter().all(|p| p.len() == 2);
    if !widths_ok || !parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) {
        return Err(invalid());
    }
    let num = |p: &str| p.parse::<u32>().map_err(|_| invalid());
    let hour = num(parts[0])?;
    let minute = num(parts[1])?;
    let second = parts.get(2).map_or(Ok(0), |p| num(p))?;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(TriggerError::field(
            "daily_time.time",
            format!("'{text}' is out of range (hour 0-23, minute and second 0-59)"),
        ));
    }
    Ok((hour, minute, second))
}

/// One single-instant cron rule per distinct time of day. Building a single
/// rule with multi-valued fields would fire at every hour×minute pairing.
fn compile_daily_time(spec: &DailyTimeSpec, default_tz: Tz) -> Result<CompiledTrigger, TriggerError> {
    let tz = effective_tz("daily_time.timezone", spec.timezone.as_deref(), default_tz)?;
    let triples = spec
        .times
        .iter()
        .map(|t| parse_time_of_day(t))
        .collect::<Result<BTreeSet<_>, _>>()?;

    let mut rules = triples
        .into_iter()
        .map(|(h, m, s)| {
            let expression = cron_fields::from_fields(
                &s.to_string(),
                &m.to_string(),
                &h.to_string(),
                "*",
                "*",
                spec.day_of_week.as_deref(),
            )
            .map_err(|e| TriggerError::field("daily_time.day_of_week", e.to_string()))?;
            CronRule::new(expression, tz, None, None, None).map(Recurrence::Cron)
        })
        .collect::<Result<Vec<_>, _>>()?;

    match rules.len() {
        0 => Err(TriggerError::field("daily_time.time", "is required")),
        1 => Ok(CompiledTrigger::Single(rules.remove(0))),
        _ => Ok(CompiledTrigger::Any(rules)),
    }
}
