//! Translation of crontab lines and per-field expressions into the
//! seconds-first expression format understood by the `cron` crate.
//!
//! Day-of-week numbering differs between the two input forms: crontab lines
//! use POSIX numbering (0 or 7 = Sunday), object-form fields number from
//! Monday (0 = Monday, 6 = Sunday). Both are expanded to an explicit list of
//! day names so the `cron` crate's own numbering never applies.

use super::trigger::TriggerError;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// How numeric day-of-week values are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowNumbering {
    /// 0 or 7 = Sunday, 1 = Monday.
    Posix,
    /// 0 = Monday … 6 = Sunday.
    MondayZero,
}

impl DowNumbering {
    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Posix => (0, 7),
            Self::MondayZero => (0, 6),
        }
    }

    /// Monday-based index (0..7) of a native value.
    fn day_index(self, value: u32) -> usize {
        match self {
            Self::Posix => ((value + 6) % 7) as usize,
            Self::MondayZero => value as usize,
        }
    }

    fn from_name(self, name: &str) -> Option<u32> {
        let lower = name.to_ascii_lowercase();
        let idx = DAY_NAMES
            .iter()
            .position(|d| lower == d.to_ascii_lowercase() || full_day_name(d) == lower)?
            as u32;
        Some(match self {
            Self::Posix => (idx + 1) % 7,
            Self::MondayZero => idx,
        })
    }
}

fn full_day_name(short: &str) -> &'static str {
    match short {
        "Mon" => "monday",
        "Tue" => "tuesday",
        "Wed" => "wednesday",
        "Thu" => "thursday",
        "Fri" => "friday",
        "Sat" => "saturday",
        _ => "sunday",
    }
}

/// Expand a day-of-week expression into `Mon,Wed,...` (or `*` for every day).
pub fn expand_day_of_week(expr: &str, numbering: DowNumbering) -> Result<String, TriggerError> {
    let invalid = |reason: String| TriggerError::field("day_of_week", reason);
    let (min, max) = numbering.bounds();
    let value = |token: &str| -> Result<u32, TriggerError> {
        let token = token.trim();
        let parsed = token
            .parse::<u32>()
            .ok()
            .or_else(|| numbering.from_name(token))
            .ok_or_else(|| invalid(format!("unrecognised day '{token}'")))?;
        if parsed < min || parsed > max {
            return Err(invalid(format!("day {parsed} out of range {min}-{max}")));
        }
        Ok(parsed)
    };

    let mut days = [false; 7];
    for item in expr.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(invalid(format!("empty entry in '{expr}'")));
        }
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step = step
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(format!("invalid step in '{item}'")))?;
                (base.trim(), step)
            }
            None => (item, 1),
        };
        let (lo, hi) = if base == "*" || base == "?" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            (value(a)?, value(b)?)
        } else if step > 1 {
            // `3/2` means "from 3, every 2"
            (value(base)?, max)
        } else {
            let v = value(base)?;
            (v, v)
        };

        let span: Vec<u32> = if lo <= hi {
            (lo..=hi).collect()
        } else {
            (lo..=max).chain(min..=hi).collect()
        };
        for v in span.into_iter().step_by(step as usize) {
            days[numbering.day_index(v)] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Ok("*".to_owned());
    }
    Ok(DAY_NAMES
        .iter()
        .zip(days)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect::<Vec<_>>()
        .join(","))
}

/// Crontab line (5 or 6 fields) to a `cron` crate expression.
///
/// Five fields are `minute hour day month day_of_week` with an implied
/// second of 0; six fields put `second` first.
pub fn from_crontab(line: &str) -> Result<String, TriggerError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (second, rest) = match fields.len() {
        5 => ("0", &fields[..]),
        6 => (fields[0], &fields[1..]),
        n => {
            return Err(TriggerError::field(
                "cron",
                format!("cron string must have 5 or 6 fields (got {n})"),
            ));
        }
    };
    let dow = expand_day_of_week(rest[4], DowNumbering::Posix)
        .map_err(|e| TriggerError::field("cron", e.to_string()))?;
    Ok(format!(
        "{second} {} {} {} {} {dow}",
        rest[0], rest[1], rest[2], rest[3]
    ))
}

/// Object-form fields to a `cron` crate expression.
pub fn from_fields(
    second: &str,
    minute: &str,
    hour: &str,
    day: &str,
    month: &str,
    day_of_week: Option<&str>,
) -> Result<String, TriggerError> {
    let dow = match day_of_week {
        Some(expr) => expand_day_of_week(expr, DowNumbering::MondayZero)?,
        None => "*".to_owned(),
    };
    Ok(format!("{second} {minute} {hour} {day} {month} {dow}"))
}
