//! Keyword-argument normalization for module invocations.
//!
//! Config files and the CLI hand over kwargs as loosely typed JSON. Before a
//! module sees them, `*_env` keys are resolved against the environment and
//! string values are promoted to JSON structures, booleans or numbers.

use serde_json::{Map, Number, Value};

/// Normalize kwargs using the process environment.
pub fn normalize_kwargs(kwargs: &Map<String, Value>) -> Map<String, Value> {
    normalize_kwargs_with(kwargs, |name| std::env::var(name).ok())
}

/// Normalize kwargs with an injectable environment lookup.
///
/// - `<key>_env` with a string value: the value names an environment
///   variable; its contents (empty when unset) replace the value verbatim.
/// - strings shaped like `{...}` or `[...]` are parsed as JSON when valid.
/// - `true/t/yes/y/1` and `false/f/no/n/0` become booleans.
/// - integer and float strings become numbers.
pub fn normalize_kwargs_with(
    kwargs: &Map<String, Value>,
    env: impl Fn(&str) -> Option<String>,
) -> Map<String, Value> {
    kwargs
        .iter()
        .map(|(key, value)| {
            let normalized = match value {
                Value::String(name) if key.ends_with("_env") => {
                    Value::String(env(name.trim()).unwrap_or_default())
                }
                Value::String(s) => coerce_str(s),
                other => other.clone(),
            };
            (key.clone(), normalized)
        })
        .collect()
}

/// Promote a single string to the most specific JSON value it spells.
pub fn coerce_str(raw: &str) -> Value {
    let s = raw.trim();
    let looks_json = (s.starts_with('{') && s.ends_with('}')) || (s.starts_with('[') && s.ends_with(']'));
    if looks_json {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            return parsed;
        }
    }
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => return Value::Bool(true),
        "false" | "f" | "no" | "n" | "0" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_owned())
}
