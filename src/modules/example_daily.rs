//! `example_daily`: a small greeting module for exercising the pipeline.

use async_trait::async_trait;
use cadence_watch::render::escape_html;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::{Module, ModuleContext};
use crate::error::{CadenceError, Result};

pub struct ExampleDaily;

#[async_trait]
impl Module for ExampleDaily {
    fn name(&self) -> &str {
        "example_daily"
    }

    async fn run(&self, _ctx: ModuleContext, kwargs: Map<String, Value>) -> Result<Value> {
        if kwargs.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(CadenceError::Runner(
                "example_daily: failure requested via kwargs.fail".into(),
            ));
        }

        let name = titleize(kwargs.get("name").and_then(Value::as_str).unwrap_or("World"));
        let items = items(kwargs.get("items"));
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let subject = format!("[example_daily] Hello, {name} — {ts}");

        let mut message = format!("Ran at {ts} with {} item(s).", items.len());
        if let Some(first) = items.first() {
            message.push_str(&format!(" First item: {first}"));
        }

        let kwargs_json = serde_json::to_string_pretty(&kwargs)?;
        let html = format!(
            "<!doctype html>\n<html>\n  <head><meta charset=\"utf-8\"><title>{title}</title></head>\n  \
             <body style=\"font-family: system-ui, sans-serif;\">\n    \
             <h1 style=\"margin:0 0 8px 0;\">Hello, {name_html}!</h1>\n    \
             <p><strong>Run time (UTC):</strong> {ts}</p>\n    \
             <p><strong>Items count:</strong> {count}</p>\n    \
             <pre style=\"background:#f7f7f7;padding:8px;\">kwargs =\n{kwargs_html}\n</pre>\n  \
             </body>\n</html>",
            title = escape_html(&subject),
            name_html = escape_html(&name),
            count = items.len(),
            kwargs_html = escape_html(&kwargs_json),
        );

        Ok(json!({
            "html": html,
            "meta": { "subject": subject, "message": message, "items": items.len() },
        }))
    }
}

/// Accepts a list, a JSON-encoded list, or a single scalar.
fn items(raw: Option<&Value>) -> Vec<Value> {
    match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(list)) => list.clone(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(list)) => list,
            Ok(other) => vec![other],
            Err(_) => vec![Value::String(s.clone())],
        },
        Some(other) => vec![other.clone()],
    }
}

/// Uppercase the first letter of each word, lowercase the rest.
fn titleize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
