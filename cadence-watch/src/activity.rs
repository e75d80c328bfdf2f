//! Structured activity records.
//!
//! Sinks are fire-and-forget: `record` never returns an error, and an
//! implementation that cannot persist a record must log and drop it.

use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// Destination for structured run records.
pub trait ActivitySink: Send + Sync {
    /// Record a normal activity event.
    fn record(&self, record: Value);

    /// Record a failure. Defaults to [`ActivitySink::record`].
    fn record_error(&self, record: Value) {
        self.record(record);
    }
}

/// Emits records as `tracing` events on the `activity` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, record: Value) {
        tracing::info!(target: "activity", record = %record, "activity");
    }

    fn record_error(&self, record: Value) {
        tracing::warn!(target: "activity", record = %record, "activity error");
    }
}

/// Keeps records in memory. Handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Value>>,
    errors: Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<Value> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records whose string `field` equals `value`.
    pub fn matching(&self, field: &str, value: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r.get(field).and_then(Value::as_str) == Some(value))
            .collect()
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, record: Value) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn record_error(&self, record: Value) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_separates_errors() {
        let sink = MemorySink::new();
        sink.record(json!({"event": "a"}));
        sink.record(json!({"event": "b"}));
        sink.record_error(json!({"where": "x"}));
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.matching("event", "b").len(), 1);
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn tracing_sink_never_panics() {
        TracingSink.record(json!({"event": "x"}));
        TracingSink.record_error(json!(null));
    }
}
