//! Runnable modules.
//!
//! A module is a named unit of work that takes normalized kwargs and returns
//! a JSON value the runner turns into an optional HTML email. Modules are
//! registered explicitly; [`default_modules`] holds the built-in set.

pub mod career_watch;
pub mod example_daily;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_watch::activity::ActivitySink;
use serde_json::{Map, Value};

use crate::error::{CadenceError, Result};
use crate::runner::TriggerType;

/// Per-invocation context handed to a module.
#[derive(Clone)]
pub struct ModuleContext {
    pub run_id: String,
    pub trigger_type: TriggerType,
    pub activity: Arc<dyn ActivitySink>,
}

/// A unit of work the runner can invoke.
///
/// The returned value may be:
/// - a string (HTML fragment)
/// - `null` (nothing to send)
/// - `{"html": ..., "meta": {...}}`
/// - `[html, {meta}]`
/// - any other object, treated as metadata only
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: ModuleContext, kwargs: Map<String, Value>) -> Result<Value>;
}

/// Name → module mapping.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`CadenceError::Runner`] for a blank name or one that is
    /// already taken.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<()> {
        let name = module.name().trim().to_owned();
        if name.is_empty() {
            return Err(CadenceError::Runner("module name must not be empty".into()));
        }
        if self.modules.contains_key(&name) {
            return Err(CadenceError::Runner(format!("module '{name}' already registered")));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name.trim()).cloned()
    }

    /// Look up `name`, failing with a runner error when it is unknown.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Module>> {
        self.get(name).ok_or_else(|| {
            CadenceError::Runner(format!(
                "unknown module '{name}' (known: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name.trim())
    }
}

/// Registry with the built-in modules.
pub fn default_modules() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    let builtins: [Arc<dyn Module>; 2] = [
        Arc::new(career_watch::CareerWatch),
        Arc::new(example_daily::ExampleDaily),
    ];
    for module in builtins {
        if let Err(e) = registry.register(module) {
            tracing::warn!(error = %e, "built-in module not registered");
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_modules_are_registered() {
        let registry = default_modules();
        assert_eq!(registry.names(), vec!["career_watch", "example_daily"]);
        assert!(registry.get(" example_daily ").is_some());
    }

    #[test]
    fn duplicate_and_unknown_names() {
        let mut registry = default_modules();
        let err = registry.register(Arc::new(example_daily::ExampleDaily)).unwrap_err();
        assert!(err.to_string().contains("already registered"));

        let err = registry.resolve("nope").err().unwrap();
        assert!(err.to_string().contains("unknown module 'nope'"));
        assert!(err.to_string().contains("career_watch"));
    }
}
