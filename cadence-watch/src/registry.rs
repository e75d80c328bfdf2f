//! Kind → scraper mapping.
//!
//! Registration is explicit: [`default_registry`] registers the built-in
//! scrapers, and callers add their own with [`ScraperRegistry::register`].
//! The process-wide instance is installed once at startup with
//! [`install_global`] and only read afterwards.

use crate::config::normalize_kind;
use crate::error::{Result, WatchError};
use crate::scraper::{Scraper, ScraperLookup};
use crate::scrapers::{AvatureScraper, IcimsScraper, LeverScraper, StubScraper, WorkdayCxsScraper};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Mapping from normalized kind to scraper implementation.
#[derive(Default, Clone)]
pub struct ScraperRegistry {
    scrapers: HashMap<String, Arc<dyn Scraper>>,
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `scraper` under its own [`Scraper::kind`].
    pub fn register(&mut self, scraper: Arc<dyn Scraper>) -> Result<()> {
        let kind = scraper.kind();
        self.register_as(kind, scraper)
    }

    /// Register `scraper` under an explicit kind.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Registry`] for a blank kind, or when the kind is
    /// already taken by a different implementation. Registering the same
    /// implementation twice is a no-op.
    pub fn register_as(&mut self, kind: &str, scraper: Arc<dyn Scraper>) -> Result<()> {
        let key = normalize_kind(kind);
        if key.is_empty() {
            return Err(WatchError::Registry("scraper kind must not be empty".into()));
        }
        if let Some(existing) = self.scrapers.get(&key) {
            if existing.implementation() == scraper.implementation() {
                return Ok(());
            }
            return Err(WatchError::Registry(format!(
                "kind '{key}' already registered to {}",
                existing.implementation()
            )));
        }
        tracing::debug!(kind = %key, implementation = scraper.implementation(), "scraper registered");
        self.scrapers.insert(key, scraper);
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Scraper>> {
        self.scrapers.get(&normalize_kind(kind)).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.scrapers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.scrapers.is_empty()
    }
}

impl ScraperLookup for ScraperRegistry {
    fn lookup(&self, kind: &str) -> Option<Arc<dyn Scraper>> {
        self.get(kind)
    }
}

/// Registry with every built-in scraper.
pub fn default_registry() -> Result<ScraperRegistry> {
    let mut registry = ScraperRegistry::new();
    registry.register(Arc::new(StubScraper))?;
    registry.register(Arc::new(LeverScraper::new()))?;
    registry.register(Arc::new(WorkdayCxsScraper::new()))?;
    registry.register(Arc::new(IcimsScraper::new()))?;
    registry.register(Arc::new(AvatureScraper::new()))?;
    Ok(registry)
}

static GLOBAL: RwLock<Option<Arc<ScraperRegistry>>> = RwLock::new(None);

/// Install the process-wide registry, replacing any previous one.
pub fn install_global(registry: ScraperRegistry) -> Arc<ScraperRegistry> {
    let registry = Arc::new(registry);
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::clone(&registry));
    registry
}

/// The installed process-wide registry, if any.
pub fn global() -> Option<Arc<ScraperRegistry>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove the process-wide registry.
pub fn uninstall_global() {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    *slot = None;
}
