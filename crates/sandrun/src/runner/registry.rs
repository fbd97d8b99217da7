//! Language registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::runner::{PipelineRunner, PipelineSettings, Runner};
use crate::sandbox::Sandbox;

/// Mapping from language identifier to [`Runner`]
///
/// Built once at startup and read-only afterwards; share it behind an `Arc`.
#[derive(Clone, Default)]
pub struct Registry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`PipelineRunner`] for every configured language
    pub fn from_config(config: &Config, sandbox: Arc<dyn Sandbox>) -> Self {
        let settings = PipelineSettings::from_config(config);
        let mut registry = Self::new();
        for (id, language) in &config.languages {
            debug!(language = %id, "registering runner");
            let runner = PipelineRunner::new(
                id.clone(),
                language.clone(),
                Arc::clone(&sandbox),
                settings.clone(),
            );
            registry.register(id.clone(), Arc::new(runner));
        }
        registry
    }

    /// Register `runner` under `id`, returning the runner it replaces
    pub fn register(
        &mut self,
        id: impl Into<String>,
        runner: Arc<dyn Runner>,
    ) -> Option<Arc<dyn Runner>> {
        self.runners.insert(id.into(), runner)
    }

    /// Builder-style [`Registry::register`]
    pub fn with_runner(mut self, id: impl Into<String>, runner: Arc<dyn Runner>) -> Self {
        self.register(id, runner);
        self
    }

    /// Look up the runner for a language
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.runners.contains_key(id)
    }

    /// Registered language identifiers, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("languages", &self.languages())
            .finish()
    }
}
