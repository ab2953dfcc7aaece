// src/module/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ModuleConfig;
use crate::errors::{Result, SchedError};
use crate::module::{Module, builtin};

/// Builds a module from its `[[module]]` entry.
pub type ModuleFactory = Arc<dyn Fn(&ModuleConfig) -> Result<Module> + Send + Sync>;

/// Explicitly constructed map from module kind to factory.
///
/// There is no process-wide registry: the driver is handed one of these, and
/// tests build their own with extra kinds.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleConfig) -> Result<Module> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn make(&self, cfg: &ModuleConfig) -> Result<Module> {
        let factory = self
            .factories
            .get(&cfg.kind)
            .ok_or_else(|| SchedError::UnknownModuleKind {
                label: cfg.label.clone(),
                kind: cfg.kind.clone(),
            })?;
        factory(cfg)
    }
}
