// src/module/mod.rs

//! Processing modules as the scheduler sees them.
//!
//! A module is a label, a [`Capabilities`] set and a map from transition to
//! handler closure. Whether a module takes part in a transition is decided by
//! its flags alone; there is no per-capability trait hierarchy.

pub mod builtin;
pub mod capabilities;
pub mod context;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use capabilities::Capabilities;
pub use context::{AcquireContext, CallContext};
pub use registry::{ModuleFactory, ModuleRegistry};

use crate::concurrency::{ConcurrencyKind, WaitingTaskHolder};
use crate::config::ModuleConfig;
use crate::errors::{Result, SchedError};
use crate::failure::ModuleError;
use crate::principal::{ProductId, ScopeKind};
use crate::transition::Transition;

/// Synchronous callback for one transition.
pub type Handler = Arc<dyn Fn(&CallContext<'_>) -> std::result::Result<(), ModuleError> + Send + Sync>;

/// Event callback of a filter module: `Ok(false)` rejects the event, so the
/// entries after this module on a path do not run for it.
pub type FilterHandler =
    Arc<dyn Fn(&CallContext<'_>) -> std::result::Result<bool, ModuleError> + Send + Sync>;

/// Asynchronous pre-fetch step run before the event callback. It must
/// eventually signal the holder, from any thread.
pub type AcquireHandler = Arc<dyn Fn(AcquireContext, WaitingTaskHolder) + Send + Sync>;

/// A configured module instance.
pub struct Module {
    label: String,
    kind: String,
    capabilities: Capabilities,
    concurrency: ConcurrencyKind,
    consumes: Vec<String>,
    produces: Vec<(ScopeKind, ProductId)>,
    handlers: HashMap<Transition, Handler>,
    filter: Option<FilterHandler>,
    acquire: Option<AcquireHandler>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handled: Vec<_> = self.handlers.keys().copied().collect();
        handled.sort();
        f.debug_struct("Module")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .field("concurrency", &self.concurrency)
            .field("consumes", &self.consumes)
            .field("handled", &handled)
            .field("filter", &self.filter.is_some())
            .field("acquire", &self.acquire.is_some())
            .finish()
    }
}

impl Module {
    pub fn builder(label: impl Into<String>, kind: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(label, kind)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn concurrency(&self) -> ConcurrencyKind {
        self.concurrency
    }

    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }

    pub fn produces(&self) -> &[(ScopeKind, ProductId)] {
        &self.produces
    }

    pub fn wants(&self, t: Transition) -> bool {
        self.capabilities.wants(t)
    }

    pub fn handler(&self, t: Transition) -> Option<&Handler> {
        self.handlers.get(&t)
    }

    /// Event decision of a filter module. Filters have no plain event handler.
    pub fn filter_handler(&self) -> Option<&FilterHandler> {
        self.filter.as_ref()
    }

    pub fn is_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn acquire_handler(&self) -> Option<&AcquireHandler> {
        self.acquire.as_ref()
    }
}

/// Builder that checks handlers against declared capabilities.
pub struct ModuleBuilder {
    label: String,
    kind: String,
    capabilities: Capabilities,
    concurrency: ConcurrencyKind,
    consumes: Vec<String>,
    produces: Vec<(ScopeKind, ProductId)>,
    handlers: HashMap<Transition, Handler>,
    filter: Option<FilterHandler>,
    acquire: Option<AcquireHandler>,
}

impl ModuleBuilder {
    pub fn new(label: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: kind.into(),
            capabilities: Capabilities::default(),
            concurrency: ConcurrencyKind::Global,
            consumes: Vec::new(),
            produces: Vec::new(),
            handlers: HashMap::new(),
            filter: None,
            acquire: None,
        }
    }

    /// Start from a `[[module]]` entry: label, consumes, concurrency, and the
    /// kind's default flags with the entry's overrides applied.
    pub fn from_config(cfg: &ModuleConfig, defaults: Capabilities) -> Self {
        Self::new(&cfg.label, &cfg.kind)
            .capabilities(defaults.with_overrides(cfg))
            .concurrency(cfg.concurrency)
            .consumes(cfg.consumes.iter().cloned())
    }

    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn current_capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn concurrency(mut self, kind: ConcurrencyKind) -> Self {
        self.concurrency = kind;
        self
    }

    pub fn consumes(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.consumes.extend(labels);
        self
    }

    pub fn produces(mut self, scope: ScopeKind, id: impl Into<ProductId>) -> Self {
        self.produces.push((scope, id.into()));
        self
    }

    pub fn on<F>(mut self, t: Transition, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> std::result::Result<(), ModuleError> + Send + Sync + 'static,
    {
        self.handlers.insert(t, Arc::new(handler));
        self
    }

    /// Install one handler for every transition the capabilities want.
    pub fn on_wanted<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> std::result::Result<(), ModuleError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        for t in self.capabilities.wanted() {
            self.handlers.insert(t, Arc::clone(&handler));
        }
        self
    }

    /// Make this a filter: `decide` replaces the event handler.
    pub fn filter<F>(mut self, decide: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> std::result::Result<bool, ModuleError> + Send + Sync + 'static,
    {
        self.handlers.remove(&Transition::Event);
        self.filter = Some(Arc::new(decide));
        self
    }

    pub fn acquire<F>(mut self, step: F) -> Self
    where
        F: Fn(AcquireContext, WaitingTaskHolder) + Send + Sync + 'static,
    {
        self.acquire = Some(Arc::new(step));
        self
    }

    pub fn build(self) -> Result<Module> {
        let mut uncovered: Vec<_> = self
            .handlers
            .keys()
            .copied()
            .filter(|t| !self.capabilities.wants(*t))
            .collect();
        uncovered.sort();
        if let Some(t) = uncovered.first() {
            return Err(SchedError::ConfigError(format!(
                "module '{}' handles {t} but its capabilities do not include it",
                self.label
            )));
        }
        match (self.capabilities.acquire, self.acquire.is_some()) {
            (true, false) => {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' declares an acquire step but provides none",
                    self.label
                )));
            }
            (false, true) => {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' provides an acquire step but does not declare `acquire`",
                    self.label
                )));
            }
            _ => {}
        }
        if self.filter.is_some() {
            if !self.capabilities.events {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' is a filter but does not process events",
                    self.label
                )));
            }
            if self.handlers.contains_key(&Transition::Event) {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' has both a filter and an event handler",
                    self.label
                )));
            }
        }
        if self.capabilities.acquire && !self.capabilities.events {
            return Err(SchedError::ConfigError(format!(
                "module '{}' has an acquire step but does not process events",
                self.label
            )));
        }
        Ok(Module {
            label: self.label,
            kind: self.kind,
            capabilities: self.capabilities,
            concurrency: self.concurrency,
            consumes: self.consumes,
            produces: self.produces,
            handlers: self.handlers,
            filter: self.filter,
            acquire: self.acquire,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_outside_capabilities_is_rejected() {
        let err = Module::builder("m", "test")
            .capabilities(Capabilities::events_only())
            .on(Transition::GlobalBeginRun, |_| Ok(()))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("globalBeginRun"));
    }

    #[test]
    fn acquire_flag_and_step_must_agree() {
        let caps = Capabilities {
            acquire: true,
            ..Capabilities::events_only()
        };
        let err = Module::builder("m", "test").capabilities(caps).build().unwrap_err();
        assert!(err.is_configuration());

        let module = Module::builder("m", "test")
            .capabilities(caps)
            .acquire(|_, holder| holder.done_waiting(Ok(())))
            .build()
            .unwrap();
        assert!(module.acquire_handler().is_some());
    }

    #[test]
    fn on_wanted_covers_exactly_the_wanted_transitions() {
        let module = Module::builder("m", "test")
            .capabilities(Capabilities::events_only())
            .on_wanted(|_| Ok(()))
            .build()
            .unwrap();
        assert!(module.handler(Transition::Event).is_some());
        assert!(module.handler(Transition::BeginJob).is_some());
        assert!(module.handler(Transition::GlobalBeginLumi).is_none());
    }

    #[test]
    fn filter_replaces_the_event_handler_and_needs_events() {
        let module = Module::builder("sel", "test")
            .capabilities(Capabilities::events_only())
            .on_wanted(|_| Ok(()))
            .filter(|_| Ok(true))
            .build()
            .unwrap();
        assert!(module.is_filter());
        assert!(module.handler(Transition::Event).is_none());
        assert!(module.handler(Transition::BeginJob).is_some());

        let err = Module::builder("sel", "test")
            .capabilities(Capabilities::events_only())
            .filter(|_| Ok(true))
            .on(Transition::Event, |_| Ok(()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("both a filter"));

        let no_events = Capabilities {
            events: false,
            global_runs: true,
            ..Capabilities::events_only()
        };
        let err = Module::builder("sel", "test")
            .capabilities(no_events)
            .filter(|_| Ok(true))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
