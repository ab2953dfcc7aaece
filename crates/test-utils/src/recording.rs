//! A module kind that records every call it receives.

use std::sync::Arc;

use parking_lot::Mutex;

use evsched::config::ModuleConfig;
use evsched::errors::Result;
use evsched::failure::ModuleError;
use evsched::module::{Capabilities, Module, ModuleBuilder, ModuleRegistry};
use evsched::principal::Coordinates;
use evsched::transition::Transition;
use evsched::types::StreamId;

/// One recorded callback.
#[derive(Debug, Clone)]
pub struct Call {
    pub module: String,
    pub transition: Transition,
    pub stream: Option<StreamId>,
    pub coordinates: Coordinates,
}

/// Shared timeline of every `recording` module's calls, in the order they
/// started.
///
/// `recording` modules want every transition unless their config switches
/// flags off. They honour `fail_on_event`, `fail_on_stream` and
/// `fail_on_transition` like the built-in `failing` kind.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builtins plus the `recording` kind bound to this recorder.
    pub fn registry(&self) -> ModuleRegistry {
        let mut registry = ModuleRegistry::with_builtins();
        self.register(&mut registry);
        registry
    }

    pub fn register(&self, registry: &mut ModuleRegistry) {
        let recorder = self.clone();
        registry.register("recording", move |cfg| recorder.module(cfg));
    }

    fn module(&self, cfg: &ModuleConfig) -> Result<Module> {
        let calls = Arc::clone(&self.calls);
        let fail_event = cfg.fail_on_event;
        let fail_stream = cfg.fail_on_stream;
        let fail_transition = cfg.fail_on_transition;
        let label = cfg.label.clone();

        let mut builder = ModuleBuilder::from_config(cfg, Capabilities::all()).on_wanted(move |ctx| {
            let coordinates = *ctx.principal().coordinates();
            calls.lock().push(Call {
                module: label.clone(),
                transition: ctx.transition(),
                stream: ctx.stream(),
                coordinates,
            });
            let stream_matches = fail_stream.is_none_or(|s| ctx.stream() == Some(StreamId(s)));
            let event_matches = ctx.transition() == Transition::Event
                && fail_event.is_some_and(|e| coordinates.event == Some(e));
            if stream_matches && (event_matches || fail_transition == Some(ctx.transition())) {
                return Err(ModuleError::failed(format!(
                    "recording module '{label}' told to fail"
                )));
            }
            Ok(())
        });
        if builder.current_capabilities().acquire {
            builder = builder.acquire(|_, holder| drop(holder));
        }
        builder.build()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, module: &str, t: Transition) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.module == module && c.transition == t)
            .count()
    }

    pub fn count_on(&self, module: &str, t: Transition, stream: StreamId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.module == module && c.transition == t && c.stream == Some(stream))
            .count()
    }

    /// Event numbers `module` saw on `stream`.
    pub fn events_on(&self, module: &str, stream: StreamId) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.module == module && c.transition == Transition::Event && c.stream == Some(stream))
            .filter_map(|c| c.coordinates.event)
            .collect()
    }

    /// Positions in the timeline of `module`'s calls for `t`.
    pub fn positions(&self, module: &str, t: Transition) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.module == module && c.transition == t)
            .map(|(i, _)| i)
            .collect()
    }

    /// Timeline restricted to one module, as transition names.
    pub fn names(&self, module: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.module == module)
            .map(|c| c.transition.name())
            .collect()
    }
}
