// src/module/builtin.rs

//! Built-in module kinds.
//!
//! These stand in for real physics modules: they exercise products,
//! conditions, failures and the acquire step without doing any numerics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::concurrency::ConcurrencyKind;
use crate::config::ModuleConfig;
use crate::errors::Result;
use crate::failure::ModuleError;
use crate::module::{CallContext, Capabilities, Module, ModuleBuilder, ModuleRegistry};
use crate::principal::{ProductId, ScopeKind};
use crate::transition::Transition;
use crate::types::{LumiNumber, RunNumber};

/// Product every event carries: its event number, read lazily from the source.
pub const SOURCE_PRODUCT: &str = "source";

pub fn register_all(registry: &mut ModuleRegistry) {
    registry
        .register("counter", counter)
        .register("producer", producer)
        .register("analyzer", analyzer)
        .register("output", output)
        .register("failing", failing)
        .register("filter", filter)
        .register("acquirer", acquirer);
}

fn event_number(ctx: &CallContext<'_>) -> Option<u64> {
    ctx.principal().coordinates().event
}

/// Counts every transition it sees and logs the totals at end of job.
pub fn counter(cfg: &ModuleConfig) -> Result<Module> {
    let counts: Arc<Vec<AtomicU64>> =
        Arc::new(Transition::ALL.iter().map(|_| AtomicU64::new(0)).collect());

    let tally = Arc::clone(&counts);
    let report = Arc::clone(&counts);
    ModuleBuilder::from_config(cfg, Capabilities::all())
        .on_wanted(move |ctx| {
            tally[ctx.transition().index()].fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .on(Transition::EndJob, move |ctx| {
            report[Transition::EndJob.index()].fetch_add(1, Ordering::Relaxed);
            let events = report[Transition::Event.index()].load(Ordering::Relaxed);
            let lumis = report[Transition::GlobalBeginLumi.index()].load(Ordering::Relaxed);
            let runs = report[Transition::GlobalBeginRun.index()].load(Ordering::Relaxed);
            info!(module = ctx.module_label(), events, lumis, runs, "counter totals");
            Ok(())
        })
        .build()
}

/// Puts `value` (default 1) into every event.
pub fn producer(cfg: &ModuleConfig) -> Result<Module> {
    let value = cfg.value.unwrap_or(1);
    let builder = ModuleBuilder::from_config(cfg, Capabilities::events_only())
        .produces(ScopeKind::Event, cfg.label.as_str());
    if !builder.current_capabilities().events {
        return builder.build();
    }
    builder
        .on(Transition::Event, move |ctx| ctx.put_default(value))
        .build()
}

/// Reads the source product and every consumed producer's value.
pub fn analyzer(cfg: &ModuleConfig) -> Result<Module> {
    let inputs: Vec<ProductId> = cfg.consumes.iter().map(|l| ProductId::new(l.as_str())).collect();
    let builder = ModuleBuilder::from_config(cfg, Capabilities::events_only());
    if !builder.current_capabilities().events {
        return builder.build();
    }
    builder
        .on(Transition::Event, move |ctx| {
            let event = ctx.get::<u64>(SOURCE_PRODUCT)?;
            let mut sum = 0_i64;
            for id in &inputs {
                sum += *ctx.get::<i64>(id.clone())?;
            }
            trace!(module = ctx.module_label(), event = *event, sum, "analyzed");
            Ok(())
        })
        .build()
}

/// Writes lumis and runs after their global end. Serialized by default.
pub fn output(cfg: &ModuleConfig) -> Result<Module> {
    let defaults = Capabilities {
        global_runs: true,
        global_lumis: true,
        output: true,
        ..Capabilities::events_only()
    };
    let concurrency = match cfg.concurrency {
        ConcurrencyKind::Global => ConcurrencyKind::One,
        other => other,
    };
    let tally = Arc::new(OutputTally::default());

    let on_event = Arc::clone(&tally);
    let on_lumi = Arc::clone(&tally);
    ModuleBuilder::from_config(cfg, defaults)
        .concurrency(concurrency)
        .on_wanted(|_| Ok(()))
        .on(Transition::Event, move |ctx| {
            let coords = ctx.principal().coordinates();
            on_event.event(coords.run.unwrap_or_default(), coords.lumi.unwrap_or_default());
            Ok(())
        })
        .on(Transition::WriteLumi, move |ctx| {
            let coords = ctx.principal().coordinates();
            let events = on_lumi.write_lumi(coords.run.unwrap_or_default(), coords.lumi.unwrap_or_default());
            info!(module = ctx.module_label(), run = ?coords.run, lumi = ?coords.lumi, events, "lumi written");
            Ok(())
        })
        .on(Transition::WriteRun, move |ctx| {
            let coords = ctx.principal().coordinates();
            let events = tally.write_run(coords.run.unwrap_or_default());
            info!(module = ctx.module_label(), run = ?coords.run, events, "run written");
            Ok(())
        })
        .build()
}

/// Event counts of the lumis and runs an output module has not written yet.
#[derive(Debug, Default)]
struct OutputTally {
    lumis: Mutex<HashMap<(RunNumber, LumiNumber), u64>>,
    runs: Mutex<HashMap<RunNumber, u64>>,
}

impl OutputTally {
    fn event(&self, run: RunNumber, lumi: LumiNumber) {
        *self.lumis.lock().entry((run, lumi)).or_default() += 1;
    }

    /// Events of the lumi, carried over into its run.
    fn write_lumi(&self, run: RunNumber, lumi: LumiNumber) -> u64 {
        let events = self.lumis.lock().remove(&(run, lumi)).unwrap_or(0);
        *self.runs.lock().entry(run).or_default() += events;
        events
    }

    fn write_run(&self, run: RunNumber) -> u64 {
        self.runs.lock().remove(&run).unwrap_or(0)
    }
}

/// Fails on a chosen event (optionally only on one stream), or on every call
/// of a chosen transition.
pub fn failing(cfg: &ModuleConfig) -> Result<Module> {
    let mut defaults = Capabilities::events_only();
    if let Some(t) = cfg.fail_on_transition {
        defaults = defaults.enable(t);
    }
    let on_event = cfg.fail_on_event;
    let on_stream = cfg.fail_on_stream;
    let on_transition = cfg.fail_on_transition;

    ModuleBuilder::from_config(cfg, defaults)
        .on_wanted(move |ctx| {
            if on_transition == Some(ctx.transition()) {
                return Err(ModuleError::failed(format!(
                    "configured to fail on {}",
                    ctx.transition()
                )));
            }
            if ctx.transition() != Transition::Event {
                return Ok(());
            }
            let stream_matches = match (on_stream, ctx.stream()) {
                (None, _) => true,
                (Some(want), Some(got)) => want == got.0,
                (Some(_), None) => false,
            };
            if stream_matches && on_event.is_some() && on_event == event_number(ctx) {
                return Err(ModuleError::failed(format!(
                    "configured to fail on event {}",
                    on_event.unwrap_or_default()
                )));
            }
            Ok(())
        })
        .build()
}

/// Accepts every `prescale`-th event by number. Paths stop at the rejected ones.
pub fn filter(cfg: &ModuleConfig) -> Result<Module> {
    let prescale = cfg.prescale.unwrap_or(1).max(1);
    ModuleBuilder::from_config(cfg, Capabilities::events_only())
        .on_wanted(|_| Ok(()))
        .filter(move |ctx| {
            let event = event_number(ctx)
                .ok_or_else(|| ModuleError::failed("filter called without an event number"))?;
            Ok(event % prescale == 0)
        })
        .build()
}

/// Simulates an asynchronous fetch before every event.
pub fn acquirer(cfg: &ModuleConfig) -> Result<Module> {
    let delay = Duration::from_millis(cfg.acquire_delay_ms.unwrap_or(1));
    let defaults = Capabilities {
        acquire: true,
        ..Capabilities::events_only()
    };
    let builder = ModuleBuilder::from_config(cfg, defaults);
    let builder = if builder.current_capabilities().acquire {
        builder.acquire(move |ctx, holder| {
            let pool = ctx.pool().clone();
            pool.spawn(async move {
                tokio::time::sleep(delay).await;
                debug!(module = ctx.module_label(), "acquire finished");
                holder.done_waiting(Ok(()));
            });
        })
    } else {
        builder
    };
    if !builder.current_capabilities().events {
        return builder.build();
    }
    builder
        .on(Transition::Event, |ctx| {
            trace!(module = ctx.module_label(), event = ?event_number(ctx), "event after acquire");
            Ok(())
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(label: &str, kind: &str) -> ModuleConfig {
        ModuleConfig {
            label: label.into(),
            kind: kind.into(),
            ..ModuleConfig::default()
        }
    }

    #[test]
    fn every_builtin_builds_with_defaults() {
        let registry = ModuleRegistry::with_builtins();
        for kind in ["counter", "producer", "analyzer", "output", "failing", "filter", "acquirer"] {
            let module = registry.make(&cfg(kind, kind)).unwrap();
            assert_eq!(module.kind(), kind);
        }
    }

    #[test]
    fn output_is_serialized_unless_limited() {
        let module = output(&cfg("out", "output")).unwrap();
        assert_eq!(module.concurrency(), ConcurrencyKind::One);
        assert!(module.wants(Transition::WriteLumi));
    }

    #[test]
    fn output_tally_keeps_concurrent_lumis_apart() {
        let tally = OutputTally::default();
        for _ in 0..3 {
            tally.event(1, 1);
        }
        tally.event(1, 2);
        tally.event(2, 1);
        assert_eq!(tally.write_lumi(1, 2), 1);
        assert_eq!(tally.write_lumi(1, 1), 3);
        assert_eq!(tally.write_run(1), 4);
        assert_eq!(tally.write_lumi(2, 1), 1);
        assert_eq!(tally.write_run(2), 1);
        // A later run with the same number starts from zero.
        assert_eq!(tally.write_run(1), 0);
    }

    #[test]
    fn failing_enables_the_transition_it_fails_on() {
        let mut c = cfg("bad", "failing");
        c.fail_on_transition = Some(Transition::GlobalBeginLumi);
        let module = failing(&c).unwrap();
        assert!(module.wants(Transition::GlobalBeginLumi));
        assert!(!module.wants(Transition::GlobalBeginRun));
    }

    #[test]
    fn filter_is_a_filter_only_for_events() {
        let mut c = cfg("sel", "filter");
        c.prescale = Some(3);
        let module = filter(&c).unwrap();
        assert!(module.is_filter());
        assert!(module.handler(Transition::Event).is_none());
        assert!(!module.wants(Transition::GlobalBeginRun));
    }

    #[test]
    fn producer_declares_its_product() {
        let module = producer(&cfg("tracks", "producer")).unwrap();
        assert_eq!(module.produces(), &[(ScopeKind::Event, ProductId::new("tracks"))]);
    }
}
