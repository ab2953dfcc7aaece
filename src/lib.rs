// src/lib.rs

pub mod cli;
pub mod concurrency;
pub mod conditions;
pub mod config;
pub mod driver;
pub mod errors;
pub mod failure;
pub mod logging;
pub mod module;
pub mod principal;
pub mod report;
pub mod schedule;
pub mod transition;
pub mod types;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::concurrency::TaskPool;
use crate::config::{JobConfig, RawJobConfig, load_from_path, module_order};
use crate::driver::EventProcessor;
use crate::errors::Result;
use crate::module::ModuleRegistry;
use crate::report::{JobReport, TracingReporter};
use crate::schedule::ShutdownReason;

/// Load the job file named on the command line, apply the CLI overrides
/// and validate the result.
pub fn load_job(args: &CliArgs) -> Result<JobConfig> {
    let path = PathBuf::from(&args.config);
    let raw = load_from_path(&path)?;
    let cfg = JobConfig::try_from(apply_overrides(raw, args))?;
    debug!(config = %path.display(), modules = cfg.modules.len(), "job loaded");
    Ok(cfg)
}

fn apply_overrides(mut raw: RawJobConfig, args: &CliArgs) -> RawJobConfig {
    if let Some(streams) = args.streams {
        raw.process.streams = streams;
    }
    if let Some(threads) = args.threads {
        raw.process.threads = Some(threads);
    }
    raw
}

/// High-level entry point used by `main.rs`.
///
/// Builds the processor on the current Tokio runtime and runs the job.
/// Ctrl-C requests a graceful shutdown: units already begun are ended and
/// `endJob` still runs.
pub async fn run(cfg: &JobConfig, registry: &ModuleRegistry) -> Result<JobReport> {
    let pool = TaskPool::current()?;
    let processor = EventProcessor::from_config(cfg, registry, Arc::new(TracingReporter), pool)?;

    let scheduler = Arc::clone(processor.scheduler());
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                if scheduler.shutdown().request(ShutdownReason::Signal) {
                    warn!("interrupt received, finishing open runs and lumis");
                }
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
        }
    });

    info!(
        events = cfg.total_events(),
        threads = cfg.threads(),
        "processing"
    );
    let report = processor.run().await;
    signal.abort();
    Ok(report)
}

/// Dry-run output: module order, capabilities and the job layout.
pub fn print_dry_run(cfg: &JobConfig) -> Result<()> {
    let registry = ModuleRegistry::with_builtins();
    let order = module_order(&cfg.modules)?;

    println!("evsched dry-run");
    println!("  process.name = {}", cfg.process.name);
    println!("  process.streams = {}", cfg.process.streams);
    println!("  process.threads = {}", cfg.threads());
    println!("  process.concurrent_runs = {}", cfg.process.concurrent_runs);
    println!("  process.concurrent_lumis = {}", cfg.process.concurrent_lumis);
    println!("  process.on_event_failure = {:?}", cfg.process.on_event_failure);
    println!("  source.event_assignment = {:?}", cfg.source.event_assignment);
    println!("  source.files = {}", cfg.source.files.len());
    println!("  source.events = {}", cfg.total_events());
    println!();

    println!("modules ({}):", order.len());
    for label in &order {
        let Some(module_cfg) = cfg.module(label) else {
            continue;
        };
        let module = registry.make(module_cfg)?;
        println!("  - {label} ({})", module.kind());
        println!("      capabilities: {}", module.capabilities());
        println!("      concurrency: {:?}", module.concurrency());
        if !module.consumes().is_empty() {
            println!("      consumes: {:?}", module.consumes());
        }
        if module.is_filter() {
            println!("      filter: yes");
        }
    }

    if !cfg.paths.is_empty() {
        println!();
        println!("paths ({}):", cfg.paths.len());
        for path in &cfg.paths {
            println!("  - {}: {}", path.name, path.modules.join(" -> "));
        }
    }

    if !cfg.conditions.records.is_empty() {
        println!();
        println!("conditions ({:?}):", cfg.conditions.policy);
        for (name, record) in &cfg.conditions.records {
            println!(
                "  - {name}: {:?}, {} iovs",
                record.time_type,
                record.iovs.len()
            );
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
