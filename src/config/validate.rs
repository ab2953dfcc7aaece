// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::concurrency::ConcurrencyKind;
use crate::config::model::{JobConfig, ModuleConfig, RawJobConfig};
use crate::errors::{Result, SchedError};

impl TryFrom<RawJobConfig> for JobConfig {
    type Error = SchedError;

    fn try_from(raw: RawJobConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(JobConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawJobConfig) -> Result<()> {
    ensure_has_modules(cfg)?;
    validate_process(cfg)?;
    validate_source(cfg)?;
    validate_modules(cfg)?;
    module_order(&cfg.modules)?;
    validate_paths(cfg)?;
    validate_conditions(cfg)?;
    Ok(())
}

fn ensure_has_modules(cfg: &RawJobConfig) -> Result<()> {
    if cfg.modules.is_empty() {
        return Err(SchedError::ConfigError(
            "job must contain at least one [[module]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_process(cfg: &RawJobConfig) -> Result<()> {
    let p = &cfg.process;
    let checks = [
        ("streams", Some(p.streams)),
        ("threads", p.threads),
        ("concurrent_lumis", Some(p.concurrent_lumis)),
        ("concurrent_runs", Some(p.concurrent_runs)),
    ];
    for (name, value) in checks {
        if value == Some(0) {
            return Err(SchedError::ConfigError(format!(
                "[process].{name} must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_source(cfg: &RawJobConfig) -> Result<()> {
    for file in &cfg.source.files {
        if file.runs.is_empty() {
            return Err(SchedError::ConfigError(format!(
                "source file '{}' has no runs",
                file.name
            )));
        }
        for run in &file.runs {
            if run.lumis == 0 {
                return Err(SchedError::ConfigError(format!(
                    "run {} in source file '{}' must have lumis >= 1",
                    run.run, file.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_modules(cfg: &RawJobConfig) -> Result<()> {
    let mut labels = HashSet::new();
    for module in &cfg.modules {
        if module.label.trim().is_empty() {
            return Err(SchedError::ConfigError(
                "module label must not be empty".to_string(),
            ));
        }
        if !labels.insert(module.label.as_str()) {
            return Err(SchedError::ConfigError(format!(
                "module label '{}' is used more than once",
                module.label
            )));
        }
        if module.prescale == Some(0) {
            return Err(SchedError::ConfigError(format!(
                "module '{}' has prescale 0; use at least 1",
                module.label
            )));
        }
        if module.concurrency == ConcurrencyKind::Limited(0) {
            return Err(SchedError::ConfigError(format!(
                "module '{}' has concurrency limit 0; use at least 1",
                module.label
            )));
        }
    }

    for module in &cfg.modules {
        for dep in &module.consumes {
            if dep == &module.label {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' cannot consume its own products",
                    module.label
                )));
            }
            if !labels.contains(dep.as_str()) {
                return Err(SchedError::ConfigError(format!(
                    "module '{}' consumes unknown module '{}'",
                    module.label, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_paths(cfg: &RawJobConfig) -> Result<()> {
    let labels: HashSet<&str> = cfg.modules.iter().map(|m| m.label.as_str()).collect();
    let mut names = HashSet::new();
    for path in &cfg.paths {
        if path.name.trim().is_empty() {
            return Err(SchedError::ConfigError(
                "path name must not be empty".to_string(),
            ));
        }
        if !names.insert(path.name.as_str()) {
            return Err(SchedError::ConfigError(format!(
                "path '{}' is defined more than once",
                path.name
            )));
        }
        if path.modules.is_empty() {
            return Err(SchedError::ConfigError(format!(
                "path '{}' has no modules",
                path.name
            )));
        }
        let mut seen = HashSet::new();
        for label in &path.modules {
            if !labels.contains(label.as_str()) {
                return Err(SchedError::ConfigError(format!(
                    "path '{}' names unknown module '{label}'",
                    path.name
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(SchedError::ConfigError(format!(
                    "path '{}' lists module '{label}' twice",
                    path.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_conditions(cfg: &RawJobConfig) -> Result<()> {
    for (name, record) in &cfg.conditions.records {
        if record.iovs.is_empty() {
            return Err(SchedError::ConfigError(format!(
                "condition record '{name}' has no IOVs"
            )));
        }
        let increasing = record.iovs.windows(2).all(|w| w[0].since < w[1].since);
        if !increasing {
            return Err(SchedError::ConfigError(format!(
                "IOVs of condition record '{name}' must have strictly increasing `since`"
            )));
        }
    }
    Ok(())
}

/// Module labels in dependency order: every module comes after the modules
/// it consumes.
///
/// Edge direction is producer -> consumer.
pub fn module_order(modules: &[ModuleConfig]) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for module in modules {
        graph.add_node(module.label.as_str());
    }
    for module in modules {
        for dep in &module.consumes {
            graph.add_edge(dep.as_str(), module.label.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(SchedError::ModuleCycle(format!(
            "cycle detected in module dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}
