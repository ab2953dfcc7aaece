// src/schedule/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, SchedError};
use crate::module::Module;

/// Immediate dependencies and dependents of one module.
#[derive(Debug, Clone, Default)]
struct ModuleNode {
    /// Modules whose products this one consumes.
    deps: Vec<String>,
    /// Modules consuming this one.
    dependents: Vec<String>,
}

/// Consumes-graph of the scheduled modules.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    nodes: HashMap<String, ModuleNode>,
    order: Vec<String>,
}

impl ModuleGraph {
    /// Build the graph and its topological order.
    ///
    /// Unknown `consumes` labels and cycles are configuration errors.
    pub fn new(modules: &[Module]) -> Result<Self> {
        let mut nodes: HashMap<String, ModuleNode> = modules
            .iter()
            .map(|m| {
                let node = ModuleNode {
                    deps: m.consumes().to_vec(),
                    dependents: Vec::new(),
                };
                (m.label().to_string(), node)
            })
            .collect();

        for module in modules {
            for dep in module.consumes() {
                let node = nodes.get_mut(dep).ok_or_else(|| {
                    SchedError::ConfigError(format!(
                        "module '{}' consumes unknown module '{dep}'",
                        module.label()
                    ))
                })?;
                node.dependents.push(module.label().to_string());
            }
        }

        // Edge direction: producer -> consumer.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for module in modules {
            graph.add_node(module.label());
        }
        for module in modules {
            for dep in module.consumes() {
                graph.add_edge(dep.as_str(), module.label(), ());
            }
        }
        let order = toposort(&graph, None)
            .map_err(|cycle| {
                SchedError::ModuleCycle(format!(
                    "cycle detected in module dependencies involving '{}'",
                    cycle.node_id()
                ))
            })?
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(Self { nodes, order })
    }

    /// Labels such that every module follows the modules it consumes.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, label: &str) -> &[String] {
        self.nodes
            .get(label)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, label: &str) -> &[String] {
        self.nodes
            .get(label)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Capabilities;

    fn module(label: &str, consumes: &[&str]) -> Module {
        Module::builder(label, "test")
            .capabilities(Capabilities::events_only())
            .consumes(consumes.iter().map(|s| s.to_string()))
            .build()
            .unwrap()
    }

    #[test]
    fn order_respects_consumes() {
        let modules = vec![
            module("histos", &["tracks", "vertices"]),
            module("vertices", &["tracks"]),
            module("tracks", &[]),
        ];
        let graph = ModuleGraph::new(&modules).unwrap();
        let pos = |l: &str| graph.order().iter().position(|x| x == l).unwrap();
        assert!(pos("tracks") < pos("vertices"));
        assert!(pos("vertices") < pos("histos"));
        assert_eq!(graph.dependents_of("tracks").len(), 2);
        assert_eq!(graph.dependencies_of("histos"), ["tracks", "vertices"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = ModuleGraph::new(&[module("a", &["ghost"])]).unwrap_err();
        assert!(err.is_configuration());
    }
}
