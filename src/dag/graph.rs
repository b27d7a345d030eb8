// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::plan::StepSpec;

#[derive(Debug, Clone, Default)]
struct DagNode {
    deps: Vec<String>,
    dependents: Vec<String>,
}

/// In-memory adjacency keyed by step name.
///
/// Built from whatever a plan builder produced, so dependencies on names
/// missing from the plan are kept as-is (they are simply never satisfied).
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<String, DagNode>,
    /// Plan order, kept for stable iteration.
    names: Vec<String>,
}

impl DagGraph {
    pub fn from_specs(specs: &[StepSpec]) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();
        let mut names = Vec::with_capacity(specs.len());

        for spec in specs {
            names.push(spec.name.clone());
            nodes.insert(
                spec.name.clone(),
                DagNode {
                    deps: spec.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for spec in specs {
            for dep in spec.depends_on.iter() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(spec.name.clone());
                }
            }
        }

        Self { nodes, names }
    }

    /// Step names in plan order.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Steps without declared dependencies; ready right after planning.
    pub fn roots(&self) -> Vec<&str> {
        self.steps()
            .filter(|name| self.dependencies_of(name).is_empty())
            .collect()
    }

    /// Dependencies that name no step of this plan.
    pub fn dangling_dependencies(&self) -> Vec<(&str, &str)> {
        self.steps()
            .flat_map(|name| {
                self.dependencies_of(name)
                    .iter()
                    .filter(|dep| !self.nodes.contains_key(dep.as_str()))
                    .map(move |dep| (name, dep.as_str()))
            })
            .collect()
    }

    /// Topological order of the known steps, or `None` on a cycle.
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.steps() {
            graph.add_node(name);
        }
        for name in self.steps() {
            for dep in self.dependencies_of(name) {
                if self.nodes.contains_key(dep) {
                    graph.add_edge(dep.as_str(), name, ());
                }
            }
        }
        toposort(&graph, None).ok()
    }
}
