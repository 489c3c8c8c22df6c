//! SW-007: Topological planner — layered materialization order.
//!
//! Kahn's algorithm over the materialization dependencies. Each layer holds
//! the nodes whose dependencies all sit in earlier layers; nodes within a
//! layer are parallel-eligible and sorted alphabetically for determinism.

use super::error::{ErrorReport, StackError};
use super::graph::{find_cycles, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Layered and linear materialization order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationOrder {
    pub layers: Vec<Vec<String>>,
}

impl MaterializationOrder {
    /// Layers concatenated, dependencies first.
    pub fn linear(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    /// Index of `id` in the linear order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.layers.iter().flatten().position(|n| n == id)
    }

    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|n| n == id))
    }

    /// Reverse layers: dependents before their dependencies.
    pub fn destroy_layers(&self) -> Vec<Vec<String>> {
        self.layers.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Order a graph. Cycles here are fatal; the graph builder normally
/// rejects them first.
pub fn materialization_order(graph: &Graph) -> Result<MaterializationOrder, ErrorReport> {
    layered_order(graph.dependency_map()).map(|layers| MaterializationOrder { layers })
}

/// Layered Kahn's algorithm over a node → predecessors map. Predecessors
/// that are not keys of the map are ignored.
pub fn layered_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>, ErrorReport> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in dependencies.keys() {
        in_degree.insert(id.as_str(), 0);
        adjacency.insert(id.as_str(), Vec::new());
    }

    for (id, deps) in dependencies {
        for dep in deps {
            if let Some(successors) = adjacency.get_mut(dep.as_str()) {
                successors.push(id.as_str());
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    current.sort_unstable();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut placed = 0usize;

    while !current.is_empty() {
        let mut next: Vec<&str> = Vec::new();
        for id in &current {
            for successor in adjacency.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*successor);
                    }
                }
            }
        }
        next.sort_unstable();
        placed += current.len();
        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if placed != dependencies.len() {
        let errors = find_cycles(dependencies)
            .into_iter()
            .map(|nodes| StackError::Cycle { nodes })
            .collect();
        return Err(ErrorReport::new(errors));
    }

    Ok(layers)
}
