//! SW-009: Compilation and plan generation.
//!
//! `compile` runs the pure pipeline (graph → order → wiring) and `plan`
//! diffs the compiled stack against the previous run's lock:
//! - absent from the lock → Create
//! - materialized, same hash, every dependency NoOp → NoOp
//! - anything else → Update
//! - lock nodes no longer declared → Destroy, dependents first

use super::error::ErrorReport;
use super::graph::{Graph, Node};
use super::order::{self, MaterializationOrder};
use super::types::*;
use super::wiring::{self, Wiring};
use crate::kinds;
use crate::provenance::hasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A stack that passed every structural check.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub graph: Graph,
    pub order: MaterializationOrder,
    pub wiring: Wiring,
}

/// Build, order, and wire a stack document.
pub fn compile(config: &StackConfig) -> Result<Compiled, ErrorReport> {
    let graph = Graph::build(config)?;
    let order = order::materialization_order(&graph)?;
    let wiring = wiring::wire(&graph)?;
    Ok(Compiled {
        graph,
        order,
        wiring,
    })
}

/// Hash of a node's declared configuration under the given settings.
pub fn node_hash(node: &Node, settings: &Settings) -> String {
    hasher::composite_hash(&[
        &hasher::hash_declaration(&node.decl),
        &hasher::hash_canonical(settings),
    ])
}

/// Generate a deployment plan by comparing the compiled stack to the lock.
pub fn plan(compiled: &Compiled, lock: Option<&StateLock>) -> DeploymentPlan {
    let graph = &compiled.graph;
    let mut actions: HashMap<&str, PlanAction> = HashMap::new();
    let mut operations = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut unchanged = 0u32;

    for (layer, ids) in compiled.order.layers.iter().enumerate() {
        for id in ids {
            let node = match graph.node(id) {
                Some(n) => n,
                None => continue,
            };
            let hash = node_hash(node, &graph.settings);
            let depends_on = graph.dependencies(id);
            let previous = lock.and_then(|l| l.nodes.get(id.as_str()));
            let action = determine_action(previous, &hash, &depends_on, &actions);

            match action {
                PlanAction::Create => to_create += 1,
                PlanAction::Update => to_update += 1,
                PlanAction::NoOp => unchanged += 1,
                PlanAction::Destroy => {}
            }
            actions.insert(id.as_str(), action);

            operations.push(PlannedOp {
                node_id: id.clone(),
                kind: node.kind,
                action,
                layer,
                depends_on,
                description: describe_action(node, action, previous, &hash),
                hash,
            });
        }
    }

    let destroys = lock.map(|l| plan_destroys(graph, l)).unwrap_or_default();

    DeploymentPlan {
        name: graph.name.clone(),
        layers: compiled.order.layers.clone(),
        operations,
        to_destroy: destroys.len() as u32,
        destroys,
        edges: compiled.wiring.edges.clone(),
        findings: compiled.wiring.findings.clone(),
        to_create,
        to_update,
        unchanged,
    }
}

fn determine_action(
    previous: Option<&NodeLock>,
    hash: &str,
    depends_on: &[String],
    actions: &HashMap<&str, PlanAction>,
) -> PlanAction {
    let entry = match previous {
        Some(e) => e,
        None => return PlanAction::Create,
    };
    let deps_unchanged = depends_on
        .iter()
        .all(|d| actions.get(d.as_str()) == Some(&PlanAction::NoOp));
    if entry.status == NodeStatus::Materialized && entry.hash == hash && deps_unchanged {
        PlanAction::NoOp
    } else {
        PlanAction::Update
    }
}

fn describe_action(
    node: &Node,
    action: PlanAction,
    previous: Option<&NodeLock>,
    hash: &str,
) -> String {
    match action {
        PlanAction::Create => kinds::describe(&node.id, node.kind, &node.attributes),
        PlanAction::Update => {
            let reason = match previous {
                Some(p) if p.status != NodeStatus::Materialized => {
                    format!("previous run {}", p.status.to_string().to_lowercase())
                }
                Some(p) if p.hash == hash => "dependency changed".to_string(),
                _ => "configuration changed".to_string(),
            };
            format!("{}: update ({})", node.id, reason)
        }
        PlanAction::Destroy => format!("{}: destroy {}", node.id, node.kind),
        PlanAction::NoOp => format!("{}: no changes", node.id),
    }
}

/// Lock nodes that are no longer declared, in destroy order.
fn plan_destroys(graph: &Graph, lock: &StateLock) -> Vec<PlannedOp> {
    let orphans: BTreeMap<String, BTreeSet<String>> = lock
        .nodes
        .iter()
        .filter(|(id, _)| graph.node(id).is_none())
        .map(|(id, entry)| (id.clone(), entry.depends_on.iter().cloned().collect()))
        .collect();

    let layers = match order::layered_order(&orphans) {
        Ok(layers) => layers,
        // a corrupt lock can record a cycle; destroy alphabetically then
        Err(_) => vec![orphans.keys().cloned().collect()],
    };

    let mut destroys = Vec::new();
    for (layer, ids) in layers.iter().rev().enumerate() {
        for id in ids {
            let entry = &lock.nodes[id.as_str()];
            destroys.push(PlannedOp {
                node_id: id.clone(),
                kind: entry.kind,
                action: PlanAction::Destroy,
                layer,
                depends_on: entry.depends_on.clone(),
                hash: entry.hash.clone(),
                description: format!("{}: destroy {}", id, entry.kind),
            });
        }
    }
    destroys
}
