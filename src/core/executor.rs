//! SW-017: Executor — concurrent materialization of a deployment plan.
//!
//! Runs independent branches concurrently on a `JoinSet`:
//! plan → seed NoOp outputs → for each ready node: resolve → provision →
//! fulfil deferred slots → release dependents → grant edges → destroys
//!
//! A node starts only after every materialization dependency finished. On
//! failure its downstream closure is blocked; under `stop_on_first` nothing
//! new starts at all. In-flight work always completes.

use super::deferred::DeferredStore;
use super::graph::Graph;
use super::planner::{self, Compiled};
use super::resolver::{ResolvedConfig, Resolver};
use super::state;
use super::types::*;
use crate::provenance::eventlog::{self, EventLog};
use crate::provider::{MaterializeOp, Provisioner};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// An access edge the provisioner refused.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeFailure {
    pub edge: AccessEdge,
    pub error: String,
}

/// The frontier of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// Completion order
    pub materialized: Vec<String>,
    pub unchanged: Vec<String>,
    /// node → error
    pub failed: IndexMap<String, String>,
    /// node → failed ancestors
    pub blocked: IndexMap<String, Vec<String>>,
    pub not_started: Vec<String>,
    /// Granted edges with scopes resolved
    pub granted: Vec<AccessEdge>,
    pub failed_edges: Vec<EdgeFailure>,
    /// Edges whose endpoints never both materialized
    pub pending_edges: Vec<AccessEdge>,
    pub destroyed: Vec<String>,
    pub failed_destroys: IndexMap<String, String>,
    /// Resolved configuration handed to the provisioner
    pub configs: IndexMap<String, ResolvedConfig>,
    /// Deferred outputs per node, including seeded NoOp nodes
    pub outputs: IndexMap<String, IndexMap<String, String>>,
    pub durations: IndexMap<String, f64>,
    pub total_seconds: f64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.blocked.is_empty()
            && self.not_started.is_empty()
            && self.failed_edges.is_empty()
            && self.failed_destroys.is_empty()
    }
}

/// One execution of a plan.
pub struct Execution<'a> {
    pub compiled: &'a Compiled,
    pub plan: &'a DeploymentPlan,
    /// Lock the plan was computed against; seeds NoOp outputs
    pub previous: Option<&'a StateLock>,
    pub provisioner: Arc<dyn Provisioner>,
    pub events: &'a EventLog,
    /// Re-materialize NoOp nodes
    pub force: bool,
}

enum TaskOutcome {
    Node {
        id: String,
        result: Result<IndexMap<String, String>, String>,
        seconds: f64,
    },
    Grant {
        edge: AccessEdge,
        result: Result<(), String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Done,
    Failed,
    Blocked,
}

/// Scheduling state of one run.
struct Scheduler<'a> {
    graph: &'a Graph,
    events: &'a EventLog,
    states: BTreeMap<String, NodeState>,
    ready: BTreeSet<String>,
    ungranted: Vec<AccessEdge>,
    stopped: bool,
    report: RunReport,
}

impl<'a> Scheduler<'a> {
    fn emit(&self, event: ProvenanceEvent) {
        let _ = self.events.record(event);
    }

    fn state(&self, id: &str) -> NodeState {
        self.states.get(id).copied().unwrap_or(NodeState::Pending)
    }

    /// Mark `id` done and release dependents whose dependencies are all done.
    fn complete(&mut self, id: &str) {
        self.states.insert(id.to_string(), NodeState::Done);
        for dependent in self.graph.dependents(id) {
            let released = self.state(&dependent) == NodeState::Pending
                && self
                    .graph
                    .dependencies(&dependent)
                    .iter()
                    .all(|d| self.state(d) == NodeState::Done);
            if released {
                self.ready.insert(dependent);
            }
        }
    }

    /// Record a failure and block its downstream closure.
    fn fail(&mut self, id: &str, error: String) {
        self.states.insert(id.to_string(), NodeState::Failed);
        self.emit(ProvenanceEvent::NodeFailed {
            stack: self.graph.name.clone(),
            node: id.to_string(),
            error: error.clone(),
        });
        self.report.failed.insert(id.to_string(), error);

        if self.graph.policy.failure == FailurePolicy::StopOnFirst {
            self.stopped = true;
        }

        for downstream in self.graph.downstream(id) {
            match self.state(&downstream) {
                NodeState::Pending | NodeState::Blocked => {
                    self.ready.remove(&downstream);
                    self.states.insert(downstream.clone(), NodeState::Blocked);
                    self.report
                        .blocked
                        .entry(downstream)
                        .or_default()
                        .push(id.to_string());
                }
                _ => {}
            }
        }
    }

    /// Take every edge whose endpoints are both done.
    fn grantable(&mut self) -> Vec<AccessEdge> {
        let (ready, waiting): (Vec<AccessEdge>, Vec<AccessEdge>) =
            std::mem::take(&mut self.ungranted).into_iter().partition(|e| {
                self.states.get(&e.from) == Some(&NodeState::Done)
                    && self.states.get(&e.to) == Some(&NodeState::Done)
            });
        self.ungranted = waiting;
        ready
    }
}

/// Execute a plan against a provisioner and report the frontier.
pub async fn execute(exec: Execution<'_>) -> RunReport {
    let start = Instant::now();
    let graph = &exec.compiled.graph;
    let stack = graph.name.clone();
    let store = DeferredStore::for_graph(graph);
    let resolver = Resolver::new(graph, &store);

    let mut sched = Scheduler {
        graph,
        events: exec.events,
        states: graph
            .node_ids()
            .into_iter()
            .map(|id| (id, NodeState::Pending))
            .collect(),
        ready: BTreeSet::new(),
        ungranted: exec.plan.edges.clone(),
        stopped: false,
        report: RunReport {
            run_id: eventlog::generate_run_id(),
            ..RunReport::default()
        },
    };

    sched.emit(ProvenanceEvent::ApplyStarted {
        stack: stack.clone(),
        run_id: sched.report.run_id.clone(),
        provisioner: exec.provisioner.name().to_string(),
        stackwire_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    for finding in &exec.plan.findings {
        sched.emit(ProvenanceEvent::WiringFinding {
            stack: stack.clone(),
            detail: finding.to_string(),
        });
    }

    // NoOp nodes are done before anything runs; every dependency of a NoOp
    // node is itself NoOp, so seeding in plan order is safe.
    for op in &exec.plan.operations {
        if op.action != PlanAction::NoOp || exec.force {
            continue;
        }
        if let Some(entry) = exec.previous.and_then(|l| l.nodes.get(&op.node_id)) {
            if let Ok(accepted) = store.fulfil_outputs(&op.node_id, &entry.outputs) {
                sched.report.outputs.insert(op.node_id.clone(), accepted);
            }
        }
        sched.report.unchanged.push(op.node_id.clone());
        sched.complete(&op.node_id);
    }
    for op in &exec.plan.operations {
        let deps_done = op
            .depends_on
            .iter()
            .all(|d| sched.state(d) == NodeState::Done);
        if sched.state(&op.node_id) == NodeState::Pending && deps_done {
            sched.ready.insert(op.node_id.clone());
        }
    }

    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
    let mut running = 0usize;
    let max_parallel = graph.policy.max_parallel;

    loop {
        for edge in sched.grantable() {
            spawn_grant(&mut tasks, &mut sched, &resolver, &exec.provisioner, edge);
        }

        while !sched.stopped && (max_parallel == 0 || running < max_parallel) {
            let Some(id) = sched.ready.pop_first() else {
                break;
            };
            let (kind, action) = match exec.plan.operation(&id) {
                Some(op) if op.action == PlanAction::NoOp => (op.kind, PlanAction::Update),
                Some(op) => (op.kind, op.action),
                None => continue,
            };

            let config = match resolver.node(&id) {
                Ok(config) => config,
                Err(errors) => {
                    let message: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                    sched.fail(&id, message.join("; "));
                    continue;
                }
            };

            sched.states.insert(id.clone(), NodeState::Running);
            sched.report.configs.insert(id.clone(), config.clone());
            sched.emit(ProvenanceEvent::NodeStarted {
                stack: stack.clone(),
                node: id.clone(),
                action: action.to_string(),
            });

            let provisioner = Arc::clone(&exec.provisioner);
            let op = MaterializeOp {
                node_id: id,
                kind,
                action,
                config,
            };
            running += 1;
            tasks.spawn(async move {
                let started = Instant::now();
                let id = op.node_id.clone();
                let result = guarded(async move { provisioner.materialize(&op).await }).await;
                TaskOutcome::Node {
                    id,
                    result,
                    seconds: started.elapsed().as_secs_f64(),
                }
            });
        }

        let outcome = match tasks.join_next().await {
            Some(Ok(outcome)) => outcome,
            // outer tasks only await a guarded call and are never aborted
            Some(Err(_)) => continue,
            None => break,
        };

        match outcome {
            TaskOutcome::Node {
                id,
                result: Ok(outputs),
                seconds,
            } => {
                running -= 1;
                match store.fulfil_outputs(&id, &outputs) {
                    Ok(accepted) => {
                        let hash = exec
                            .plan
                            .operation(&id)
                            .map(|op| op.hash.clone())
                            .unwrap_or_default();
                        sched.emit(ProvenanceEvent::NodeMaterialized {
                            stack: stack.clone(),
                            node: id.clone(),
                            duration_seconds: seconds,
                            hash,
                        });
                        sched.report.outputs.insert(id.clone(), accepted);
                        sched.report.durations.insert(id.clone(), seconds);
                        sched.report.materialized.push(id.clone());
                        sched.complete(&id);
                    }
                    Err(e) => sched.fail(&id, e.to_string()),
                }
            }
            TaskOutcome::Node {
                id,
                result: Err(error),
                ..
            } => {
                running -= 1;
                sched.fail(&id, error);
            }
            TaskOutcome::Grant {
                edge,
                result: Ok(()),
            } => {
                sched.emit(ProvenanceEvent::EdgeGranted {
                    stack: stack.clone(),
                    edge: edge.to_string(),
                });
                sched.report.granted.push(edge);
            }
            TaskOutcome::Grant {
                edge,
                result: Err(error),
            } => {
                sched.emit(ProvenanceEvent::EdgeFailed {
                    stack: stack.clone(),
                    edge: edge.to_string(),
                    error: error.clone(),
                });
                sched.report.failed_edges.push(EdgeFailure { edge, error });
            }
        }
    }

    let not_started: Vec<String> = sched
        .states
        .iter()
        .filter(|(_, s)| **s == NodeState::Pending)
        .map(|(id, _)| id.clone())
        .collect();
    sched.report.not_started = not_started;
    sched.report.pending_edges = std::mem::take(&mut sched.ungranted);

    for (node, blocked_by) in &sched.report.blocked {
        sched.emit(ProvenanceEvent::NodeBlocked {
            stack: stack.clone(),
            node: node.clone(),
            blocked_by: blocked_by.clone(),
        });
    }

    let clean = sched.report.failed.is_empty()
        && sched.report.blocked.is_empty()
        && sched.report.not_started.is_empty();
    if clean {
        for op in &exec.plan.destroys {
            match exec.provisioner.destroy(&op.node_id, op.kind).await {
                Ok(()) => {
                    sched.emit(ProvenanceEvent::NodeDestroyed {
                        stack: stack.clone(),
                        node: op.node_id.clone(),
                    });
                    sched.report.destroyed.push(op.node_id.clone());
                }
                Err(e) => {
                    sched.report.failed_destroys.insert(op.node_id.clone(), e);
                    break;
                }
            }
        }
    }

    sched.report.total_seconds = start.elapsed().as_secs_f64();
    sched.emit(ProvenanceEvent::ApplyCompleted {
        stack,
        run_id: sched.report.run_id.clone(),
        nodes_materialized: sched.report.materialized.len() as u32,
        nodes_unchanged: sched.report.unchanged.len() as u32,
        nodes_failed: sched.report.failed.len() as u32,
        nodes_blocked: sched.report.blocked.len() as u32,
        total_seconds: sched.report.total_seconds,
    });

    sched.report
}

/// Resolve an edge's scope and hand it to the provisioner.
fn spawn_grant(
    tasks: &mut JoinSet<TaskOutcome>,
    sched: &mut Scheduler<'_>,
    resolver: &Resolver<'_>,
    provisioner: &Arc<dyn Provisioner>,
    edge: AccessEdge,
) {
    let scope = match resolver.scope(&edge.scope) {
        Ok(scope) => scope,
        Err(e) => {
            sched.emit(ProvenanceEvent::EdgeFailed {
                stack: sched.graph.name.clone(),
                edge: edge.to_string(),
                error: e.to_string(),
            });
            sched.report.failed_edges.push(EdgeFailure {
                edge,
                error: e.to_string(),
            });
            return;
        }
    };
    let edge = AccessEdge { scope, ..edge };
    let provisioner = Arc::clone(provisioner);
    tasks.spawn(async move {
        let granted = edge.clone();
        let result = guarded(async move { provisioner.grant(&granted).await }).await;
        TaskOutcome::Grant { edge, result }
    });
}

/// Run one provisioner call on its own task so a panic inside the
/// provisioner becomes an error for that node or edge.
async fn guarded<T, F>(call: F) -> Result<T, String>
where
    F: Future<Output = Result<T, String>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(e) => Err(format!("provisioner task failed: {}", e)),
    }
}

/// Fold a run into the previous lock.
pub fn updated_lock(
    previous: Option<&StateLock>,
    compiled: &Compiled,
    plan: &DeploymentPlan,
    report: &RunReport,
) -> StateLock {
    let fresh = state::new_lock(&compiled.graph.name);
    let mut lock = match previous {
        Some(p) => StateLock {
            generated_at: fresh.generated_at.clone(),
            generator: fresh.generator.clone(),
            ..p.clone()
        },
        None => fresh,
    };

    for id in &report.destroyed {
        lock.nodes.shift_remove(id);
    }

    let now = eventlog::now_iso8601();
    for op in &plan.operations {
        let id = &op.node_id;
        let status = if report.materialized.contains(id) {
            NodeStatus::Materialized
        } else if report.failed.contains_key(id) {
            NodeStatus::Failed
        } else if report.blocked.contains_key(id) {
            NodeStatus::Blocked
        } else {
            continue;
        };
        lock.nodes.insert(
            id.clone(),
            NodeLock {
                kind: op.kind,
                status,
                hash: op.hash.clone(),
                depends_on: op.depends_on.clone(),
                outputs: report.outputs.get(id).cloned().unwrap_or_default(),
                applied_at: Some(now.clone()),
                duration_seconds: report.durations.get(id).copied(),
            },
        );
    }

    lock
}

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    pub provisioner: Arc<dyn Provisioner>,
    pub force: bool,
    pub dry_run: bool,
}

/// Plan plus, unless dry-run, the run report.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub plan: DeploymentPlan,
    pub report: Option<RunReport>,
}

/// Compile, plan, execute, and persist the lock.
pub async fn apply(cfg: ApplyConfig<'_>) -> Result<ApplyResult, String> {
    let compiled = planner::compile(cfg.config).map_err(|e| e.to_string())?;
    let previous = state::load_lock(cfg.state_dir, &compiled.graph.name)?;
    let plan = planner::plan(&compiled, previous.as_ref());

    if cfg.dry_run {
        return Ok(ApplyResult { plan, report: None });
    }

    let events = if compiled.graph.policy.event_log {
        EventLog::open(cfg.state_dir, &compiled.graph.name)
    } else {
        EventLog::disabled()
    };

    let report = execute(Execution {
        compiled: &compiled,
        plan: &plan,
        previous: previous.as_ref(),
        provisioner: cfg.provisioner,
        events: &events,
        force: cfg.force,
    })
    .await;

    if compiled.graph.policy.lock_file {
        let lock = updated_lock(previous.as_ref(), &compiled, &plan, &report);
        state::save_lock(cfg.state_dir, &lock)?;
    }

    Ok(ApplyResult {
        plan,
        report: Some(report),
    })
}
