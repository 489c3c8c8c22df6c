//! SW-016: Simulated provisioner — deterministic outputs, no I/O.
//!
//! Generates plausible deferred values for every output attribute of a
//! kind (ids, ARNs, hostnames, ports) derived from the node id, so two runs
//! over the same stack produce the same values. Failures can be injected
//! per node or per edge, and the peak number of concurrent materializations
//! is recorded for tests.

use super::{MaterializeOp, Provisioner};
use crate::core::types::{AccessEdge, NodeKind, Settings};
use crate::kinds;
use crate::provenance::hasher;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory provisioner used by `apply --simulate` and the tests.
#[derive(Debug, Default)]
pub struct SimulatedProvisioner {
    settings: Settings,
    failing_nodes: BTreeSet<String>,
    failing_edges: BTreeSet<(String, String)>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SimulatedProvisioner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Make materializing `node` fail.
    pub fn fail_node(mut self, node: &str) -> Self {
        self.failing_nodes.insert(node.to_string());
        self
    }

    /// Make granting any edge `from -> to` fail.
    pub fn fail_edge(mut self, from: &str, to: &str) -> Self {
        self.failing_edges.insert((from.to_string(), to.to_string()));
        self
    }

    /// Hold each materialization open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of materializations that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn log(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Deterministic value of one output attribute.
    pub fn output_value(&self, node_id: &str, kind: NodeKind, attr: &str) -> String {
        let tag = hasher::hash_string(&format!("{}/{}", node_id, attr));
        let short = hasher::short(&tag, 8);
        let name = format!("{}{}", self.settings.name_prefix, node_id);
        let region = &self.settings.region;

        match attr {
            "port" => self
                .settings
                .service_port(&kind)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "0".to_string()),
            "hostname" => format!("{}.{}.{}.{}", name, short, region, self.settings.domain),
            "dns_name" => format!("{}-{}.{}.{}", name, short, region, self.settings.domain),
            "arn" => format!("arn:sim:{}:{}/{}", region, kind, name),
            "subnet_ids" => format!("subnet-{}a,subnet-{}b", short, short),
            _ => {
                if let Some(stem) = attr.strip_suffix("_arn") {
                    format!("arn:sim:{}:{}:{}/{}-{}", region, kind, stem, name, short)
                } else if let Some(stem) = attr.strip_suffix("_id") {
                    format!("{}-{}", abbreviate(stem), short)
                } else if attr == "name" || attr.ends_with("_name") {
                    name
                } else {
                    format!("{}-{}", name, attr)
                }
            }
        }
    }
}

fn abbreviate(stem: &str) -> String {
    if stem.contains('_') {
        stem.split('_').filter_map(|w| w.chars().next()).collect()
    } else {
        stem.to_string()
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn materialize(&self, op: &MaterializeOp) -> Result<IndexMap<String, String>, String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log(format!("materialize {}", op.node_id));

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_nodes.contains(&op.node_id) {
            return Err(format!("simulated failure creating {}", op.node_id));
        }

        let mut outputs = IndexMap::new();
        for attr in kinds::schema(op.kind).outputs {
            let value = match op.config.attributes.get(*attr) {
                Some(declared) => declared.clone(),
                None => self.output_value(&op.node_id, op.kind, attr),
            };
            outputs.insert(attr.to_string(), value);
        }
        Ok(outputs)
    }

    async fn grant(&self, edge: &AccessEdge) -> Result<(), String> {
        self.log(format!("grant {}", edge));
        if self
            .failing_edges
            .contains(&(edge.from.clone(), edge.to.clone()))
        {
            return Err(format!("simulated failure granting {} -> {}", edge.from, edge.to));
        }
        Ok(())
    }

    async fn destroy(&self, node_id: &str, kind: NodeKind) -> Result<(), String> {
        self.log(format!("destroy {} ({})", node_id, kind));
        if self.failing_nodes.contains(node_id) {
            return Err(format!("simulated failure destroying {}", node_id));
        }
        Ok(())
    }
}
