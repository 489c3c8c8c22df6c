//! SW-008: Access wiring resolver.
//!
//! Turns consumption declarations into minimal access edges and merges them
//! with the explicit edge set:
//! - Network: ingress on the target, exact port, consumer boundary only
//! - Credential: egress grant of exactly one secret field
//! - Mount: storage-port ingress plus a mount edge with path and mode
//!
//! An explicit edge for the same `(from, to, channel)` suppresses the
//! synthesized one. Merging dedupes by `(from, to, channel, scope)`, so
//! wiring an already wired set adds nothing.

use super::error::{ErrorReport, StackError};
use super::graph::Graph;
use super::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Merged access edge set plus the findings produced while merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiring {
    pub edges: Vec<AccessEdge>,
    pub findings: Vec<WiringFinding>,
}

impl Wiring {
    /// Edges touching `node` on either end.
    pub fn edges_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a AccessEdge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.from == node || e.to == node)
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.edges.iter().filter(|e| e.channel == channel).count()
    }
}

/// One minimal edge per consumption.
pub fn synthesize(graph: &Graph) -> Vec<AccessEdge> {
    graph
        .consumptions()
        .iter()
        .map(|c| AccessEdge {
            from: c.consumer.clone(),
            to: c.target.clone(),
            channel: c.channel,
            scope: c.scope.clone(),
            direction: c.channel.default_direction(),
            origin: EdgeOrigin::Synthesized {
                consumption: c.label.clone(),
            },
        })
        .collect()
}

/// Wire a graph under its own policy.
pub fn wire(graph: &Graph) -> Result<Wiring, ErrorReport> {
    if !graph.policy.auto_wire {
        return require_explicit(graph);
    }
    let mut edges = graph.explicit_edges().to_vec();
    edges.extend(synthesize(graph));
    merge(edges, graph.policy.conflict)
}

/// Merge explicit and synthesized edges (told apart by origin).
pub fn merge(
    edges: impl IntoIterator<Item = AccessEdge>,
    conflict: ConflictPolicy,
) -> Result<Wiring, ErrorReport> {
    let (explicit, synthesized): (Vec<AccessEdge>, Vec<AccessEdge>) =
        edges.into_iter().partition(AccessEdge::is_explicit);

    let mut by_triple: BTreeMap<(String, String, Channel), Vec<&AccessEdge>> = BTreeMap::new();
    for edge in &explicit {
        by_triple
            .entry((edge.from.clone(), edge.to.clone(), edge.channel))
            .or_default()
            .push(edge);
    }

    let mut errors = Vec::new();
    let mut findings = Vec::new();
    let mut kept: BTreeMap<(String, String, Channel, Scope), AccessEdge> = BTreeMap::new();

    for edge in &explicit {
        kept.entry(edge.key()).or_insert_with(|| edge.clone());
    }

    for edge in synthesized {
        let triple = (edge.from.clone(), edge.to.clone(), edge.channel);
        let overrides = match by_triple.get(&triple) {
            Some(overrides) => overrides,
            None => {
                kept.entry(edge.key()).or_insert(edge);
                continue;
            }
        };

        if overrides.iter().any(|e| e.scope == edge.scope) {
            continue;
        }
        let winner = overrides
            .iter()
            .find(|e| e.scope.covers(&edge.scope))
            .unwrap_or(&overrides[0]);

        match conflict {
            ConflictPolicy::PreferExplicit => {}
            ConflictPolicy::Flag => {
                let finding = WiringFinding::Suppressed {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    channel: edge.channel,
                    explicit: winner.scope.clone(),
                    synthesized: edge.scope.clone(),
                    explicit_covers: winner.scope.covers(&edge.scope),
                };
                if !findings.contains(&finding) {
                    findings.push(finding);
                }
            }
            ConflictPolicy::Fail => {
                let error = StackError::ConflictingEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    channel: edge.channel,
                };
                if !errors.contains(&error) {
                    errors.push(error);
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(ErrorReport::new(errors));
    }

    for edge in &explicit {
        if edge.scope.is_unscoped_ingress() {
            let finding = WiringFinding::UnscopedIngress {
                from: edge.from.clone(),
                to: edge.to.clone(),
                scope: edge.scope.clone(),
            };
            if !findings.contains(&finding) {
                findings.push(finding);
            }
        }
    }

    Ok(Wiring {
        edges: kept.into_values().collect(),
        findings,
    })
}

/// With auto-wiring off every consumption needs an explicit edge of its
/// channel.
fn require_explicit(graph: &Graph) -> Result<Wiring, ErrorReport> {
    let covered: BTreeSet<(&str, &str, Channel)> = graph
        .explicit_edges()
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str(), e.channel))
        .collect();

    let mut errors = Vec::new();
    for c in graph.consumptions() {
        if covered.contains(&(c.consumer.as_str(), c.target.as_str(), c.channel)) {
            continue;
        }
        let error = StackError::MissingAccess {
            from: c.consumer.clone(),
            to: c.target.clone(),
            channel: c.channel,
        };
        if !errors.contains(&error) {
            errors.push(error);
        }
    }
    if !errors.is_empty() {
        return Err(ErrorReport::new(errors));
    }

    merge(graph.explicit_edges().to_vec(), graph.policy.conflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    fn graph(yaml: &str) -> Graph {
        Graph::build(&parse_config(yaml).unwrap()).unwrap()
    }

    const DB_APP: &str = r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  app:
    kind: container
    attributes: { image: app }
    secrets:
      DB_USER: { from: db, field: username }
"#;

    const WORKER: &str = r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  worker:
    kind: container
    attributes: { image: w }
    connects: [{ to: db }]
edges:
  - { from: worker, to: db, channel: network, port: any, source: any }
"#;

    #[test]
    fn test_sw008_credential_only() {
        let w = wire(&graph(DB_APP)).unwrap();
        assert_eq!(w.edges.len(), 1);
        let e = &w.edges[0];
        assert_eq!((e.from.as_str(), e.to.as_str()), ("app", "db"));
        assert_eq!(e.channel, Channel::Credential);
        assert_eq!(e.direction, Direction::Egress);
        assert_eq!(
            e.scope,
            Scope::Credential {
                field: FieldScope::Field("username".into())
            }
        );
        assert_eq!(w.count(Channel::Network), 0);
        assert!(w.findings.is_empty());
    }

    #[test]
    fn test_sw008_network_scoped_to_peer() {
        let g = graph(
            r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  app:
    kind: container
    attributes: { image: app }
    connects: [{ to: db }]
"#,
        );
        let w = wire(&g).unwrap();
        assert_eq!(w.edges.len(), 1);
        assert_eq!(w.edges[0].direction, Direction::Ingress);
        assert!(!w.edges[0].scope.is_unscoped_ingress());
        assert_eq!(w.edges[0].scope.to_string(), "port 5432 from peer");
        assert_eq!(
            w.edges[0].origin,
            EdgeOrigin::Synthesized {
                consumption: "app.connects[db]".into()
            }
        );
    }

    #[test]
    fn test_sw008_mount_adds_storage_port() {
        let g = graph(
            r#"
version: "1.0"
name: t
nodes:
  fs: { kind: storage }
  app:
    kind: container
    attributes: { image: app }
    mounts:
      - { storage: fs, path: /data }
"#,
        );
        let w = wire(&g).unwrap();
        assert_eq!(w.count(Channel::Network), 1);
        assert_eq!(w.count(Channel::Mount), 1);
        assert_eq!(w.edges_of("fs").count(), 2);
    }

    #[test]
    fn test_sw008_explicit_broad_edge_wins_unnarrowed() {
        let w = wire(&graph(WORKER)).unwrap();
        assert_eq!(w.edges.len(), 1);
        let e = &w.edges[0];
        assert!(e.is_explicit());
        assert_eq!(
            e.scope,
            Scope::Network {
                ports: PortScope::Any,
                source: SourceScope::Any
            }
        );
        assert_eq!(w.findings.len(), 2);
        assert!(w.findings.iter().any(|f| matches!(
            f,
            WiringFinding::Suppressed {
                explicit_covers: true,
                ..
            }
        )));
        assert!(w
            .findings
            .iter()
            .any(|f| matches!(f, WiringFinding::UnscopedIngress { .. })));
    }

    #[test]
    fn test_sw008_prefer_explicit_is_silent_about_suppression() {
        let yaml = format!("{}policy:\n  conflict: prefer_explicit\n", WORKER);
        let w = wire(&graph(&yaml)).unwrap();
        assert_eq!(w.edges.len(), 1);
        assert_eq!(w.findings.len(), 1);
        assert!(matches!(w.findings[0], WiringFinding::UnscopedIngress { .. }));
    }

    #[test]
    fn test_sw008_fail_policy_raises_conflict() {
        let yaml = format!("{}policy:\n  conflict: fail\n", WORKER);
        let err = wire(&graph(&yaml)).unwrap_err();
        assert_eq!(
            err.errors,
            vec![StackError::ConflictingEdge {
                from: "worker".into(),
                to: "db".into(),
                channel: Channel::Network,
            }]
        );
    }

    #[test]
    fn test_sw008_identical_explicit_edge_is_not_a_conflict() {
        let yaml = r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  app:
    kind: container
    attributes: { image: app }
    secrets:
      DB_USER: { from: db, field: username }
edges:
  - { from: app, to: db, channel: credential, field: username }
policy:
  conflict: fail
"#;
        let w = wire(&graph(yaml)).unwrap();
        assert_eq!(w.edges.len(), 1);
        assert!(w.edges[0].is_explicit());
    }

    #[test]
    fn test_sw008_narrow_explicit_is_flagged() {
        let yaml = r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  app:
    kind: container
    attributes: { image: app }
    secrets:
      DB_ALL: { from: db, field: "*" }
edges:
  - { from: app, to: db, channel: credential, field: password }
"#;
        let w = wire(&graph(yaml)).unwrap();
        assert!(matches!(
            w.findings[0],
            WiringFinding::Suppressed {
                explicit_covers: false,
                ..
            }
        ));
        assert!(w.findings[0].to_string().contains("narrower"));
    }

    #[test]
    fn test_sw008_wiring_twice_is_idempotent() {
        let g = graph(
            r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  fs: { kind: storage }
  app:
    kind: container
    attributes: { image: app }
    connects: [{ to: db }, { to: db }]
    secrets:
      DB_USER: { from: db, field: username }
      DB_USER_AGAIN: { from: db, field: username }
    mounts:
      - { storage: fs, path: /data }
"#,
        );
        let once = wire(&g).unwrap();
        assert_eq!(once.edges.len(), 4);
        let mut again = once.edges.clone();
        again.extend(synthesize(&g));
        let twice = merge(again, g.policy.conflict).unwrap();
        assert_eq!(twice.edges.len(), once.edges.len());
    }

    #[test]
    fn test_sw008_auto_wire_off_requires_edges() {
        let yaml = format!("{}policy:\n  auto_wire: false\n", DB_APP);
        let err = wire(&graph(&yaml)).unwrap_err();
        assert_eq!(
            err.errors,
            vec![StackError::MissingAccess {
                from: "app".into(),
                to: "db".into(),
                channel: Channel::Credential,
            }]
        );
    }

    #[test]
    fn test_sw008_auto_wire_off_with_explicit_edges() {
        let yaml = format!(
            "{}edges:\n  - {{ from: app, to: db, channel: credential, field: username }}\npolicy:\n  auto_wire: false\n",
            DB_APP
        );
        let w = wire(&graph(&yaml)).unwrap();
        assert_eq!(w.edges.len(), 1);
        assert!(w.edges[0].is_explicit());
    }
}
