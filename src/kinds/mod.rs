//! Kind schemas — the legal attribute set of every node kind.
//!
//! Each kind declares:
//! 1. Input attributes that may be declared immediately
//! 2. Output attributes produced by provisioning (deferred)
//! 3. Required inputs and whether the kind runs a workload
//!
//! An attribute listed as both input and output may be declared to override
//! the generated value.

pub mod compute;
pub mod data;
pub mod network;

use crate::core::types::NodeKind;

/// Attribute schema of one node kind.
#[derive(Debug)]
pub struct KindSchema {
    pub kind: NodeKind,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub required: &'static [&'static str],
    /// Workloads may declare environment, secrets, connects, and mounts
    pub runs_workload: bool,
}

impl KindSchema {
    pub fn is_input(&self, attr: &str) -> bool {
        self.inputs.contains(&attr)
    }

    pub fn is_output(&self, attr: &str) -> bool {
        self.outputs.contains(&attr)
    }

    /// Output-only attributes can never be declared.
    pub fn is_output_only(&self, attr: &str) -> bool {
        self.is_output(attr) && !self.is_input(attr)
    }

    /// Attribute that carries the network boundary (ingress rules attach here).
    pub fn has_boundary(&self) -> bool {
        self.is_output(SECURITY_GROUP_ATTR)
    }

    pub fn owns_secret(&self) -> bool {
        self.is_output(SECRET_ATTR)
    }

    pub fn is_mountable(&self) -> bool {
        self.is_output(FILESYSTEM_ATTR)
    }
}

/// Output read by network consumers.
pub const SECURITY_GROUP_ATTR: &str = "security_group_id";
/// Output read by credential consumers.
pub const SECRET_ATTR: &str = "secret_arn";
/// Output read by mount consumers.
pub const FILESYSTEM_ATTR: &str = "filesystem_id";

/// Look up the schema for a kind.
pub fn schema(kind: NodeKind) -> &'static KindSchema {
    match kind {
        NodeKind::Network => &network::NETWORK,
        NodeKind::Certificate => &network::CERTIFICATE,
        NodeKind::RoutingEndpoint => &network::ROUTING_ENDPOINT,
        NodeKind::Storage => &data::STORAGE,
        NodeKind::Datastore => &data::DATASTORE,
        NodeKind::Secret => &data::SECRET,
        NodeKind::ComputeCluster => &compute::COMPUTE_CLUSTER,
        NodeKind::TaskSpec => &compute::TASK_SPEC,
        NodeKind::Container => &compute::CONTAINER,
        NodeKind::Service => &compute::SERVICE,
    }
}

/// Human-readable summary of what materializing a node does.
pub fn describe(
    node_id: &str,
    kind: NodeKind,
    attributes: &indexmap::IndexMap<String, String>,
) -> String {
    let detail = match kind {
        NodeKind::Network | NodeKind::Certificate | NodeKind::RoutingEndpoint => {
            network::describe(kind, attributes)
        }
        NodeKind::Storage | NodeKind::Datastore | NodeKind::Secret => {
            data::describe(kind, attributes)
        }
        NodeKind::ComputeCluster | NodeKind::TaskSpec | NodeKind::Container | NodeKind::Service => {
            compute::describe(kind, attributes)
        }
    };
    format!("{}: {}", node_id, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_kinds_every_kind_has_schema() {
        for kind in NodeKind::ALL {
            assert_eq!(schema(kind).kind, kind);
        }
    }

    #[test]
    fn test_kinds_required_are_inputs() {
        for kind in NodeKind::ALL {
            let s = schema(kind);
            for req in s.required {
                assert!(s.is_input(req), "{} requires non-input {}", kind, req);
            }
        }
    }

    #[test]
    fn test_kinds_channel_capabilities() {
        assert!(schema(NodeKind::Datastore).owns_secret());
        assert!(schema(NodeKind::Secret).owns_secret());
        assert!(!schema(NodeKind::Storage).owns_secret());
        assert!(schema(NodeKind::Storage).is_mountable());
        assert!(!schema(NodeKind::Datastore).is_mountable());
        assert!(schema(NodeKind::Datastore).has_boundary());
        assert!(!schema(NodeKind::Certificate).has_boundary());
    }

    #[test]
    fn test_kinds_workloads() {
        let workloads: Vec<_> = NodeKind::ALL
            .into_iter()
            .filter(|k| schema(*k).runs_workload)
            .collect();
        assert_eq!(
            workloads,
            vec![NodeKind::TaskSpec, NodeKind::Container, NodeKind::Service]
        );
    }

    #[test]
    fn test_kinds_override_vs_output_only() {
        let db = schema(NodeKind::Datastore);
        assert!(db.is_input("port") && db.is_output("port"));
        assert!(!db.is_output_only("port"));
        assert!(db.is_output_only("hostname"));
    }

    #[test]
    fn test_kinds_describe_prefixes_id() {
        let mut attrs = IndexMap::new();
        attrs.insert("engine".to_string(), "postgres".to_string());
        let d = describe("db", NodeKind::Datastore, &attrs);
        assert!(d.starts_with("db: "));
        assert!(d.contains("postgres"));
    }
}
