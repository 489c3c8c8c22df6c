//! Provisioner seam — the only place provisioning I/O happens.
//!
//! The compiler core never talks to a cloud; the executor hands each
//! resolved operation and each access edge to a [`Provisioner`]. Rate
//! limiting and retry belong to the implementation.

pub mod simulated;

use crate::core::resolver::ResolvedConfig;
use crate::core::types::{AccessEdge, NodeKind, PlanAction};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One node to materialize, with every reference already substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializeOp {
    pub node_id: String,
    pub kind: NodeKind,
    pub action: PlanAction,
    pub config: ResolvedConfig,
}

/// Provisioning backend.
///
/// Errors are plain strings at this seam; the executor wraps them into the
/// run report.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the provisioner name (e.g., "simulated")
    fn name(&self) -> &str;

    /// Create or update a node. Returns its deferred attribute values.
    async fn materialize(&self, op: &MaterializeOp) -> Result<IndexMap<String, String>, String>;

    /// Install an access edge whose scope is fully resolved.
    async fn grant(&self, edge: &AccessEdge) -> Result<(), String>;

    /// Remove a node that is no longer declared.
    async fn destroy(&self, node_id: &str, kind: NodeKind) -> Result<(), String>;
}
