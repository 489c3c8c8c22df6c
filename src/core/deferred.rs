//! SW-006: Deferred attribute slots.
//!
//! One write-once slot per (node, output attribute), created up front from
//! the kind schemas. The executor fulfils a node's slots from its
//! provisioning outputs exactly once; reads before that are
//! `UnresolvedAttribute` errors, never placeholders.

use super::error::StackError;
use super::graph::Graph;
use super::types::AttrRef;
use crate::kinds;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

/// Write-once promise store keyed by node and attribute.
#[derive(Debug, Default)]
pub struct DeferredStore {
    slots: FxHashMap<AttrRef, OnceLock<String>>,
}

impl DeferredStore {
    /// Create an empty slot for every output attribute of every node.
    pub fn for_graph(graph: &Graph) -> Self {
        let mut slots = FxHashMap::default();
        for node in graph.nodes() {
            for attr in kinds::schema(node.kind).outputs {
                slots.insert(AttrRef::new(&node.id, attr), OnceLock::new());
            }
        }
        Self { slots }
    }

    /// Resolve one slot. A second write is an error.
    pub fn fulfil(&self, node: &str, attribute: &str, value: String) -> Result<(), StackError> {
        let slot = self
            .slots
            .get(&AttrRef::new(node, attribute))
            .ok_or_else(|| StackError::UnknownReference {
                referrer: node.to_string(),
                node: node.to_string(),
                attribute: Some(attribute.to_string()),
            })?;
        slot.set(value).map_err(|_| StackError::AlreadyResolved {
            node: node.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Fulfil every slot of `node` present in `outputs`; attributes the
    /// node's kind does not produce are ignored. Returns the accepted outputs.
    pub fn fulfil_outputs(
        &self,
        node: &str,
        outputs: &IndexMap<String, String>,
    ) -> Result<IndexMap<String, String>, StackError> {
        let mut accepted = IndexMap::new();
        for (attr, value) in outputs {
            if !self.slots.contains_key(&AttrRef::new(node, attr)) {
                continue;
            }
            self.fulfil(node, attr, value.clone())?;
            accepted.insert(attr.clone(), value.clone());
        }
        Ok(accepted)
    }

    /// Read a resolved slot.
    pub fn get(&self, node: &str, attribute: &str) -> Result<&str, StackError> {
        self.slots
            .get(&AttrRef::new(node, attribute))
            .and_then(|slot| slot.get())
            .map(String::as_str)
            .ok_or_else(|| StackError::unresolved(node, attribute))
    }

    pub fn is_resolved(&self, node: &str, attribute: &str) -> bool {
        self.get(node, attribute).is_ok()
    }

    /// Every resolved value of one node, in schema order.
    pub fn outputs_of(&self, graph: &Graph, node: &str) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        if let Some(n) = graph.node(node) {
            for attr in kinds::schema(n.kind).outputs {
                if let Ok(v) = self.get(node, attr) {
                    out.insert(attr.to_string(), v.to_string());
                }
            }
        }
        out
    }
}
