//! SW-002: Typed compile and resolution errors.
//!
//! Structural errors (cycles, unknown references, schema violations) are
//! collected into an [`ErrorReport`] so a single corrective pass can fix the
//! declaration. Resolution errors surface per node during materialization.

use super::types::Channel;
use thiserror::Error;

/// A single compile, wiring, or resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Materialization dependencies form a cycle; `nodes` is every member
    /// of the strongly connected component, sorted.
    #[error("dependency cycle among: {}", join_nodes(.nodes))]
    Cycle { nodes: Vec<String> },

    /// A reference names a node or attribute that does not exist.
    #[error("{}", format_unknown(.referrer, .node, .attribute))]
    UnknownReference {
        referrer: String,
        node: String,
        attribute: Option<String>,
    },

    /// A deferred attribute had no value when a consumer needed it.
    #[error("node '{node}' attribute '{attribute}' is unresolved")]
    UnresolvedAttribute { node: String, attribute: String },

    /// A deferred attribute slot was written twice.
    #[error("node '{node}' attribute '{attribute}' was already resolved")]
    AlreadyResolved { node: String, attribute: String },

    /// Explicit and synthesized edges disagree and policy says fail.
    #[error("conflicting {channel} edge {from} -> {to}: explicit scope differs from required scope")]
    ConflictingEdge {
        from: String,
        to: String,
        channel: Channel,
    },

    /// A consumption has no access edge of its channel.
    #[error("node '{from}' consumes '{to}' over {channel} but no {channel} edge grants it")]
    MissingAccess {
        from: String,
        to: String,
        channel: Channel,
    },

    /// Schema or document-level violation.
    #[error("{message}")]
    Invalid { message: String },
}

impl StackError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn unresolved(node: &str, attribute: &str) -> Self {
        Self::UnresolvedAttribute {
            node: node.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

fn join_nodes(nodes: &[String]) -> String {
    nodes.join(", ")
}

fn format_unknown(referrer: &str, node: &str, attribute: &Option<String>) -> String {
    match attribute {
        Some(attr) => format!(
            "node '{}' references unknown attribute '{}.{}'",
            referrer, node, attr
        ),
        None => format!("node '{}' references unknown node '{}'", referrer, node),
    }
}

/// Every error found in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_report(.errors))]
pub struct ErrorReport {
    pub errors: Vec<StackError>,
}

impl ErrorReport {
    pub fn new(errors: Vec<StackError>) -> Self {
        Self { errors }
    }

    pub fn single(error: StackError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Cycles in the report.
    pub fn cycles(&self) -> Vec<&[String]> {
        self.errors
            .iter()
            .filter_map(|e| match e {
                StackError::Cycle { nodes } => Some(nodes.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, pred: impl Fn(&StackError) -> bool) -> bool {
        self.errors.iter().any(pred)
    }
}

impl From<StackError> for ErrorReport {
    fn from(error: StackError) -> Self {
        Self::single(error)
    }
}

fn format_report(errors: &[StackError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
    format!("{} error(s):\n{}", errors.len(), lines.join("\n"))
}
