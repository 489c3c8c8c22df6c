//! SW-001: Stack document types, graph vocabulary, plan and lock types.
//!
//! The YAML schema (nodes, explicit edges, settings, policy) plus the typed
//! forms the compiler produces from it (access edges with scopes, plans,
//! lock entries, provenance events). All document types derive
//! Serialize/Deserialize/JsonSchema so `stackwire schema` can publish them.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root document: the declared topology of one application stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name, also the state directory name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Configuration object; the only source of fixed ports and names
    #[serde(default)]
    pub settings: Settings,

    /// Resource node declarations (order-preserving)
    pub nodes: IndexMap<String, NodeDecl>,

    /// Explicitly declared access edges
    #[serde(default)]
    pub edges: Vec<EdgeDecl>,

    /// Compilation and execution policy
    #[serde(default)]
    pub policy: Policy,
}

// ============================================================================
// Settings
// ============================================================================

/// Stack-wide configuration constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    /// Provider region
    #[serde(default = "default_region")]
    pub region: String,

    /// Private DNS domain for generated hostnames
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Prefix applied to generated resource names
    #[serde(default)]
    pub name_prefix: String,

    /// Service port per node kind (used when a consumer does not name one)
    #[serde(default = "default_service_ports")]
    pub service_ports: IndexMap<NodeKind, u16>,

    /// Free-form values readable as `{{settings.<key>}}`
    #[serde(default)]
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    pub values: IndexMap<String, serde_yaml_ng::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: default_region(),
            domain: default_domain(),
            name_prefix: String::new(),
            service_ports: default_service_ports(),
            values: IndexMap::new(),
        }
    }
}

impl Settings {
    /// Look up a `{{settings.<key>}}` template key.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "region" => return Some(self.region.clone()),
            "domain" => return Some(self.domain.clone()),
            "name_prefix" => return Some(self.name_prefix.clone()),
            _ => {}
        }
        if let Some(kind) = key.strip_prefix("service_ports.") {
            return self
                .service_ports
                .iter()
                .find(|(k, _)| k.to_string() == kind)
                .map(|(_, port)| port.to_string());
        }
        let value_key = key.strip_prefix("values.").unwrap_or(key);
        self.values.get(value_key).map(yaml_value_to_string)
    }

    /// Service port configured for a node kind.
    pub fn service_port(&self, kind: &NodeKind) -> Option<u16> {
        self.service_ports.get(kind).copied()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_domain() -> String {
    "internal".to_string()
}

fn default_service_ports() -> IndexMap<NodeKind, u16> {
    IndexMap::from([
        (NodeKind::Datastore, 5432),
        (NodeKind::Storage, 2049),
        (NodeKind::Service, 80),
        (NodeKind::RoutingEndpoint, 443),
    ])
}

// ============================================================================
// Nodes
// ============================================================================

/// A single declared resource node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeDecl {
    /// Resource kind
    pub kind: NodeKind,

    /// Immediate attributes; strings may contain `{{node.attr}}` references
    #[serde(default)]
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    pub attributes: IndexMap<String, serde_yaml_ng::Value>,

    /// Runtime environment (workload kinds only)
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// Extra materialization dependencies
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Network consumption: this node's runtime reaches another node
    #[serde(default)]
    pub connects: Vec<ConnectDecl>,

    /// Credential consumption: env var name → secret field owned by another node
    #[serde(default)]
    pub secrets: IndexMap<String, SecretRef>,

    /// Mount consumption: shared storage attached to this node
    #[serde(default)]
    pub mounts: Vec<MountDecl>,
}

impl NodeDecl {
    /// An empty declaration of the given kind.
    pub fn of(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: IndexMap::new(),
            environment: IndexMap::new(),
            depends_on: Vec::new(),
            connects: Vec::new(),
            secrets: IndexMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(
            name.to_string(),
            serde_yaml_ng::Value::String(value.to_string()),
        );
        self
    }

    /// Builder-style dependency setter.
    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Resource kind enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Network,
    Storage,
    Datastore,
    ComputeCluster,
    TaskSpec,
    Container,
    Service,
    Secret,
    Certificate,
    RoutingEndpoint,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        Self::Network,
        Self::Storage,
        Self::Datastore,
        Self::ComputeCluster,
        Self::TaskSpec,
        Self::Container,
        Self::Service,
        Self::Secret,
        Self::Certificate,
        Self::RoutingEndpoint,
    ];
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Storage => write!(f, "storage"),
            Self::Datastore => write!(f, "datastore"),
            Self::ComputeCluster => write!(f, "compute_cluster"),
            Self::TaskSpec => write!(f, "task_spec"),
            Self::Container => write!(f, "container"),
            Self::Service => write!(f, "service"),
            Self::Secret => write!(f, "secret"),
            Self::Certificate => write!(f, "certificate"),
            Self::RoutingEndpoint => write!(f, "routing_endpoint"),
        }
    }
}

/// Network consumption declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectDecl {
    /// Node this runtime reaches
    pub to: String,

    /// Port: number, "lo-hi", "any", or a `{{node.attr}}` reference.
    /// Defaults to the target kind's service port from settings.
    #[serde(default)]
    pub port: Option<PortSpec>,
}

/// Secret-field reference (credential consumption).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretRef {
    /// Node owning the secret
    pub from: String,

    /// Field selector inside the secret ("*" for the whole secret)
    pub field: String,
}

/// Mount consumption declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MountDecl {
    /// Shared storage node
    pub storage: String,

    /// Absolute mount path inside the consumer
    pub path: String,

    #[serde(default)]
    pub read_only: bool,
}

/// Raw port value as written in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Text(String),
}

// ============================================================================
// Explicit edges (as declared)
// ============================================================================

/// An explicitly declared access edge. Scope fields that do not apply to
/// the channel must be omitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EdgeDecl {
    pub from: String,
    pub to: String,
    pub channel: Channel,

    /// Network: port scope (defaults to "any")
    #[serde(default)]
    pub port: Option<PortSpec>,

    /// Network: source scope (defaults to "peer")
    #[serde(default)]
    pub source: Option<SourceScope>,

    /// Credential: secret field (defaults to "*")
    #[serde(default)]
    pub field: Option<String>,

    /// Mount: path
    #[serde(default)]
    pub path: Option<String>,

    /// Mount: read-only flag
    #[serde(default)]
    pub read_only: Option<bool>,

    /// Override the channel's default direction
    #[serde(default)]
    pub direction: Option<Direction>,
}

// ============================================================================
// Access edges (typed)
// ============================================================================

/// Access channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Network,
    Credential,
    Mount,
}

impl Channel {
    /// Which side of the edge carries the rule.
    pub fn default_direction(&self) -> Direction {
        match self {
            Self::Network | Self::Mount => Direction::Ingress,
            Self::Credential => Direction::Egress,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Credential => write!(f, "credential"),
            Self::Mount => write!(f, "mount"),
        }
    }
}

/// Rule placement: ingress rules live on `to`, egress grants on `from`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// Lazy pointer to another node's attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrRef {
    pub node: String,
    pub attribute: String,
}

impl AttrRef {
    pub fn new(node: &str, attribute: &str) -> Self {
        Self {
            node: node.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attribute)
    }
}

/// Port scope of a network edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortScope {
    Range { from: u16, to: u16 },
    Deferred(AttrRef),
    Any,
}

impl PortScope {
    pub fn single(port: u16) -> Self {
        Self::Range {
            from: port,
            to: port,
        }
    }

    pub fn covers(&self, other: &PortScope) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (_, Self::Any) => false,
            (Self::Range { from: a, to: b }, Self::Range { from: c, to: d }) => a <= c && d <= b,
            (Self::Deferred(x), Self::Deferred(y)) => x == y,
            _ => false,
        }
    }
}

impl fmt::Display for PortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { from, to } if from == to => write!(f, "port {}", from),
            Self::Range { from, to } => write!(f, "ports {}-{}", from, to),
            Self::Deferred(r) => write!(f, "port {{{{{}}}}}", r),
            Self::Any => write!(f, "any port"),
        }
    }
}

/// Source scope of a network edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    /// The consumer's own security boundary
    Peer,
    /// Any IPv4 source
    Any,
}

/// Secret field selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScope {
    Field(String),
    All,
}

impl FieldScope {
    pub fn parse(selector: &str) -> Self {
        if selector == "*" {
            Self::All
        } else {
            Self::Field(selector.to_string())
        }
    }
}

/// Channel-specific scope of an access edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Scope {
    Network {
        ports: PortScope,
        source: SourceScope,
    },
    Credential {
        field: FieldScope,
    },
    Mount {
        path: String,
        read_only: bool,
    },
}

impl Scope {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Network { .. } => Channel::Network,
            Self::Credential { .. } => Channel::Credential,
            Self::Mount { .. } => Channel::Mount,
        }
    }

    /// True when every access `other` grants is also granted by `self`.
    pub fn covers(&self, other: &Scope) -> bool {
        match (self, other) {
            (
                Self::Network { ports, source },
                Self::Network {
                    ports: other_ports,
                    source: other_source,
                },
            ) => {
                let source_ok = *source == SourceScope::Any || source == other_source;
                source_ok && ports.covers(other_ports)
            }
            (Self::Credential { field }, Self::Credential { field: other_field }) => {
                *field == FieldScope::All || field == other_field
            }
            (
                Self::Mount { path, read_only },
                Self::Mount {
                    path: other_path,
                    read_only: other_ro,
                },
            ) => {
                let mode_ok = !*read_only || *other_ro;
                mode_ok && path_contains(path, other_path)
            }
            _ => false,
        }
    }

    /// Network scope that admits any source.
    pub fn is_unscoped_ingress(&self) -> bool {
        matches!(
            self,
            Self::Network {
                source: SourceScope::Any,
                ..
            }
        )
    }
}

fn path_contains(base: &str, path: &str) -> bool {
    let base = base.trim_end_matches('/');
    path == base || base.is_empty() || path.starts_with(&format!("{}/", base))
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { ports, source } => {
                let src = match source {
                    SourceScope::Peer => "peer",
                    SourceScope::Any => "0.0.0.0/0",
                };
                write!(f, "{} from {}", ports, src)
            }
            Self::Credential {
                field: FieldScope::All,
            } => write!(f, "all fields"),
            Self::Credential {
                field: FieldScope::Field(name),
            } => write!(f, "field {}", name),
            Self::Mount { path, read_only } => {
                write!(f, "{} ({})", path, if *read_only { "ro" } else { "rw" })
            }
        }
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum EdgeOrigin {
    Explicit,
    /// Synthesized from a consumption, described by `consumption`
    Synthesized {
        consumption: String,
    },
}

/// A directed "from must be granted access to to" relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessEdge {
    pub from: String,
    pub to: String,
    pub channel: Channel,
    pub scope: Scope,
    pub direction: Direction,
    pub origin: EdgeOrigin,
}

impl AccessEdge {
    /// Dedupe key: origin does not participate.
    pub fn key(&self) -> (String, String, Channel, Scope) {
        (
            self.from.clone(),
            self.to.clone(),
            self.channel,
            self.scope.clone(),
        )
    }

    pub fn is_explicit(&self) -> bool {
        self.origin == EdgeOrigin::Explicit
    }
}

impl fmt::Display for AccessEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{} {}: {}]",
            self.from, self.to, self.channel, self.direction, self.scope
        )
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Compilation and execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Failure handling during materialization
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Explicit vs synthesized edge conflicts
    #[serde(default)]
    pub conflict: ConflictPolicy,

    /// Synthesize access edges from consumption declarations
    #[serde(default = "default_true")]
    pub auto_wire: bool,

    /// Maximum concurrent materializations (0 = unbounded)
    #[serde(default)]
    pub max_parallel: usize,

    /// Append provenance events to the JSONL log
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Persist the state lock after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            conflict: ConflictPolicy::default(),
            auto_wire: true,
            max_parallel: 0,
            event_log: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop scheduling every new node after the first failure
    StopOnFirst,
    /// Block only the failed node's downstream closure
    #[default]
    ContinueIndependent,
}

/// What to do when an explicit edge shadows a synthesized one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Explicit wins; the suppression is reported as a finding
    #[default]
    Flag,
    /// Explicit wins silently
    PreferExplicit,
    /// Differing scopes are a ConflictingEdgeError
    Fail,
}

// ============================================================================
// Wiring findings
// ============================================================================

/// Non-fatal wiring observation surfaced in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum WiringFinding {
    /// A synthesized edge was suppressed by an explicit one
    Suppressed {
        from: String,
        to: String,
        channel: Channel,
        explicit: Scope,
        synthesized: Scope,
        /// Whether the explicit scope still grants what was needed
        explicit_covers: bool,
    },
    /// An explicit network edge admits any source
    UnscopedIngress {
        from: String,
        to: String,
        scope: Scope,
    },
}

impl fmt::Display for WiringFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suppressed {
                from,
                to,
                channel,
                explicit,
                synthesized,
                explicit_covers,
            } => {
                write!(
                    f,
                    "{} -> {} [{}]: explicit '{}' overrides synthesized '{}'",
                    from, to, channel, explicit, synthesized
                )?;
                if !explicit_covers {
                    write!(f, " (explicit scope is narrower than required)")?;
                }
                Ok(())
            }
            Self::UnscopedIngress { from, to, scope } => {
                write!(f, "{} -> {}: unscoped ingress '{}'", from, to, scope)
            }
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned node operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedOp {
    pub node_id: String,
    pub kind: NodeKind,
    pub action: PlanAction,
    /// Materialization layer (destroys count layers in destroy order)
    pub layer: usize,
    pub depends_on: Vec<String>,
    /// BLAKE3 of the declared configuration
    pub hash: String,
    pub description: String,
}

/// Full deployment plan handed to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub name: String,

    /// Parallel-eligible layers, dependencies first
    pub layers: Vec<Vec<String>>,

    /// Materialization operations in linear order
    pub operations: Vec<PlannedOp>,

    /// Nodes recorded in the lock but no longer declared, dependents first
    pub destroys: Vec<PlannedOp>,

    /// Final merged access edge set
    pub edges: Vec<AccessEdge>,

    pub findings: Vec<WiringFinding>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl DeploymentPlan {
    pub fn operation(&self, node_id: &str) -> Option<&PlannedOp> {
        self.operations.iter().find(|op| op.node_id == node_id)
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,
    pub stack: String,
    pub generated_at: String,
    pub generator: String,
    pub nodes: IndexMap<String, NodeLock>,
}

/// Per-node lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLock {
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub hash: String,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Deferred attribute values produced by provisioning
    #[serde(default)]
    pub outputs: IndexMap<String, String>,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// Node materialization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Materialized,
    Failed,
    Blocked,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized => write!(f, "MATERIALIZED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Blocked => write!(f, "BLOCKED"),
        }
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        provisioner: String,
        stackwire_version: String,
    },
    WiringFinding {
        stack: String,
        detail: String,
    },
    NodeStarted {
        stack: String,
        node: String,
        action: String,
    },
    NodeMaterialized {
        stack: String,
        node: String,
        duration_seconds: f64,
        hash: String,
    },
    NodeFailed {
        stack: String,
        node: String,
        error: String,
    },
    NodeBlocked {
        stack: String,
        node: String,
        blocked_by: Vec<String>,
    },
    EdgeGranted {
        stack: String,
        edge: String,
    },
    EdgeFailed {
        stack: String,
        edge: String,
        error: String,
    },
    NodeDestroyed {
        stack: String,
        node: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        nodes_materialized: u32,
        nodes_unchanged: u32,
        nodes_failed: u32,
        nodes_blocked: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sw001_config_parse() {
        let yaml = r#"
version: "1.0"
name: shop
settings:
  region: eu-west-1
  values:
    db_name: orders
nodes:
  net:
    kind: network
    attributes:
      cidr: 10.0.0.0/16
  db:
    kind: datastore
    attributes:
      engine: postgres
      network: "{{net.vpc_id}}"
edges:
  - from: app
    to: db
    channel: network
    port: any
    source: any
policy:
  conflict: fail
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes["db"].kind, NodeKind::Datastore);
        assert_eq!(config.settings.region, "eu-west-1");
        assert_eq!(config.edges[0].source, Some(SourceScope::Any));
        assert_eq!(config.edges[0].port, Some(PortSpec::Text("any".into())));
        assert_eq!(config.policy.conflict, ConflictPolicy::Fail);
    }

    #[test]
    fn test_sw001_settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.region, "us-east-1");
        assert_eq!(s.service_port(&NodeKind::Datastore), Some(5432));
        assert_eq!(s.service_port(&NodeKind::Storage), Some(2049));
        assert_eq!(s.service_port(&NodeKind::Secret), None);
    }

    #[test]
    fn test_sw001_settings_lookup() {
        let mut s = Settings::default();
        s.values.insert(
            "replicas".to_string(),
            serde_yaml_ng::Value::Number(serde_yaml_ng::Number::from(3u64)),
        );
        assert_eq!(s.lookup("region").as_deref(), Some("us-east-1"));
        assert_eq!(s.lookup("replicas").as_deref(), Some("3"));
        assert_eq!(s.lookup("values.replicas").as_deref(), Some("3"));
        assert_eq!(s.lookup("service_ports.datastore").as_deref(), Some("5432"));
        assert!(s.lookup("missing").is_none());
    }

    #[test]
    fn test_sw001_policy_defaults() {
        let p = Policy::default();
        assert_eq!(p.failure, FailurePolicy::ContinueIndependent);
        assert_eq!(p.conflict, ConflictPolicy::Flag);
        assert!(p.auto_wire);
        assert_eq!(p.max_parallel, 0);
    }

    #[test]
    fn test_sw001_kind_display() {
        assert_eq!(NodeKind::ComputeCluster.to_string(), "compute_cluster");
        assert_eq!(NodeKind::RoutingEndpoint.to_string(), "routing_endpoint");
        let parsed: NodeKind = serde_yaml_ng::from_str("task_spec").unwrap();
        assert_eq!(parsed, NodeKind::TaskSpec);
    }

    #[test]
    fn test_sw001_port_scope_covers() {
        assert!(PortScope::Any.covers(&PortScope::single(5432)));
        assert!(!PortScope::single(5432).covers(&PortScope::Any));
        let range = PortScope::Range {
            from: 8000,
            to: 8100,
        };
        assert!(range.covers(&PortScope::single(8080)));
        assert!(!range.covers(&PortScope::single(9000)));
        let deferred = PortScope::Deferred(AttrRef::new("db", "port"));
        assert!(deferred.covers(&deferred.clone()));
        assert!(!range.covers(&deferred));
    }

    #[test]
    fn test_sw001_scope_covers_source() {
        let broad = Scope::Network {
            ports: PortScope::Any,
            source: SourceScope::Any,
        };
        let narrow = Scope::Network {
            ports: PortScope::single(5432),
            source: SourceScope::Peer,
        };
        assert!(broad.covers(&narrow));
        assert!(!narrow.covers(&broad));
        assert!(broad.is_unscoped_ingress());
        assert!(!narrow.is_unscoped_ingress());
    }

    #[test]
    fn test_sw001_scope_covers_credential_and_mount() {
        let all = Scope::Credential {
            field: FieldScope::All,
        };
        let user = Scope::Credential {
            field: FieldScope::parse("username"),
        };
        assert!(all.covers(&user));
        assert!(!user.covers(&all));

        let rw = Scope::Mount {
            path: "/data".into(),
            read_only: false,
        };
        let ro_sub = Scope::Mount {
            path: "/data/uploads".into(),
            read_only: true,
        };
        assert!(rw.covers(&ro_sub));
        assert!(!ro_sub.covers(&rw));
        let sibling = Scope::Mount {
            path: "/database".into(),
            read_only: true,
        };
        assert!(!rw.covers(&sibling));
        assert!(!rw.covers(&user));
    }

    #[test]
    fn test_sw001_scope_display() {
        let s = Scope::Network {
            ports: PortScope::single(5432),
            source: SourceScope::Peer,
        };
        assert_eq!(s.to_string(), "port 5432 from peer");
        let d = Scope::Network {
            ports: PortScope::Deferred(AttrRef::new("db", "port")),
            source: SourceScope::Peer,
        };
        assert_eq!(d.to_string(), "port {{db.port}} from peer");
    }

    #[test]
    fn test_sw001_channel_direction() {
        assert_eq!(Channel::Network.default_direction(), Direction::Ingress);
        assert_eq!(Channel::Mount.default_direction(), Direction::Ingress);
        assert_eq!(Channel::Credential.default_direction(), Direction::Egress);
    }

    #[test]
    fn test_sw001_edge_key_ignores_origin() {
        let scope = Scope::Credential {
            field: FieldScope::parse("username"),
        };
        let a = AccessEdge {
            from: "app".into(),
            to: "db".into(),
            channel: Channel::Credential,
            scope: scope.clone(),
            direction: Direction::Egress,
            origin: EdgeOrigin::Explicit,
        };
        let b = AccessEdge {
            origin: EdgeOrigin::Synthesized {
                consumption: "app.secrets.DB_USER".into(),
            },
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
        assert!(a.is_explicit());
        assert!(!b.is_explicit());
    }

    #[test]
    fn test_sw001_provenance_event_serde() {
        let event = ProvenanceEvent::NodeBlocked {
            stack: "shop".to_string(),
            node: "app".to_string(),
            blocked_by: vec!["db".to_string()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"node_blocked\""));
        assert!(json.contains("\"blocked_by\":[\"db\"]"));
    }

    #[test]
    fn test_sw001_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
