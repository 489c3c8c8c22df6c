//! SW-004: Dependency graph builder.
//!
//! Builds the immutable resource graph from a stack document:
//! - Every `{{node.attr}}` reference from B to A adds the materialization
//!   edge A→B, as do `depends_on` entries and consumption declarations
//! - Consumptions (`connects`, `secrets`, `mounts`) become typed
//!   [`Consumption`] records for the wiring resolver
//! - Explicit edges are converted to typed [`AccessEdge`]s
//!
//! Every structural error (unknown reference, schema violation, cycle) is
//! collected and returned together in one [`ErrorReport`].

use super::error::{ErrorReport, StackError};
use super::parser;
use super::resolver::{scan_template, TemplateKey};
use super::types::*;
use crate::kinds;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// A declared node with its attributes stringified for resolution.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Raw (possibly templated) attribute values
    pub attributes: IndexMap<String, String>,
    /// Every deferred or immediate attribute this node reads
    pub references: BTreeSet<AttrRef>,
    /// The declaration as written, for hashing and display
    pub decl: NodeDecl,
}

/// A consumer's need for access to a target over one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub consumer: String,
    pub target: String,
    pub channel: Channel,
    /// Minimal scope the consumer needs
    pub scope: Scope,
    /// Where it was declared, e.g. `app.secrets.DB_USER`
    pub label: String,
}

/// The validated resource graph. Immutable once built.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub settings: Settings,
    pub policy: Policy,
    nodes: BTreeMap<String, Node>,
    /// node → nodes it must wait for
    dependencies: BTreeMap<String, BTreeSet<String>>,
    explicit_edges: Vec<AccessEdge>,
    consumptions: Vec<Consumption>,
}

impl Graph {
    /// Validate a stack document and build its graph.
    pub fn build(config: &StackConfig) -> Result<Self, ErrorReport> {
        let mut errors = parser::validate_config(config);
        let mut nodes = BTreeMap::new();
        let mut consumptions = Vec::new();

        for (id, decl) in &config.nodes {
            let mut references = BTreeSet::new();
            let mut attributes = IndexMap::new();

            for (name, value) in &decl.attributes {
                let raw = attribute_string(value);
                collect_template_refs(id, &raw, &config.settings, &mut references, &mut errors);
                attributes.insert(name.clone(), raw);
            }
            for raw in decl.environment.values() {
                collect_template_refs(id, raw, &config.settings, &mut references, &mut errors);
            }

            collect_consumptions(
                config,
                id,
                decl,
                &mut references,
                &mut consumptions,
                &mut errors,
            );

            nodes.insert(
                id.clone(),
                Node {
                    id: id.clone(),
                    kind: decl.kind,
                    attributes,
                    references,
                    decl: decl.clone(),
                },
            );
        }

        let dependencies = link_dependencies(&nodes, &mut errors);

        let mut explicit_edges = Vec::new();
        for (index, edge) in config.edges.iter().enumerate() {
            match explicit_edge(config, index, edge) {
                Ok(e) => explicit_edges.push(e),
                Err(e) => errors.push(e),
            }
        }

        for members in find_cycles(&dependencies) {
            errors.push(StackError::Cycle { nodes: members });
        }

        if !errors.is_empty() {
            return Err(ErrorReport::new(errors));
        }

        Ok(Self {
            name: config.name.clone(),
            settings: config.settings.clone(),
            policy: config.policy.clone(),
            nodes,
            dependencies,
            explicit_edges,
            consumptions,
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct materialization predecessors of `id`, sorted.
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.dependencies
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The full predecessor map.
    pub fn dependency_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.dependencies
    }

    /// Direct materialization successors of `id`, sorted.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Every node that depends on `id`, directly or transitively.
    pub fn downstream(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = self.dependents(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(&next));
            }
        }
        seen
    }

    pub fn explicit_edges(&self) -> &[AccessEdge] {
        &self.explicit_edges
    }

    pub fn consumptions(&self) -> &[Consumption] {
        &self.consumptions
    }

    /// Number of materialization edges.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }
}

fn attribute_string(value: &serde_yaml_ng::Value) -> String {
    match value {
        serde_yaml_ng::Value::Sequence(_) | serde_yaml_ng::Value::Mapping(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| yaml_value_to_string(value))
        }
        other => yaml_value_to_string(other),
    }
}

fn collect_template_refs(
    id: &str,
    raw: &str,
    settings: &Settings,
    references: &mut BTreeSet<AttrRef>,
    errors: &mut Vec<StackError>,
) {
    let keys = match scan_template(raw) {
        Ok(keys) => keys,
        Err(e) => {
            errors.push(StackError::invalid(format!("node '{}': {}", id, e)));
            return;
        }
    };
    for key in keys {
        match key {
            TemplateKey::Attr(r) => {
                references.insert(r);
            }
            TemplateKey::Setting(k) => {
                if settings.lookup(&k).is_none() {
                    errors.push(StackError::invalid(format!(
                        "node '{}' references unknown setting '{}'",
                        id, k
                    )));
                }
            }
        }
    }
}

/// Parse a port declaration. Template ports are only accepted where
/// `allow_deferred` is set.
fn parse_port(spec: &PortSpec, allow_deferred: bool) -> Result<PortScope, String> {
    let text = match spec {
        PortSpec::Number(n) => return Ok(PortScope::single(*n)),
        PortSpec::Text(t) => t.trim(),
    };

    if text == "any" {
        return Ok(PortScope::Any);
    }
    if let Ok(n) = text.parse::<u16>() {
        return Ok(PortScope::single(n));
    }
    if text.starts_with("{{") && text.ends_with("}}") {
        if !allow_deferred {
            return Err(format!("port '{}' cannot be a reference here", text));
        }
        let keys = scan_template(text)?;
        return match keys.as_slice() {
            [TemplateKey::Attr(r)] => Ok(PortScope::Deferred(r.clone())),
            _ => Err(format!("port '{}' must reference one node attribute", text)),
        };
    }
    if let Some((lo, hi)) = text.split_once('-') {
        let lo: u16 = lo.trim().parse().map_err(|_| format!("invalid port range '{}'", text))?;
        let hi: u16 = hi.trim().parse().map_err(|_| format!("invalid port range '{}'", text))?;
        if lo > hi {
            return Err(format!("port range '{}' is reversed", text));
        }
        return Ok(PortScope::Range { from: lo, to: hi });
    }
    Err(format!("invalid port '{}'", text))
}

fn collect_consumptions(
    config: &StackConfig,
    id: &str,
    decl: &NodeDecl,
    references: &mut BTreeSet<AttrRef>,
    consumptions: &mut Vec<Consumption>,
    errors: &mut Vec<StackError>,
) {
    for connect in &decl.connects {
        let target = match config.nodes.get(&connect.to) {
            Some(t) => t,
            None => {
                references.insert(AttrRef::new(&connect.to, kinds::SECURITY_GROUP_ATTR));
                continue;
            }
        };
        if !kinds::schema(target.kind).has_boundary() {
            errors.push(StackError::invalid(format!(
                "node '{}' connects to '{}' ({}), which has no network boundary",
                id, connect.to, target.kind
            )));
            continue;
        }
        let ports = match &connect.port {
            Some(spec) => parse_port(spec, true),
            None => config
                .settings
                .service_port(&target.kind)
                .map(PortScope::single)
                .ok_or_else(|| format!("no service port configured for kind {}", target.kind)),
        };
        let ports = match ports {
            Ok(p) => p,
            Err(e) => {
                errors.push(StackError::invalid(format!(
                    "node '{}' connects to '{}': {}",
                    id, connect.to, e
                )));
                continue;
            }
        };
        if let PortScope::Deferred(r) = &ports {
            references.insert(r.clone());
        }
        references.insert(AttrRef::new(&connect.to, kinds::SECURITY_GROUP_ATTR));
        consumptions.push(Consumption {
            consumer: id.to_string(),
            target: connect.to.clone(),
            channel: Channel::Network,
            scope: Scope::Network {
                ports,
                source: SourceScope::Peer,
            },
            label: format!("{}.connects[{}]", id, connect.to),
        });
    }

    for (env, secret) in &decl.secrets {
        match config.nodes.get(&secret.from) {
            Some(owner) if !kinds::schema(owner.kind).owns_secret() => {
                errors.push(StackError::invalid(format!(
                    "node '{}' reads secret '{}' from '{}' ({}), which owns no secret",
                    id, env, secret.from, owner.kind
                )));
                continue;
            }
            Some(_) => consumptions.push(Consumption {
                consumer: id.to_string(),
                target: secret.from.clone(),
                channel: Channel::Credential,
                scope: Scope::Credential {
                    field: FieldScope::parse(&secret.field),
                },
                label: format!("{}.secrets.{}", id, env),
            }),
            None => {}
        }
        references.insert(AttrRef::new(&secret.from, kinds::SECRET_ATTR));
    }

    for mount in &decl.mounts {
        match config.nodes.get(&mount.storage) {
            Some(storage) if !kinds::schema(storage.kind).is_mountable() => {
                errors.push(StackError::invalid(format!(
                    "node '{}' mounts '{}' ({}), which is not shared storage",
                    id, mount.storage, storage.kind
                )));
                continue;
            }
            Some(storage) => {
                let label = format!("{}.mounts[{}]", id, mount.path);
                match config.settings.service_port(&storage.kind) {
                    Some(port) => consumptions.push(Consumption {
                        consumer: id.to_string(),
                        target: mount.storage.clone(),
                        channel: Channel::Network,
                        scope: Scope::Network {
                            ports: PortScope::single(port),
                            source: SourceScope::Peer,
                        },
                        label: label.clone(),
                    }),
                    None => errors.push(StackError::invalid(format!(
                        "node '{}' mounts '{}': no service port configured for kind {}",
                        id, mount.storage, storage.kind
                    ))),
                }
                consumptions.push(Consumption {
                    consumer: id.to_string(),
                    target: mount.storage.clone(),
                    channel: Channel::Mount,
                    scope: Scope::Mount {
                        path: mount.path.clone(),
                        read_only: mount.read_only,
                    },
                    label,
                });
            }
            None => {}
        }
        references.insert(AttrRef::new(&mount.storage, kinds::FILESYSTEM_ATTR));
    }
}

/// Check every reference and turn it into a materialization dependency.
fn link_dependencies(
    nodes: &BTreeMap<String, Node>,
    errors: &mut Vec<StackError>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut dependencies: BTreeMap<String, BTreeSet<String>> = nodes
        .keys()
        .map(|id| (id.clone(), BTreeSet::new()))
        .collect();

    let push = |e: StackError, errors: &mut Vec<StackError>| {
        if !errors.contains(&e) {
            errors.push(e);
        }
    };

    for (id, node) in nodes {
        let mut deps = BTreeSet::new();

        for r in &node.references {
            let target = match nodes.get(&r.node) {
                Some(t) => t,
                None => {
                    push(
                        StackError::UnknownReference {
                            referrer: id.clone(),
                            node: r.node.clone(),
                            attribute: None,
                        },
                        errors,
                    );
                    continue;
                }
            };
            // only declared immediates and kind outputs ever get a value
            let declared = target.attributes.contains_key(&r.attribute);
            if !declared && !kinds::schema(target.kind).is_output(&r.attribute) {
                push(
                    StackError::UnknownReference {
                        referrer: id.clone(),
                        node: r.node.clone(),
                        attribute: Some(r.attribute.clone()),
                    },
                    errors,
                );
                continue;
            }
            if r.node == *id {
                push(
                    StackError::invalid(format!("node '{}' references itself ({})", id, r)),
                    errors,
                );
                continue;
            }
            deps.insert(r.node.clone());
        }

        for dep in &node.decl.depends_on {
            if dep == id {
                push(
                    StackError::invalid(format!("node '{}' depends on itself", id)),
                    errors,
                );
            } else if nodes.contains_key(dep) {
                deps.insert(dep.clone());
            } else {
                push(
                    StackError::UnknownReference {
                        referrer: id.clone(),
                        node: dep.clone(),
                        attribute: None,
                    },
                    errors,
                );
            }
        }

        dependencies.insert(id.clone(), deps);
    }

    dependencies
}

/// Convert an explicit edge declaration to a typed access edge.
fn explicit_edge(
    config: &StackConfig,
    index: usize,
    decl: &EdgeDecl,
) -> Result<AccessEdge, StackError> {
    let context = format!("edge #{} ({} -> {})", index, decl.from, decl.to);

    for (endpoint, other) in [(&decl.from, &decl.to), (&decl.to, &decl.from)] {
        if !config.nodes.contains_key(endpoint) {
            return Err(StackError::UnknownReference {
                referrer: other.clone(),
                node: endpoint.clone(),
                attribute: None,
            });
        }
    }
    if decl.from == decl.to {
        return Err(StackError::invalid(format!("{}: an edge cannot target its own node", context)));
    }

    let target_kind = config.nodes[&decl.to].kind;
    let schema = kinds::schema(target_kind);
    let misplaced = |fields: &[(&str, bool)]| -> Result<(), StackError> {
        for (name, present) in fields {
            if *present {
                return Err(StackError::invalid(format!(
                    "{}: '{}' does not apply to a {} edge",
                    context, name, decl.channel
                )));
            }
        }
        Ok(())
    };

    let scope = match decl.channel {
        Channel::Network => {
            misplaced(&[
                ("field", decl.field.is_some()),
                ("path", decl.path.is_some()),
                ("read_only", decl.read_only.is_some()),
            ])?;
            if !schema.has_boundary() {
                return Err(StackError::invalid(format!(
                    "{}: '{}' ({}) has no network boundary",
                    context, decl.to, target_kind
                )));
            }
            let ports = match &decl.port {
                Some(spec) => parse_port(spec, false)
                    .map_err(|e| StackError::invalid(format!("{}: {}", context, e)))?,
                None => PortScope::Any,
            };
            Scope::Network {
                ports,
                source: decl.source.unwrap_or(SourceScope::Peer),
            }
        }
        Channel::Credential => {
            misplaced(&[
                ("port", decl.port.is_some()),
                ("source", decl.source.is_some()),
                ("path", decl.path.is_some()),
                ("read_only", decl.read_only.is_some()),
            ])?;
            if !schema.owns_secret() {
                return Err(StackError::invalid(format!(
                    "{}: '{}' ({}) owns no secret",
                    context, decl.to, target_kind
                )));
            }
            Scope::Credential {
                field: FieldScope::parse(decl.field.as_deref().unwrap_or("*")),
            }
        }
        Channel::Mount => {
            misplaced(&[
                ("port", decl.port.is_some()),
                ("source", decl.source.is_some()),
                ("field", decl.field.is_some()),
            ])?;
            if !schema.is_mountable() {
                return Err(StackError::invalid(format!(
                    "{}: '{}' ({}) is not shared storage",
                    context, decl.to, target_kind
                )));
            }
            let path = decl
                .path
                .clone()
                .ok_or_else(|| StackError::invalid(format!("{}: mount edge needs a path", context)))?;
            if !path.starts_with('/') {
                return Err(StackError::invalid(format!(
                    "{}: mount path '{}' must be absolute",
                    context, path
                )));
            }
            Scope::Mount {
                path,
                read_only: decl.read_only.unwrap_or(false),
            }
        }
    };

    Ok(AccessEdge {
        from: decl.from.clone(),
        to: decl.to.clone(),
        channel: decl.channel,
        scope,
        direction: decl.direction.unwrap_or(decl.channel.default_direction()),
        origin: EdgeOrigin::Explicit,
    })
}

/// Strongly connected components of size ≥ 2, each sorted, in sorted order.
/// Tarjan's algorithm, so every member of a cycle is named.
pub fn find_cycles(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    let mut tarjan = Tarjan {
        dependencies,
        next_index: 0,
        indices: HashMap::new(),
        lowlink: HashMap::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
        components: Vec::new(),
    };
    for id in dependencies.keys() {
        if !tarjan.indices.contains_key(id.as_str()) {
            tarjan.visit(id);
        }
    }
    let mut components = tarjan.components;
    components.sort();
    components
}

struct Tarjan<'a> {
    dependencies: &'a BTreeMap<String, BTreeSet<String>>,
    next_index: usize,
    indices: HashMap<&'a str, usize>,
    lowlink: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: HashSet<&'a str>,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn successors(&self, v: &str) -> Vec<&'a str> {
        let dependencies: &'a BTreeMap<String, BTreeSet<String>> = self.dependencies;
        dependencies
            .get(v)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    fn open(&mut self, v: &'a str) {
        self.indices.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);
    }

    fn lower(&mut self, v: &'a str, candidate: usize) {
        let low = self.lowlink[v].min(candidate);
        self.lowlink.insert(v, low);
    }

    /// Iterative depth-first search; long dependency chains do not grow the
    /// call stack.
    fn visit(&mut self, root: &'a str) {
        self.open(root);
        let mut frames: Vec<(&'a str, Vec<&'a str>, usize)> =
            vec![(root, self.successors(root), 0)];

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(&w) = frame.1.get(frame.2) {
                frame.2 += 1;
                if !self.indices.contains_key(w) {
                    self.open(w);
                    let next = self.successors(w);
                    frames.push((w, next, 0));
                } else if self.on_stack.contains(w) {
                    let index = self.indices[w];
                    self.lower(v, index);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _, _)) = frames.last() {
                let low = self.lowlink[v];
                self.lower(parent, low);
            }
            self.close(v);
        }
    }

    /// Pop the component rooted at `v`, if `v` is a root.
    fn close(&mut self, v: &'a str) {
        if self.lowlink[v] != self.indices[v] {
            return;
        }
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack.remove(w);
            component.push(w.to_string());
            if w == v {
                break;
            }
        }
        if component.len() > 1 {
            component.sort();
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    fn build(yaml: &str) -> Result<Graph, ErrorReport> {
        Graph::build(&parse_config(yaml).unwrap())
    }

    #[test]
    fn test_sw004_reference_creates_dependency() {
        let g = build(
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
    environment:
      DB_HOST: "{{db.hostname}}"
"#,
        )
        .unwrap();
        assert_eq!(g.dependencies("app"), vec!["db"]);
        assert!(g.dependencies("db").is_empty());
        assert_eq!(g.dependents("db"), vec!["app"]);
        assert!(g.node("app").unwrap().references.contains(&AttrRef::new("db", "hostname")));
    }

    #[test]
    fn test_sw004_secret_consumption() {
        let g = build(
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
    secrets:
      DB_USER: { from: db, field: username }
"#,
        )
        .unwrap();
        assert_eq!(g.dependencies("app"), vec!["db"]);
        assert_eq!(g.consumptions().len(), 1);
        let c = &g.consumptions()[0];
        assert_eq!(c.channel, Channel::Credential);
        assert_eq!(c.label, "app.secrets.DB_USER");
        assert_eq!(
            c.scope,
            Scope::Credential {
                field: FieldScope::Field("username".into())
            }
        );
    }

    #[test]
    fn test_sw004_connect_default_and_deferred_port() {
        let g = build(
            r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  web:
    kind: service
  app:
    kind: container
    attributes: { image: app }
    connects:
      - to: db
      - to: web
        port: "{{db.port}}"
      - to: web
        port: 8000-8100
"#,
        )
        .unwrap();
        let scopes: Vec<_> = g.consumptions().iter().map(|c| c.scope.clone()).collect();
        assert_eq!(
            scopes,
            vec![
                Scope::Network {
                    ports: PortScope::single(5432),
                    source: SourceScope::Peer
                },
                Scope::Network {
                    ports: PortScope::Deferred(AttrRef::new("db", "port")),
                    source: SourceScope::Peer
                },
                Scope::Network {
                    ports: PortScope::Range { from: 8000, to: 8100 },
                    source: SourceScope::Peer
                },
            ]
        );
        assert_eq!(g.dependencies("app"), vec!["db", "web"]);
    }

    #[test]
    fn test_sw004_mount_yields_network_and_mount() {
        let g = build(
            r#"
version: "1.0"
name: t
nodes:
  fs:
    kind: storage
  app:
    kind: container
    attributes: { image: app }
    mounts:
      - { storage: fs, path: /data, read_only: true }
"#,
        )
        .unwrap();
        let channels: Vec<_> = g.consumptions().iter().map(|c| c.channel).collect();
        assert_eq!(channels, vec![Channel::Network, Channel::Mount]);
        assert_eq!(
            g.consumptions()[0].scope,
            Scope::Network {
                ports: PortScope::single(2049),
                source: SourceScope::Peer
            }
        );
    }

    #[test]
    fn test_sw004_unknown_references_all_reported() {
        let err = build(
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
    depends_on: [cache]
    environment:
      A: "{{dbx.hostname}}"
      B: "{{db.hostnme}}"
"#,
        )
        .unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.contains(|e| matches!(e, StackError::UnknownReference { node, attribute: None, .. } if node == "dbx")));
        assert!(err.contains(|e| matches!(e, StackError::UnknownReference { node, attribute: None, .. } if node == "cache")));
        assert!(err.contains(|e| matches!(e, StackError::UnknownReference { attribute: Some(a), .. } if a == "hostnme")));
    }

    #[test]
    fn test_sw004_undeclared_input_is_unknown() {
        let yaml = |db_attrs: &str| {
            format!(
                r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: {{ {} }}
  app:
    kind: container
    attributes: {{ image: app }}
    environment:
      V: "{{{{db.engine_version}}}}"
"#,
                db_attrs
            )
        };

        let err = build(&yaml("engine: postgres")).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.contains(|e| matches!(
            e,
            StackError::UnknownReference { referrer, node, attribute: Some(a) }
                if referrer == "app" && node == "db" && a == "engine_version"
        )));

        let g = build(&yaml("engine: postgres, engine_version: \"16\"")).unwrap();
        assert_eq!(g.dependencies("app"), vec!["db"]);
    }

    #[test]
    fn test_sw004_cycle_after_long_chain() {
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let n = 50_000;
        for i in 0..n {
            let next = format!("n{:05}", (i + 1) % n);
            deps.insert(format!("n{:05}", i), [next].into_iter().collect());
        }
        let cycles = find_cycles(&deps);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), n);

        deps.insert("n00000".into(), BTreeSet::new());
        assert!(find_cycles(&deps).is_empty());
    }

    #[test]
    fn test_sw004_cycle_names_every_member() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  a:
    kind: container
    attributes: { image: "{{c.container_name}}" }
  b:
    kind: container
    attributes: { image: "{{a.container_name}}" }
  c:
    kind: container
    attributes: { image: "{{b.container_name}}" }
  d:
    kind: container
    attributes: { image: "{{a.container_name}}" }
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.cycles(),
            vec![&["a".to_string(), "b".to_string(), "c".to_string()][..]]
        );
    }

    #[test]
    fn test_sw004_two_cycles_reported() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  a: { kind: network, depends_on: [b] }
  b: { kind: network, depends_on: [a] }
  x: { kind: network, depends_on: [y] }
  y: { kind: network, depends_on: [x] }
"#,
        )
        .unwrap_err();
        assert_eq!(err.cycles().len(), 2);
    }

    #[test]
    fn test_sw004_self_reference_invalid() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  app:
    kind: container
    attributes:
      image: app
      command: "{{app.container_name}}"
"#,
        )
        .unwrap_err();
        assert!(err.contains(|e| e.to_string().contains("references itself")));
        assert!(err.cycles().is_empty());
    }

    #[test]
    fn test_sw004_capability_checks() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  net: { kind: network }
  cert:
    kind: certificate
    attributes: { domain_name: example.com }
  app:
    kind: container
    attributes: { image: app }
    connects: [{ to: cert }]
    secrets:
      X: { from: net, field: a }
    mounts:
      - { storage: net, path: /data }
"#,
        )
        .unwrap_err();
        assert!(err.contains(|e| e.to_string().contains("no network boundary")));
        assert!(err.contains(|e| e.to_string().contains("owns no secret")));
        assert!(err.contains(|e| e.to_string().contains("not shared storage")));
    }

    #[test]
    fn test_sw004_explicit_edge_defaults() {
        let g = build(
            r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  worker:
    kind: container
    attributes: { image: w }
edges:
  - { from: worker, to: db, channel: network }
  - { from: worker, to: db, channel: credential }
"#,
        )
        .unwrap();
        let edges = g.explicit_edges();
        assert_eq!(
            edges[0].scope,
            Scope::Network {
                ports: PortScope::Any,
                source: SourceScope::Peer
            }
        );
        assert_eq!(edges[0].direction, Direction::Ingress);
        assert_eq!(
            edges[1].scope,
            Scope::Credential {
                field: FieldScope::All
            }
        );
        assert_eq!(edges[1].direction, Direction::Egress);
        // explicit edges add no materialization order
        assert!(g.dependencies("worker").is_empty());
    }

    #[test]
    fn test_sw004_explicit_edge_errors() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  w:
    kind: container
    attributes: { image: w }
edges:
  - { from: w, to: ghost, channel: network }
  - { from: w, to: db, channel: network, field: username }
  - { from: w, to: db, channel: network, port: "{{db.port}}" }
  - { from: w, to: db, channel: mount, path: /x }
"#,
        )
        .unwrap_err();
        assert_eq!(err.len(), 4);
        assert!(err.contains(|e| matches!(e, StackError::UnknownReference { node, .. } if node == "ghost")));
    }

    #[test]
    fn test_sw004_unknown_setting() {
        let err = build(
            r#"
version: "1.0"
name: t
nodes:
  app:
    kind: container
    attributes: { image: "{{settings.registry}}/app" }
"#,
        )
        .unwrap_err();
        assert!(err.contains(|e| e.to_string().contains("unknown setting 'registry'")));
    }

    #[test]
    fn test_sw004_downstream_closure() {
        let g = build(
            r#"
version: "1.0"
name: t
nodes:
  a: { kind: network }
  b: { kind: network, depends_on: [a] }
  c: { kind: network, depends_on: [b] }
  d: { kind: network }
"#,
        )
        .unwrap();
        let down: Vec<_> = g.downstream("a").into_iter().collect();
        assert_eq!(down, vec!["b", "c"]);
        assert!(g.downstream("d").is_empty());
        assert_eq!(g.dependency_count(), 2);
    }

    #[test]
    fn test_sw004_parse_port_forms() {
        assert_eq!(parse_port(&PortSpec::Number(80), false).unwrap(), PortScope::single(80));
        assert_eq!(
            parse_port(&PortSpec::Text("any".into()), false).unwrap(),
            PortScope::Any
        );
        assert_eq!(
            parse_port(&PortSpec::Text("443".into()), false).unwrap(),
            PortScope::single(443)
        );
        assert!(parse_port(&PortSpec::Text("90-80".into()), false).is_err());
        assert!(parse_port(&PortSpec::Text("http".into()), false).is_err());
        assert!(parse_port(&PortSpec::Text("{{db.port}}-1".into()), true).is_err());
    }
}
