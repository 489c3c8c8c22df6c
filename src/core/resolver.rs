//! SW-005: Template scanning and attribute reference resolution.
//!
//! Scans `{{node.attr}}` and `{{settings.key}}` templates at declaration time
//! (so the graph builder can derive materialization edges) and resolves them
//! at materialization time against declared immediates, the settings object,
//! and the deferred store. Resolution is total: a reference with no value is
//! an `UnresolvedAttribute` error.

use super::deferred::DeferredStore;
use super::error::StackError;
use super::graph::Graph;
use super::types::*;
use crate::kinds;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A parsed `{{...}}` template key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKey {
    Setting(String),
    Attr(AttrRef),
}

fn parse_key(key: &str) -> Result<TemplateKey, String> {
    if let Some(setting) = key.strip_prefix("settings.") {
        if setting.is_empty() {
            return Err("empty settings key".to_string());
        }
        return Ok(TemplateKey::Setting(setting.to_string()));
    }
    let mut parts = key.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(node), Some(attr)) if !node.is_empty() && !attr.is_empty() => {
            Ok(TemplateKey::Attr(AttrRef::new(node, attr)))
        }
        _ => Err(format!("invalid reference '{}' (expected node.attribute)", key)),
    }
}

/// Find every template key in a string, in order of appearance.
pub fn scan_template(template: &str) -> Result<Vec<TemplateKey>, String> {
    let mut keys = Vec::new();
    let mut start = 0;

    while let Some(open) = template[start..].find("{{") {
        let open = start + open;
        let close = template[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        keys.push(parse_key(template[open + 2..close - 2].trim())?);
        start = close;
    }

    Ok(keys)
}

/// Replace every template key in a string using `lookup`.
pub fn resolve_template<F>(template: &str, lookup: &mut F) -> Result<String, StackError>
where
    F: FnMut(&TemplateKey) -> Result<String, StackError>,
{
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| StackError::invalid(format!("unclosed template at position {}", open)))?;
        let close = open + close + 2;
        let key = parse_key(result[open + 2..close - 2].trim()).map_err(StackError::invalid)?;
        let value = lookup(&key)?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Mount binding registered on a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountBinding {
    pub storage: String,
    pub filesystem_id: String,
    pub path: String,
    pub read_only: bool,
}

/// A node's configuration with every reference substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub attributes: IndexMap<String, String>,
    pub environment: IndexMap<String, String>,
    /// Env var → secret value reference (`<arn>:<field>::`)
    pub secrets: IndexMap<String, String>,
    pub mounts: Vec<MountBinding>,
}

/// Resolves references against one graph and its deferred store.
pub struct Resolver<'a> {
    graph: &'a Graph,
    store: &'a DeferredStore,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a Graph, store: &'a DeferredStore) -> Self {
        Self { graph, store }
    }

    /// Value of one attribute: declared immediate first, then the deferred slot.
    pub fn attribute(&self, r: &AttrRef) -> Result<String, StackError> {
        let node = self
            .graph
            .node(&r.node)
            .ok_or_else(|| StackError::UnknownReference {
                referrer: r.node.clone(),
                node: r.node.clone(),
                attribute: Some(r.attribute.clone()),
            })?;
        if let Some(raw) = node.attributes.get(&r.attribute) {
            return self.template(raw);
        }
        self.store.get(&r.node, &r.attribute).map(str::to_string)
    }

    /// Resolve a template string.
    pub fn template(&self, raw: &str) -> Result<String, StackError> {
        resolve_template(raw, &mut |key| match key {
            TemplateKey::Setting(k) => self
                .graph
                .settings
                .lookup(k)
                .ok_or_else(|| StackError::invalid(format!("unknown setting '{}'", k))),
            TemplateKey::Attr(r) => self.attribute(r),
        })
    }

    /// Resolve a node's full configuration, collecting every failure.
    pub fn node(&self, id: &str) -> Result<ResolvedConfig, Vec<StackError>> {
        let node = match self.graph.node(id) {
            Some(n) => n,
            None => {
                return Err(vec![StackError::UnknownReference {
                    referrer: id.to_string(),
                    node: id.to_string(),
                    attribute: None,
                }])
            }
        };

        let mut errors: Vec<StackError> = Vec::new();
        let record = |e: StackError, errors: &mut Vec<StackError>| {
            if !errors.contains(&e) {
                errors.push(e);
            }
        };
        let mut config = ResolvedConfig::default();

        for (name, raw) in &node.attributes {
            match self.template(raw) {
                Ok(v) => {
                    config.attributes.insert(name.clone(), v);
                }
                Err(e) => record(e, &mut errors),
            }
        }

        for (name, raw) in &node.decl.environment {
            match self.template(raw) {
                Ok(v) => {
                    config.environment.insert(name.clone(), v);
                }
                Err(e) => record(e, &mut errors),
            }
        }

        for (env, secret) in &node.decl.secrets {
            match self.attribute(&AttrRef::new(&secret.from, kinds::SECRET_ATTR)) {
                Ok(arn) => {
                    let value = match FieldScope::parse(&secret.field) {
                        FieldScope::All => arn,
                        FieldScope::Field(field) => format!("{}:{}::", arn, field),
                    };
                    config.secrets.insert(env.clone(), value);
                }
                Err(e) => record(e, &mut errors),
            }
        }

        for mount in &node.decl.mounts {
            match self.attribute(&AttrRef::new(&mount.storage, kinds::FILESYSTEM_ATTR)) {
                Ok(filesystem_id) => config.mounts.push(MountBinding {
                    storage: mount.storage.clone(),
                    filesystem_id,
                    path: mount.path.clone(),
                    read_only: mount.read_only,
                }),
                Err(e) => record(e, &mut errors),
            }
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }

    /// Substitute a deferred port in an edge scope.
    pub fn scope(&self, scope: &Scope) -> Result<Scope, StackError> {
        match scope {
            Scope::Network {
                ports: PortScope::Deferred(r),
                source,
            } => {
                let raw = self.attribute(r)?;
                let port: u16 = raw.trim().parse().map_err(|_| {
                    StackError::invalid(format!("{} resolved to '{}', which is not a port", r, raw))
                })?;
                Ok(Scope::Network {
                    ports: PortScope::single(port),
                    source: *source,
                })
            }
            other => Ok(other.clone()),
        }
    }
}
