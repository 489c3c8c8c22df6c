//! SW-003: YAML parsing and document validation.
//!
//! Parses stack.yaml and validates constraints that need no cross-node
//! resolution:
//! - Version must be "1.0"
//! - Node ids are template-safe
//! - Declared attributes are legal inputs of the node's kind
//! - Required inputs are present
//! - Only workload kinds declare environment and consumptions

use super::error::StackError;
use super::types::*;
use crate::kinds;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Parse a stack.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static pattern"))
}

/// True if `id` can be used as a node id.
pub fn is_valid_id(id: &str) -> bool {
    id_pattern().is_match(id)
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<StackError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(StackError::invalid(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(StackError::invalid("name must not be empty"));
    } else if !is_valid_id(&config.name) {
        errors.push(StackError::invalid(format!(
            "stack name '{}' must match [a-z][a-z0-9_-]*",
            config.name
        )));
    }

    for (id, node) in &config.nodes {
        validate_node(id, node, &mut errors);
    }

    errors
}

fn validate_node(id: &str, node: &NodeDecl, errors: &mut Vec<StackError>) {
    if !is_valid_id(id) {
        errors.push(StackError::invalid(format!(
            "node id '{}' must match [a-z][a-z0-9_-]*",
            id
        )));
    }

    let schema = kinds::schema(node.kind);

    for attr in node.attributes.keys() {
        if schema.is_output_only(attr) {
            errors.push(StackError::invalid(format!(
                "node '{}' ({}) declares '{}', which is generated by provisioning",
                id, node.kind, attr
            )));
        } else if !schema.is_input(attr) {
            errors.push(StackError::invalid(format!(
                "node '{}' ({}) has no attribute '{}'",
                id, node.kind, attr
            )));
        }
    }

    for req in schema.required {
        if !node.attributes.contains_key(*req) {
            errors.push(StackError::invalid(format!(
                "node '{}' ({}) is missing required attribute '{}'",
                id, node.kind, req
            )));
        }
    }

    if !schema.runs_workload {
        let declares = [
            ("environment", !node.environment.is_empty()),
            ("connects", !node.connects.is_empty()),
            ("secrets", !node.secrets.is_empty()),
            ("mounts", !node.mounts.is_empty()),
        ];
        for (section, present) in declares {
            if present {
                errors.push(StackError::invalid(format!(
                    "node '{}' ({}) runs no workload and cannot declare {}",
                    id, node.kind, section
                )));
            }
        }
    }

    for (env, secret) in &node.secrets {
        if node.environment.contains_key(env) {
            errors.push(StackError::invalid(format!(
                "node '{}' declares '{}' in both environment and secrets",
                id, env
            )));
        }
        if secret.field.is_empty() {
            errors.push(StackError::invalid(format!(
                "node '{}' secret '{}' has an empty field selector",
                id, env
            )));
        }
    }

    for mount in &node.mounts {
        if !mount.path.starts_with('/') {
            errors.push(StackError::invalid(format!(
                "node '{}' mount path '{}' must be absolute",
                id, mount.path
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(errors: &[StackError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_sw003_parse_valid() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  db:
    kind: datastore
    attributes:
      engine: postgres
  app:
    kind: container
    attributes:
      image: shop:1.0
    environment:
      DB_HOST: "{{db.hostname}}"
    secrets:
      DB_USER: { from: db, field: username }
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.name, "shop");
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_sw003_bad_version() {
        let yaml = r#"
version: "2.0"
name: shop
nodes: {}
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(messages(&errors).iter().any(|m| m.contains("version")));
    }

    #[test]
    fn test_sw003_bad_ids() {
        assert!(is_valid_id("db"));
        assert!(is_valid_id("web-task_2"));
        assert!(!is_valid_id("Db"));
        assert!(!is_valid_id("2db"));
        assert!(!is_valid_id("db.primary"));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn test_sw003_unknown_attribute() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  net:
    kind: network
    attributes:
      colour: blue
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("has no attribute 'colour'")));
    }

    #[test]
    fn test_sw003_output_only_attribute() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  db:
    kind: datastore
    attributes:
      engine: postgres
      hostname: db.example.com
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("generated by provisioning")));
    }

    #[test]
    fn test_sw003_override_attribute_allowed() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  db:
    kind: datastore
    attributes:
      engine: postgres
      port: 6432
"#;
        let config = parse_config(yaml).unwrap();
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_sw003_missing_required() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  web:
    kind: container
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("missing required attribute 'image'")));
    }

    #[test]
    fn test_sw003_non_workload_consumption() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  db:
    kind: datastore
    attributes:
      engine: postgres
    environment:
      X: "1"
    mounts:
      - { storage: fs, path: /data }
"#;
        let config = parse_config(yaml).unwrap();
        let msgs = messages(&validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("cannot declare environment")));
        assert!(msgs.iter().any(|m| m.contains("cannot declare mounts")));
    }

    #[test]
    fn test_sw003_relative_mount_path() {
        let yaml = r#"
version: "1.0"
name: shop
nodes:
  web:
    kind: container
    attributes:
      image: x
    mounts:
      - { storage: fs, path: data }
"#;
        let config = parse_config(yaml).unwrap();
        assert!(messages(&validate_config(&config))
            .iter()
            .any(|m| m.contains("must be absolute")));
    }

    #[test]
    fn test_sw003_collects_every_error() {
        let yaml = r#"
version: "0.9"
name: ""
nodes:
  web:
    kind: container
    attributes:
      colour: red
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(errors.len() >= 4, "got {:?}", messages(&errors));
    }

    #[test]
    fn test_sw003_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
name: file-test
nodes: {}
"#,
        )
        .unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "file-test");
    }

    #[test]
    fn test_sw003_parse_invalid_yaml() {
        let result = parse_config("not: [valid: yaml: {{");
        assert!(result.is_err());
    }
}
