//! SW-011: Data kinds — shared storage, relational datastore, secret.

use super::KindSchema;
use crate::core::types::NodeKind;
use indexmap::IndexMap;

pub const STORAGE: KindSchema = KindSchema {
    kind: NodeKind::Storage,
    inputs: &[
        "network",
        "encrypted",
        "performance_mode",
        "throughput_mode",
        "lifecycle_days",
    ],
    outputs: &["filesystem_id", "arn", "security_group_id"],
    required: &[],
    runs_workload: false,
};

pub const DATASTORE: KindSchema = KindSchema {
    kind: NodeKind::Datastore,
    inputs: &[
        "network",
        "engine",
        "engine_version",
        "instance_class",
        "database_name",
        "allocated_storage",
        "multi_az",
        "port",
    ],
    outputs: &["hostname", "port", "arn", "secret_arn", "security_group_id"],
    required: &["engine"],
    runs_workload: false,
};

pub const SECRET: KindSchema = KindSchema {
    kind: NodeKind::Secret,
    inputs: &["description", "fields", "exclude_characters", "length"],
    outputs: &["secret_arn", "name"],
    required: &[],
    runs_workload: false,
};

pub fn describe(kind: NodeKind, attrs: &IndexMap<String, String>) -> String {
    match kind {
        NodeKind::Storage => {
            let encrypted = attrs.get("encrypted").map(String::as_str) == Some("true");
            if encrypted {
                "create encrypted shared filesystem".to_string()
            } else {
                "create shared filesystem".to_string()
            }
        }
        NodeKind::Datastore => {
            let engine = attrs.get("engine").map(String::as_str).unwrap_or("?");
            match attrs.get("engine_version") {
                Some(v) => format!("create {} {} datastore", engine, v),
                None => format!("create {} datastore", engine),
            }
        }
        _ => match attrs.get("fields") {
            Some(fields) => format!("generate secret ({})", fields),
            None => "generate secret".to_string(),
        },
    }
}
