//! SW-013: State lock management — load, save (atomic), path derivation.

use super::types::{NodeLock, NodeStatus, StateLock};
use crate::provenance::eventlog::now_iso8601;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a stack's lock. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    if lock.stack != stack {
        return Err(format!(
            "lock file {} belongs to stack '{}', not '{}'",
            path.display(),
            lock.stack,
            stack
        ));
    }
    Ok(Some(lock))
}

/// Save a lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a new empty lock for a stack.
pub fn new_lock(stack: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("stackwire {}", env!("CARGO_PKG_VERSION")),
        nodes: indexmap::IndexMap::new(),
    }
}

/// Nodes whose last recorded status is materialized.
pub fn materialized(lock: &StateLock) -> impl Iterator<Item = (&String, &NodeLock)> {
    lock.nodes
        .iter()
        .filter(|(_, n)| n.status == NodeStatus::Materialized)
}
