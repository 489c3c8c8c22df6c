//! SW-012: Compute kinds — cluster, task spec, container, service.

use super::KindSchema;
use crate::core::types::NodeKind;
use indexmap::IndexMap;

pub const COMPUTE_CLUSTER: KindSchema = KindSchema {
    kind: NodeKind::ComputeCluster,
    inputs: &["network", "capacity_providers", "container_insights"],
    outputs: &["cluster_arn", "cluster_name"],
    required: &[],
    runs_workload: false,
};

pub const TASK_SPEC: KindSchema = KindSchema {
    kind: NodeKind::TaskSpec,
    inputs: &["family", "cpu", "memory"],
    outputs: &["task_definition_arn", "execution_role_arn", "task_role_arn"],
    required: &[],
    runs_workload: true,
};

pub const CONTAINER: KindSchema = KindSchema {
    kind: NodeKind::Container,
    inputs: &["task", "image", "port", "command", "essential", "log_group"],
    outputs: &["container_name"],
    required: &["image"],
    runs_workload: true,
};

pub const SERVICE: KindSchema = KindSchema {
    kind: NodeKind::Service,
    inputs: &[
        "cluster",
        "task",
        "network",
        "desired_count",
        "health_check_path",
        "public",
    ],
    outputs: &["service_arn", "service_name", "security_group_id"],
    required: &[],
    runs_workload: true,
};

pub fn describe(kind: NodeKind, attrs: &IndexMap<String, String>) -> String {
    match kind {
        NodeKind::ComputeCluster => "create container cluster".to_string(),
        NodeKind::TaskSpec => {
            let cpu = attrs.get("cpu").map(String::as_str).unwrap_or("256");
            let memory = attrs.get("memory").map(String::as_str).unwrap_or("512");
            format!("register task spec ({} cpu, {} MiB)", cpu, memory)
        }
        NodeKind::Container => {
            let image = attrs.get("image").map(String::as_str).unwrap_or("?");
            format!("define container {}", image)
        }
        _ => {
            let count = attrs.get("desired_count").map(String::as_str).unwrap_or("1");
            format!("run service x{}", count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sw012_describe_task_defaults() {
        let attrs = IndexMap::new();
        assert_eq!(
            describe(NodeKind::TaskSpec, &attrs),
            "register task spec (256 cpu, 512 MiB)"
        );
    }

    #[test]
    fn test_sw012_describe_container() {
        let mut attrs = IndexMap::new();
        attrs.insert("image".to_string(), "nginx:1.27".to_string());
        assert_eq!(describe(NodeKind::Container, &attrs), "define container nginx:1.27");
    }

    #[test]
    fn test_sw012_describe_service() {
        let mut attrs = IndexMap::new();
        attrs.insert("desired_count".to_string(), "3".to_string());
        assert_eq!(describe(NodeKind::Service, &attrs), "run service x3");
    }

    #[test]
    fn test_sw012_container_requires_image() {
        assert!(CONTAINER.required.contains(&"image"));
        assert!(SERVICE.has_boundary());
    }
}
