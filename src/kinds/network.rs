//! SW-010: Network-facing kinds — VPC, certificate, routing endpoint.

use super::KindSchema;
use crate::core::types::NodeKind;
use indexmap::IndexMap;

pub const NETWORK: KindSchema = KindSchema {
    kind: NodeKind::Network,
    inputs: &["cidr", "max_azs", "nat_gateways"],
    outputs: &["vpc_id", "subnet_ids", "security_group_id"],
    required: &[],
    runs_workload: false,
};

pub const CERTIFICATE: KindSchema = KindSchema {
    kind: NodeKind::Certificate,
    inputs: &["domain_name", "validation", "subject_alternative_names"],
    outputs: &["certificate_arn"],
    required: &["domain_name"],
    runs_workload: false,
};

pub const ROUTING_ENDPOINT: KindSchema = KindSchema {
    kind: NodeKind::RoutingEndpoint,
    inputs: &[
        "network",
        "service",
        "certificate",
        "domain_name",
        "listener_port",
        "target_port",
        "public",
    ],
    outputs: &["arn", "dns_name", "listener_arn", "security_group_id"],
    required: &[],
    runs_workload: false,
};

pub fn describe(kind: NodeKind, attrs: &IndexMap<String, String>) -> String {
    match kind {
        NodeKind::Network => {
            let cidr = attrs.get("cidr").map(String::as_str).unwrap_or("default cidr");
            format!("create network {}", cidr)
        }
        NodeKind::Certificate => {
            let domain = attrs.get("domain_name").map(String::as_str).unwrap_or("?");
            let validation = attrs.get("validation").map(String::as_str).unwrap_or("dns");
            format!("request certificate for {} ({} validation)", domain, validation)
        }
        _ => {
            let port = attrs.get("listener_port").map(String::as_str).unwrap_or("443");
            match attrs.get("domain_name") {
                Some(domain) => format!("create endpoint {} on :{}", domain, port),
                None => format!("create endpoint on :{}", port),
            }
        }
    }
}
