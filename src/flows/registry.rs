//! Node type registry: one table entry per node type.
//!
//! Each entry declares the configuration keys a node of that type must carry
//! before it counts as complete. Required keys are dotted paths into the
//! node's `config` map and are reported in declaration order.

use serde::Serialize;

use super::model::{NodeConfig, NodeType};

/// Static description of a node type.
#[derive(Debug, Serialize)]
pub struct NodeTypeSpec {
    pub node_type: NodeType,
    pub label: &'static str,
    pub summary: &'static str,
    /// Config paths that must hold a non-blank string.
    pub required_fields: &'static [&'static str],
    /// Config paths the type understands but does not require.
    pub optional_fields: &'static [&'static str],
    pub default_title: &'static str,
}

/// Indexed by `NodeType as usize`; order must match `NodeType::ALL`.
static REGISTRY: [NodeTypeSpec; 9] = [
    NodeTypeSpec {
        node_type: NodeType::Welcome,
        label: "Welcome",
        summary: "Client acknowledges a welcome document",
        required_fields: &["document_file.url"],
        optional_fields: &["document_file.name", "document_file.type"],
        default_title: "Welcome",
    },
    NodeTypeSpec {
        node_type: NodeType::Scope,
        label: "Scope of work",
        summary: "Client reviews the scope document",
        required_fields: &["document_file.url"],
        optional_fields: &["document_file.name", "document_file.type"],
        default_title: "Review scope",
    },
    NodeTypeSpec {
        node_type: NodeType::Terms,
        label: "Terms",
        summary: "Client accepts the terms document",
        required_fields: &["document_file.url"],
        optional_fields: &["document_file.name", "document_file.type"],
        default_title: "Accept terms",
    },
    NodeTypeSpec {
        node_type: NodeType::Contract,
        label: "Contract",
        summary: "Client signs a contract",
        required_fields: &["document_file.url"],
        optional_fields: &["document_file.name", "document_file.type"],
        default_title: "Sign contract",
    },
    NodeTypeSpec {
        node_type: NodeType::Payment,
        label: "Payment",
        summary: "Client pays an invoice through a payment link",
        required_fields: &["stripe_url"],
        optional_fields: &["amount_label"],
        default_title: "Pay invoice",
    },
    NodeTypeSpec {
        node_type: NodeType::Consent,
        label: "Consent",
        summary: "Client consents to terms of service and privacy policy",
        required_fields: &["terms_url", "privacy_url"],
        optional_fields: &[],
        default_title: "Give consent",
    },
    NodeTypeSpec {
        node_type: NodeType::Upload,
        label: "Upload",
        summary: "Client uploads a file",
        required_fields: &[],
        optional_fields: &[],
        default_title: "Upload files",
    },
    NodeTypeSpec {
        node_type: NodeType::Connect,
        label: "Connect account",
        summary: "Client connects an external account",
        required_fields: &[],
        optional_fields: &[],
        default_title: "Connect accounts",
    },
    NodeTypeSpec {
        node_type: NodeType::Call,
        label: "Book a call",
        summary: "Client books a call",
        required_fields: &[],
        optional_fields: &[],
        default_title: "Book kickoff call",
    },
];

/// Look up the spec for a node type.
pub fn spec(node_type: NodeType) -> &'static NodeTypeSpec {
    &REGISTRY[node_type as usize]
}

/// All registered node types, in palette order.
pub fn all() -> &'static [NodeTypeSpec] {
    &REGISTRY
}

/// Resolve a dotted path (`document_file.url`) inside a config map.
pub fn lookup<'a>(config: &'a NodeConfig, path: &str) -> Option<&'a serde_json::Value> {
    let mut parts = path.split('.');
    let mut current = config.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
