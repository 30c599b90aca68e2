//! Completion validator: pure per-node configuration checks.

use serde::Serialize;
use uuid::Uuid;

use super::model::{CompletionResult, Node, NodeConfig, NodeType};
use super::registry;

/// Name reported in `missing_fields` for a blank title.
pub const TITLE_FIELD: &str = "title";

/// Validate a node's configuration against its type's required fields.
///
/// Deterministic and side-effect free. A blank title is always reported
/// first, followed by the type's required fields in registry order.
pub fn validate(node_type: NodeType, config: &NodeConfig, title: &str) -> CompletionResult {
    let mut missing_fields = Vec::new();

    if title.trim().is_empty() {
        missing_fields.push(TITLE_FIELD.to_string());
    }

    for field in registry::spec(node_type).required_fields {
        if !has_text(config, field) {
            missing_fields.push((*field).to_string());
        }
    }

    CompletionResult {
        is_complete: missing_fields.is_empty(),
        missing_fields,
    }
}

/// Validate a stored node.
pub fn validate_node(node: &Node) -> CompletionResult {
    validate(node.node_type, &node.config, &node.title)
}

fn has_text(config: &NodeConfig, path: &str) -> bool {
    registry::lookup(config, path)
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.trim().is_empty())
}

/// One row of the setup checklist.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistItem {
    pub node_id: Uuid,
    pub title: String,
    pub node_type: NodeType,
    pub order_index: u32,
    pub completion: CompletionResult,
}

/// Per-node completion for a whole flow, in `order_index` order.
#[derive(Debug, Clone, Serialize)]
pub struct SetupChecklist {
    pub items: Vec<ChecklistItem>,
    pub incomplete_count: usize,
}

impl SetupChecklist {
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut items: Vec<ChecklistItem> = nodes
            .iter()
            .map(|node| ChecklistItem {
                node_id: node.id,
                title: node.title.clone(),
                node_type: node.node_type,
                order_index: node.order_index,
                completion: validate_node(node),
            })
            .collect();
        items.sort_by_key(|item| item.order_index);

        let incomplete_count = items.iter().filter(|i| !i.completion.is_complete).count();
        Self {
            items,
            incomplete_count,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.incomplete_count == 0
    }

    /// Titles of incomplete nodes, in `order_index` order.
    pub fn incomplete_titles(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| !i.completion.is_complete)
            .map(|i| i.title.clone())
            .collect()
    }
}
