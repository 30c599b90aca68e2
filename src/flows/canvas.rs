//! Canvas adapter: persisted graph records to a renderer-neutral document.
//!
//! Nothing else in the crate depends on these types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{FlowGraph, FlowStatus, NodeConfig, NodeType, Position};
use super::validator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasNodeData {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub order_index: u32,
    pub version: i64,
    pub config: NodeConfig,
    pub complete: bool,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub position: Position,
    pub data: CanvasNodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasEdge {
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasDocument {
    pub flow_id: Uuid,
    pub status: FlowStatus,
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    pub incomplete_count: usize,
}

pub fn to_canvas(graph: &FlowGraph) -> CanvasDocument {
    let nodes: Vec<CanvasNode> = graph
        .nodes
        .iter()
        .map(|node| {
            let completion = validator::validate_node(node);
            CanvasNode {
                id: node.id,
                node_type: node.node_type,
                position: node.position,
                data: CanvasNodeData {
                    title: node.title.clone(),
                    description: node.description.clone(),
                    required: node.required,
                    order_index: node.order_index,
                    version: node.version,
                    config: node.config.clone(),
                    complete: completion.is_complete,
                    missing_fields: completion.missing_fields,
                },
            }
        })
        .collect();

    CanvasDocument {
        flow_id: graph.flow.id,
        status: graph.flow.status,
        incomplete_count: nodes.iter().filter(|n| !n.data.complete).count(),
        nodes,
        edges: graph
            .edges
            .iter()
            .map(|e| CanvasEdge {
                id: e.id,
                source: e.source,
                target: e.target,
            })
            .collect(),
    }
}

/// Read a position out of a renderer payload. Accepts `{x, y}` directly or
/// nested under `position`; non-finite coordinates are rejected.
pub fn position_from_canvas(value: &serde_json::Value) -> Option<Position> {
    let raw = value.get("position").unwrap_or(value);
    let x = raw.get("x")?.as_f64()?;
    let y = raw.get("y")?.as_f64()?;
    (x.is_finite() && y.is_finite()).then_some(Position { x, y })
}
