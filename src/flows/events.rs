//! Flow change events: broadcast after every successful graph mutation.
//!
//! Node events carry the node's freshly recomputed `CompletionResult`, so
//! subscribers (canvas badges, the incomplete-count banner) never re-run
//! validation or touch the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::model::{CompletionResult, Edge, Flow, Node, Position};
use super::validator;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A change to a flow's graph or lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A draft flow was created, implicitly or by fork/template.
    FlowCreated { flow: Flow },
    NodeCreated {
        node: Node,
        completion: CompletionResult,
    },
    NodeUpdated {
        node: Node,
        completion: CompletionResult,
    },
    /// Canvas-only change; completion is unaffected.
    NodeMoved {
        flow_id: Uuid,
        node_id: Uuid,
        position: Position,
    },
    NodeDeleted {
        flow_id: Uuid,
        node_id: Uuid,
        removed_edges: Vec<Uuid>,
    },
    EdgeCreated { edge: Edge },
    EdgeDeleted { flow_id: Uuid, edge_id: Uuid },
    /// A draft went live; `superseded` is the previously published flow, now archived.
    FlowPublished {
        flow: Flow,
        superseded: Option<Uuid>,
    },
}

impl FlowEvent {
    /// The flow this event belongs to.
    pub fn flow_id(&self) -> Uuid {
        match self {
            Self::FlowCreated { flow } | Self::FlowPublished { flow, .. } => flow.id,
            Self::NodeCreated { node, .. } | Self::NodeUpdated { node, .. } => node.flow_id,
            Self::NodeMoved { flow_id, .. }
            | Self::NodeDeleted { flow_id, .. }
            | Self::EdgeDeleted { flow_id, .. } => *flow_id,
            Self::EdgeCreated { edge } => edge.flow_id,
        }
    }
}

/// Fan-out channel for flow events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to flow events.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Ok if nobody is listening.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct BoardEntry {
    title: String,
    order_index: u32,
    completion: CompletionResult,
}

/// Per-node completion state for one flow, kept current by folding events.
#[derive(Debug, Clone)]
pub struct CompletionBoard {
    flow_id: Uuid,
    entries: HashMap<Uuid, BoardEntry>,
}

impl CompletionBoard {
    /// Seed the board by validating every node once.
    pub fn from_nodes(flow_id: Uuid, nodes: &[Node]) -> Self {
        let mut board = Self {
            flow_id,
            entries: HashMap::new(),
        };
        for node in nodes.iter().filter(|n| n.flow_id == flow_id) {
            board.upsert(node, validator::validate_node(node));
        }
        board
    }

    fn upsert(&mut self, node: &Node, completion: CompletionResult) {
        self.entries.insert(
            node.id,
            BoardEntry {
                title: node.title.clone(),
                order_index: node.order_index,
                completion,
            },
        );
    }

    /// Fold an event into the board. Events for other flows are ignored.
    pub fn apply(&mut self, event: &FlowEvent) {
        if event.flow_id() != self.flow_id {
            return;
        }
        match event {
            FlowEvent::NodeCreated { node, completion }
            | FlowEvent::NodeUpdated { node, completion } => {
                self.upsert(node, completion.clone());
            }
            FlowEvent::NodeDeleted { node_id, .. } => {
                self.entries.remove(node_id);
            }
            _ => {}
        }
    }

    /// Badge state for a node.
    pub fn badge(&self, node_id: Uuid) -> Option<&CompletionResult> {
        self.entries.get(&node_id).map(|e| &e.completion)
    }

    pub fn incomplete_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.completion.is_complete)
            .count()
    }

    /// Titles of incomplete nodes in `order_index` order.
    pub fn incomplete_titles(&self) -> Vec<String> {
        let mut incomplete: Vec<&BoardEntry> = self
            .entries
            .values()
            .filter(|e| !e.completion.is_complete)
            .collect();
        incomplete.sort_by_key(|e| e.order_index);
        incomplete.into_iter().map(|e| e.title.clone()).collect()
    }
}
