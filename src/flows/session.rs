//! Optimistic draft editing.
//!
//! A `DraftSession` mirrors one draft flow locally. Edits are staged first
//! (applied immediately, with an undo snapshot), then committed through the
//! `Composer`. A failed commit restores the snapshot. New nodes live in the
//! arena under a placeholder ID until the server assigns a real one; the
//! reconciliation map resolves server IDs back to arena handles.
//!
//! Commit staged edits in the order they were staged.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use super::composer::{Composer, next_order_index};
use super::model::{
    CompletionResult, Edge, FlowGraph, NewNode, Node, NodePatch, OrgContext, Position,
};
use super::validator;
use crate::error::FlowError;

/// Stable arena index of a node within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    /// `None` until the create has been committed.
    server_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct LocalEdge {
    edge: Edge,
    persisted: bool,
}

/// An edit to stage against the session.
#[derive(Debug, Clone)]
pub enum EditCommand {
    CreateNode(NewNode),
    UpdateNode { handle: NodeHandle, patch: NodePatch },
    MoveNode { handle: NodeHandle, position: Position },
    DeleteNode { handle: NodeHandle },
    CreateEdge { source: NodeHandle, target: NodeHandle },
    DeleteEdge { edge_id: Uuid },
}

#[derive(Debug)]
enum Undo {
    RemoveSlot(NodeHandle),
    RestoreSlot(NodeHandle, Slot),
    RestoreSlotAndEdges(NodeHandle, Slot, Vec<LocalEdge>),
    RemoveEdge(Uuid),
    RestoreEdge(LocalEdge),
}

/// A staged edit awaiting commit.
#[derive(Debug)]
pub struct PendingEdit {
    command: EditCommand,
    /// Node the edit applies to (the new slot for creates).
    handle: Option<NodeHandle>,
    /// Local edge ID for edge creates.
    edge_id: Option<Uuid>,
    undo: Undo,
}

impl PendingEdit {
    pub fn handle(&self) -> Option<NodeHandle> {
        self.handle
    }

    pub fn edge_id(&self) -> Option<Uuid> {
        self.edge_id
    }
}

/// Local, optimistically-updated view of one draft flow.
pub struct DraftSession {
    org: OrgContext,
    flow_id: Uuid,
    slots: Vec<Option<Slot>>,
    by_server_id: HashMap<Uuid, NodeHandle>,
    edges: Vec<LocalEdge>,
}

impl DraftSession {
    /// Start a session on a flow that has not been created yet.
    pub fn empty(org: OrgContext, flow_id: Uuid) -> Self {
        Self {
            org,
            flow_id,
            slots: Vec::new(),
            by_server_id: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Start a session from a loaded graph.
    pub fn from_graph(org: OrgContext, graph: FlowGraph) -> Self {
        let mut session = Self::empty(org, graph.flow.id);
        for node in graph.nodes {
            let handle = NodeHandle(session.slots.len());
            session.by_server_id.insert(node.id, handle);
            session.slots.push(Some(Slot {
                server_id: Some(node.id),
                node,
            }));
        }
        session.edges = graph
            .edges
            .into_iter()
            .map(|edge| LocalEdge {
                edge,
                persisted: true,
            })
            .collect();
        session
    }

    /// Load the flow's graph, or start empty if the flow does not exist yet.
    pub async fn open(composer: &Composer, org: OrgContext, flow_id: Uuid) -> Result<Self, FlowError> {
        match composer.graph(&org, flow_id).await {
            Ok(graph) => Ok(Self::from_graph(org, graph)),
            Err(FlowError::NotFound { entity: "flow", .. }) => Ok(Self::empty(org, flow_id)),
            Err(e) => Err(e),
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.slot(handle).map(|s| &s.node)
    }

    /// Live nodes in `order_index` order.
    pub fn nodes(&self) -> Vec<(NodeHandle, &Node)> {
        let mut nodes: Vec<(NodeHandle, &Node)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (NodeHandle(i), &s.node)))
            .collect();
        nodes.sort_by_key(|(_, n)| n.order_index);
        nodes
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().map(|e| &e.edge)
    }

    /// Resolve a server-assigned node ID to its arena handle.
    pub fn handle_for(&self, server_id: Uuid) -> Option<NodeHandle> {
        self.by_server_id.get(&server_id).copied()
    }

    /// Whether the node's create has not been committed yet.
    pub fn is_pending(&self, handle: NodeHandle) -> bool {
        self.slot(handle).is_some_and(|s| s.server_id.is_none())
    }

    /// Completion of the local (possibly uncommitted) node state.
    pub fn completion(&self, handle: NodeHandle) -> Option<CompletionResult> {
        self.node(handle).map(validator::validate_node)
    }

    pub fn incomplete_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|s| !validator::validate_node(&s.node).is_complete)
            .count()
    }

    fn slot(&self, handle: NodeHandle) -> Option<&Slot> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    fn live_slot(&self, handle: NodeHandle) -> Result<&Slot, FlowError> {
        self.slot(handle)
            .ok_or_else(|| FlowError::not_found("node", format!("handle {}", handle.0)))
    }

    fn server_id(&self, handle: NodeHandle) -> Result<Uuid, FlowError> {
        let slot = self.live_slot(handle)?;
        slot.server_id.ok_or_else(|| {
            FlowError::invalid_flow(self.flow_id, "node has not been saved yet")
        })
    }

    /// Apply an edit locally and return the pending record needed to commit
    /// or roll it back.
    pub fn stage(&mut self, command: EditCommand) -> Result<PendingEdit, FlowError> {
        let (handle, edge_id, undo) = match &command {
            EditCommand::CreateNode(new) => {
                let order_index = next_order_index(
                    self.slots.iter().flatten().map(|s| &s.node.order_index),
                    new.order_index,
                );
                // Placeholder ID until the server assigns one.
                let node = new.clone().into_node(self.flow_id, order_index);
                let handle = NodeHandle(self.slots.len());
                self.slots.push(Some(Slot {
                    node,
                    server_id: None,
                }));
                (Some(handle), None, Undo::RemoveSlot(handle))
            }
            EditCommand::UpdateNode { handle, patch } => {
                let snapshot = self.live_slot(*handle)?.clone();
                if let Some(Some(slot)) = self.slots.get_mut(handle.0) {
                    patch.apply_to(&mut slot.node);
                }
                (Some(*handle), None, Undo::RestoreSlot(*handle, snapshot))
            }
            EditCommand::MoveNode { handle, position } => {
                let snapshot = self.live_slot(*handle)?.clone();
                if let Some(Some(slot)) = self.slots.get_mut(handle.0) {
                    slot.node.position = *position;
                }
                (Some(*handle), None, Undo::RestoreSlot(*handle, snapshot))
            }
            EditCommand::DeleteNode { handle } => {
                let snapshot = self.live_slot(*handle)?.clone();
                let node_id = snapshot.node.id;
                let (removed, kept): (Vec<LocalEdge>, Vec<LocalEdge>) = self
                    .edges
                    .drain(..)
                    .partition(|e| e.edge.source == node_id || e.edge.target == node_id);
                self.edges = kept;
                self.slots[handle.0] = None;
                (
                    Some(*handle),
                    None,
                    Undo::RestoreSlotAndEdges(*handle, snapshot, removed),
                )
            }
            EditCommand::CreateEdge { source, target } => {
                let source_id = self.live_slot(*source)?.node.id;
                let target_id = self.live_slot(*target)?.node.id;
                let edge = Edge::new(self.flow_id, source_id, target_id);
                let edge_id = edge.id;
                self.edges.push(LocalEdge {
                    edge,
                    persisted: false,
                });
                (None, Some(edge_id), Undo::RemoveEdge(edge_id))
            }
            EditCommand::DeleteEdge { edge_id } => {
                let pos = self
                    .edges
                    .iter()
                    .position(|e| e.edge.id == *edge_id)
                    .ok_or_else(|| FlowError::not_found("edge", edge_id))?;
                let removed = self.edges.remove(pos);
                (None, Some(*edge_id), Undo::RestoreEdge(removed))
            }
        };

        Ok(PendingEdit {
            command,
            handle,
            edge_id,
            undo,
        })
    }

    /// Persist a staged edit. On failure the local state is rolled back to
    /// what it was before the edit was staged and the error is returned.
    pub async fn commit(&mut self, composer: &Composer, pending: PendingEdit) -> Result<(), FlowError> {
        match self.send(composer, &pending).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(flow_id = %self.flow_id, error = %e, "Edit failed, rolling back");
                self.rollback(pending.undo);
                Err(e)
            }
        }
    }

    async fn send(&mut self, composer: &Composer, pending: &PendingEdit) -> Result<(), FlowError> {
        match &pending.command {
            EditCommand::CreateNode(_) => {
                let handle = pending
                    .handle
                    .ok_or_else(|| FlowError::invalid_flow(self.flow_id, "create without handle"))?;
                let local = self.live_slot(handle)?.node.clone();
                let new = NewNode {
                    node_type: local.node_type,
                    title: local.title,
                    description: local.description,
                    required: local.required,
                    config: local.config,
                    position: Some(local.position),
                    order_index: Some(local.order_index),
                };
                let saved = composer.create_node(&self.org, self.flow_id, new).await?;
                self.reconcile(handle, local.id, saved);
            }
            EditCommand::UpdateNode { handle, patch } => {
                let server_id = self.server_id(*handle)?;
                let saved = composer.update_node(&self.org, server_id, patch.clone()).await?;
                self.replace(*handle, saved);
            }
            EditCommand::MoveNode { handle, position } => {
                let server_id = self.server_id(*handle)?;
                composer.move_node(&self.org, server_id, *position).await?;
            }
            EditCommand::DeleteNode { .. } => {
                if let Undo::RestoreSlotAndEdges(_, slot, _) = &pending.undo
                    && let Some(server_id) = slot.server_id
                {
                    composer.delete_node(&self.org, server_id).await?;
                    self.by_server_id.remove(&server_id);
                }
            }
            EditCommand::CreateEdge { source, target } => {
                let source_id = self.server_id(*source)?;
                let target_id = self.server_id(*target)?;
                let saved = composer
                    .create_edge(&self.org, self.flow_id, source_id, target_id)
                    .await?;
                if let Some(local) = self
                    .edges
                    .iter_mut()
                    .find(|e| Some(e.edge.id) == pending.edge_id)
                {
                    local.edge = saved;
                    local.persisted = true;
                }
            }
            EditCommand::DeleteEdge { edge_id } => {
                if let Undo::RestoreEdge(local) = &pending.undo
                    && local.persisted
                {
                    composer.delete_edge(&self.org, *edge_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Swap a placeholder ID for the server's, including in local edges.
    fn reconcile(&mut self, handle: NodeHandle, placeholder: Uuid, saved: Node) {
        let server_id = saved.id;
        debug!(placeholder = %placeholder, node_id = %server_id, "Node reconciled");
        for local in &mut self.edges {
            if local.edge.source == placeholder {
                local.edge.source = server_id;
            }
            if local.edge.target == placeholder {
                local.edge.target = server_id;
            }
        }
        if let Some(slot) = self.slots.get_mut(handle.0) {
            *slot = Some(Slot {
                node: saved,
                server_id: Some(server_id),
            });
        }
        self.by_server_id.insert(server_id, handle);
    }

    fn replace(&mut self, handle: NodeHandle, saved: Node) {
        if let Some(Some(slot)) = self.slots.get_mut(handle.0) {
            slot.node = saved;
        }
    }

    fn rollback(&mut self, undo: Undo) {
        match undo {
            Undo::RemoveSlot(handle) => {
                if let Some(slot) = self.slots.get_mut(handle.0) {
                    *slot = None;
                }
            }
            Undo::RestoreSlot(handle, snapshot) => {
                if let Some(slot) = self.slots.get_mut(handle.0) {
                    *slot = Some(snapshot);
                }
            }
            Undo::RestoreSlotAndEdges(handle, snapshot, edges) => {
                if let Some(server_id) = snapshot.server_id {
                    self.by_server_id.insert(server_id, handle);
                }
                if let Some(slot) = self.slots.get_mut(handle.0) {
                    *slot = Some(snapshot);
                }
                self.edges.extend(edges);
            }
            Undo::RemoveEdge(edge_id) => {
                self.edges.retain(|e| e.edge.id != edge_id);
            }
            Undo::RestoreEdge(local) => {
                self.edges.push(local);
            }
        }
    }
}
