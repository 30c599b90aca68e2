//! Collaborator interfaces the flow core persists through.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::model::{
    DocumentFile, Edge, Flow, FlowStatus, Node, OnboardingProgress, Position,
};

/// Backend-agnostic store for flows, nodes, edges, and client progress.
///
/// Implementations must keep at most one `draft` and one `published` flow
/// per organization, and must apply `delete_node`, `insert_graph` and
/// `commit_publish` atomically.
#[async_trait]
pub trait FlowStore: Send + Sync {
    // ── Flows ───────────────────────────────────────────────────────

    /// Get a flow by ID.
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError>;

    /// Find an organization's flow in the given status (draft or published).
    async fn find_flow(
        &self,
        org_id: &str,
        status: FlowStatus,
    ) -> Result<Option<Flow>, DatabaseError>;

    /// Insert a new flow. Fails with `Constraint` if the organization already
    /// has a flow in the same active status.
    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError>;

    /// Full save pass over `nodes`, archive `supersede` (the previously
    /// published flow, if any), then flip `flow_id` to published. All or nothing.
    ///
    /// `nodes` is the validated snapshot. Fails with `Conflict` and writes
    /// nothing if the flow is no longer a draft, its stored node set differs
    /// from the snapshot, any node's stored version differs, or `supersede`
    /// is no longer the published flow.
    async fn commit_publish(
        &self,
        flow_id: Uuid,
        nodes: &[Node],
        supersede: Option<Uuid>,
    ) -> Result<Flow, DatabaseError>;

    /// Insert `flow` unless a flow with that ID already exists, then insert
    /// `nodes` and `edges`. All or nothing.
    async fn insert_graph(
        &self,
        flow: &Flow,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<(), DatabaseError>;

    // ── Nodes ───────────────────────────────────────────────────────

    /// List a flow's nodes ordered by `order_index`.
    async fn list_nodes(&self, flow_id: Uuid) -> Result<Vec<Node>, DatabaseError>;

    /// Get a node by ID.
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError>;

    /// Insert a new node.
    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError>;

    /// Overwrite a node's content. With `expected_version`, only writes if the
    /// stored version matches. Returns whether a row was written.
    async fn update_node(
        &self,
        node: &Node,
        expected_version: Option<i64>,
    ) -> Result<bool, DatabaseError>;

    /// Persist a node's canvas position only.
    async fn update_node_position(
        &self,
        id: Uuid,
        position: Position,
    ) -> Result<bool, DatabaseError>;

    /// Delete a node and every edge touching it. Returns the removed edge IDs.
    async fn delete_node(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;

    // ── Edges ───────────────────────────────────────────────────────

    /// List a flow's edges in creation order.
    async fn list_edges(&self, flow_id: Uuid) -> Result<Vec<Edge>, DatabaseError>;

    /// Get an edge by ID.
    async fn get_edge(&self, id: Uuid) -> Result<Option<Edge>, DatabaseError>;

    /// Insert a new edge.
    async fn insert_edge(&self, edge: &Edge) -> Result<(), DatabaseError>;

    /// Delete an edge. Returns whether it existed.
    async fn delete_edge(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    /// Get a client user's onboarding progress.
    async fn get_progress(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError>;

    /// Insert or replace a client user's onboarding progress.
    async fn save_progress(&self, progress: &OnboardingProgress) -> Result<(), DatabaseError>;
}

/// A file handed to the document store.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Blob store that turns uploaded documents into durable URLs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(
        &self,
        org_id: &str,
        node_id: Uuid,
        upload: DocumentUpload,
    ) -> Result<DocumentFile, DatabaseError>;
}
