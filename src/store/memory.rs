//! In-process store: `FlowStore` and `DocumentStore` over locked maps.
//!
//! Every operation takes a single lock, so multi-row operations
//! (`delete_node`, `insert_graph`, `commit_publish`) are atomic with respect
//! to each other.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::model::{
    DocumentFile, Edge, Flow, FlowStatus, Node, OnboardingProgress, Position,
};
use crate::store::traits::{DocumentStore, DocumentUpload, FlowStore};

#[derive(Default)]
struct MemoryState {
    flows: HashMap<Uuid, Flow>,
    nodes: HashMap<Uuid, Node>,
    /// Creation order.
    edges: Vec<Edge>,
    progress: HashMap<(String, String), OnboardingProgress>,
}

/// Non-durable `FlowStore`, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: impl ToString) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        Ok(self.state.read().await.flows.get(&id).cloned())
    }

    async fn find_flow(
        &self,
        org_id: &str,
        status: FlowStatus,
    ) -> Result<Option<Flow>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .flows
            .values()
            .filter(|f| f.org_id == org_id && f.status == status)
            .max_by_key(|f| f.updated_at)
            .cloned())
    }

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if state.flows.contains_key(&flow.id) {
            return Err(DatabaseError::Constraint(format!("flow {} already exists", flow.id)));
        }
        if flow.status != FlowStatus::Archived
            && state
                .flows
                .values()
                .any(|f| f.org_id == flow.org_id && f.status == flow.status)
        {
            return Err(DatabaseError::Constraint(format!(
                "organization {} already has a {} flow",
                flow.org_id, flow.status
            )));
        }
        state.flows.insert(flow.id, flow.clone());
        debug!(flow_id = %flow.id, "Flow inserted");
        Ok(())
    }

    async fn commit_publish(
        &self,
        flow_id: Uuid,
        nodes: &[Node],
        supersede: Option<Uuid>,
    ) -> Result<Flow, DatabaseError> {
        let mut state = self.state.write().await;

        // Check the snapshot against stored state before the first write.
        let flow = state.flows.get(&flow_id).ok_or_else(|| not_found("flow", flow_id))?;
        if !flow.is_draft() {
            return Err(DatabaseError::Conflict(format!(
                "flow {flow_id} is {}, not draft",
                flow.status
            )));
        }
        let org_id = flow.org_id.clone();
        let live = state
            .flows
            .values()
            .find(|f| f.org_id == org_id && f.status == FlowStatus::Published)
            .map(|f| f.id);
        if live != supersede {
            return Err(DatabaseError::Conflict(format!(
                "published flow for {org_id} changed during publish"
            )));
        }

        let stored: HashSet<Uuid> = state
            .nodes
            .values()
            .filter(|n| n.flow_id == flow_id)
            .map(|n| n.id)
            .collect();
        let snapshot: HashSet<Uuid> = nodes.iter().map(|n| n.id).collect();
        if stored != snapshot || snapshot.len() != nodes.len() {
            return Err(DatabaseError::Conflict(format!(
                "nodes of flow {flow_id} changed during publish"
            )));
        }
        for node in nodes {
            let current = state.nodes.get(&node.id).map(|n| n.version);
            if current != Some(node.version) {
                return Err(DatabaseError::Conflict(format!(
                    "node {} changed during publish",
                    node.id
                )));
            }
        }

        let now = Utc::now();
        for node in nodes {
            state.nodes.insert(node.id, node.clone());
        }
        if let Some(old) = supersede
            && let Some(flow) = state.flows.get_mut(&old)
        {
            flow.status = FlowStatus::Archived;
            flow.updated_at = now;
        }
        let flow = state
            .flows
            .get_mut(&flow_id)
            .ok_or_else(|| not_found("flow", flow_id))?;
        flow.status = FlowStatus::Published;
        flow.published_at = Some(now);
        flow.updated_at = now;
        Ok(flow.clone())
    }

    async fn insert_graph(
        &self,
        flow: &Flow,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;

        let creates_flow = !state.flows.contains_key(&flow.id);
        if creates_flow
            && flow.status != FlowStatus::Archived
            && state
                .flows
                .values()
                .any(|f| f.org_id == flow.org_id && f.status == flow.status)
        {
            return Err(DatabaseError::Constraint(format!(
                "organization {} already has a {} flow",
                flow.org_id, flow.status
            )));
        }

        let mut indexes: HashSet<u32> = state
            .nodes
            .values()
            .filter(|n| n.flow_id == flow.id)
            .map(|n| n.order_index)
            .collect();
        let mut ids = HashSet::new();
        for node in nodes {
            if node.flow_id != flow.id {
                return Err(not_found("flow", node.flow_id));
            }
            if state.nodes.contains_key(&node.id) || !ids.insert(node.id) {
                return Err(DatabaseError::Constraint(format!("node {} already exists", node.id)));
            }
            if !indexes.insert(node.order_index) {
                return Err(DatabaseError::Constraint(format!(
                    "order_index {} already used in flow {}",
                    node.order_index, flow.id
                )));
            }
        }
        for edge in edges {
            for endpoint in [edge.source, edge.target] {
                if !ids.contains(&endpoint) && !state.nodes.contains_key(&endpoint) {
                    return Err(not_found("node", endpoint));
                }
            }
        }

        if creates_flow {
            state.flows.insert(flow.id, flow.clone());
        }
        for node in nodes {
            state.nodes.insert(node.id, node.clone());
        }
        state.edges.extend(edges.iter().cloned());
        debug!(flow_id = %flow.id, nodes = nodes.len(), edges = edges.len(), "Graph inserted");
        Ok(())
    }

    async fn list_nodes(&self, flow_id: Uuid) -> Result<Vec<Node>, DatabaseError> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.flow_id == flow_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.order_index);
        Ok(nodes)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError> {
        Ok(self.state.read().await.nodes.get(&id).cloned())
    }

    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if !state.flows.contains_key(&node.flow_id) {
            return Err(not_found("flow", node.flow_id));
        }
        if state
            .nodes
            .values()
            .any(|n| n.flow_id == node.flow_id && n.order_index == node.order_index)
        {
            return Err(DatabaseError::Constraint(format!(
                "order_index {} already used in flow {}",
                node.order_index, node.flow_id
            )));
        }
        state.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn update_node(
        &self,
        node: &Node,
        expected_version: Option<i64>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.nodes.get_mut(&node.id) else {
            return Ok(false);
        };
        if expected_version.is_some_and(|v| v != stored.version) {
            return Ok(false);
        }
        *stored = node.clone();
        Ok(true)
    }

    async fn update_node_position(
        &self,
        id: Uuid,
        position: Position,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        match state.nodes.get_mut(&id) {
            Some(node) => {
                node.position = position;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_node(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let mut state = self.state.write().await;
        if state.nodes.remove(&id).is_none() {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        state.edges.retain(|e| {
            let touches = e.source == id || e.target == id;
            if touches {
                removed.push(e.id);
            }
            !touches
        });
        Ok(removed)
    }

    async fn list_edges(&self, flow_id: Uuid) -> Result<Vec<Edge>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn get_edge(&self, id: Uuid) -> Result<Option<Edge>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state.edges.iter().find(|e| e.id == id).cloned())
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        for endpoint in [edge.source, edge.target] {
            if !state.nodes.contains_key(&endpoint) {
                return Err(not_found("node", endpoint));
            }
        }
        state.edges.push(edge.clone());
        Ok(())
    }

    async fn delete_edge(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        let before = state.edges.len();
        state.edges.retain(|e| e.id != id);
        Ok(state.edges.len() != before)
    }

    async fn get_progress(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .progress
            .get(&(org_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn save_progress(&self, progress: &OnboardingProgress) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        state.progress.insert(
            (progress.org_id.clone(), progress.user_id.clone()),
            progress.clone(),
        );
        Ok(())
    }
}

/// Document store that keeps uploads in memory under `memory://` URLs.
#[derive(Default)]
pub struct MemoryDocumentStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the bytes stored under `url`.
    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(url).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(
        &self,
        org_id: &str,
        node_id: Uuid,
        upload: DocumentUpload,
    ) -> Result<DocumentFile, DatabaseError> {
        if upload.name.trim().is_empty() {
            return Err(DatabaseError::Constraint("document name must not be empty".into()));
        }
        let url = format!("memory://{org_id}/{node_id}/{}", upload.name);
        self.files.write().await.insert(url.clone(), upload.bytes);
        Ok(DocumentFile {
            url,
            name: upload.name,
            content_type: upload.content_type,
        })
    }
}
