//! Test store that runs a burst of concurrent writes right after a chosen
//! read, to exercise check-then-write races deterministically.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::model::{Edge, Flow, FlowStatus, Node, OnboardingProgress, Position};
use crate::store::memory::MemoryStore;
use crate::store::traits::FlowStore;

type Writes = Box<dyn FnOnce(Arc<MemoryStore>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// The read after which the writes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum After {
    GetFlow,
    FindFlow(FlowStatus),
}

pub(crate) struct InterleavedStore {
    inner: Arc<MemoryStore>,
    after: After,
    writes: Mutex<Option<Writes>>,
}

impl InterleavedStore {
    pub(crate) fn new<F, Fut>(inner: Arc<MemoryStore>, after: After, writes: F) -> Self
    where
        F: FnOnce(Arc<MemoryStore>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner,
            after,
            writes: Mutex::new(Some(Box::new(move |store| Box::pin(writes(store))))),
        }
    }

    async fn fire(&self, read: After) {
        if read != self.after {
            return;
        }
        let writes = self.writes.lock().await.take();
        if let Some(writes) = writes {
            writes(self.inner.clone()).await;
        }
    }
}

#[async_trait]
impl FlowStore for InterleavedStore {
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        let flow = self.inner.get_flow(id).await;
        self.fire(After::GetFlow).await;
        flow
    }

    async fn find_flow(
        &self,
        org_id: &str,
        status: FlowStatus,
    ) -> Result<Option<Flow>, DatabaseError> {
        let flow = self.inner.find_flow(org_id, status).await;
        self.fire(After::FindFlow(status)).await;
        flow
    }

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        self.inner.insert_flow(flow).await
    }

    async fn commit_publish(
        &self,
        flow_id: Uuid,
        nodes: &[Node],
        supersede: Option<Uuid>,
    ) -> Result<Flow, DatabaseError> {
        self.inner.commit_publish(flow_id, nodes, supersede).await
    }

    async fn insert_graph(
        &self,
        flow: &Flow,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<(), DatabaseError> {
        self.inner.insert_graph(flow, nodes, edges).await
    }

    async fn list_nodes(&self, flow_id: Uuid) -> Result<Vec<Node>, DatabaseError> {
        self.inner.list_nodes(flow_id).await
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError> {
        self.inner.get_node(id).await
    }

    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError> {
        self.inner.insert_node(node).await
    }

    async fn update_node(
        &self,
        node: &Node,
        expected_version: Option<i64>,
    ) -> Result<bool, DatabaseError> {
        self.inner.update_node(node, expected_version).await
    }

    async fn update_node_position(
        &self,
        id: Uuid,
        position: Position,
    ) -> Result<bool, DatabaseError> {
        self.inner.update_node_position(id, position).await
    }

    async fn delete_node(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        self.inner.delete_node(id).await
    }

    async fn list_edges(&self, flow_id: Uuid) -> Result<Vec<Edge>, DatabaseError> {
        self.inner.list_edges(flow_id).await
    }

    async fn get_edge(&self, id: Uuid) -> Result<Option<Edge>, DatabaseError> {
        self.inner.get_edge(id).await
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<(), DatabaseError> {
        self.inner.insert_edge(edge).await
    }

    async fn delete_edge(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.delete_edge(id).await
    }

    async fn get_progress(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError> {
        self.inner.get_progress(org_id, user_id).await
    }

    async fn save_progress(&self, progress: &OnboardingProgress) -> Result<(), DatabaseError> {
        self.inner.save_progress(progress).await
    }
}
