//! Client progress through the published flow.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{FlowGraph, FlowStatus, Node, OnboardingProgress, OrgContext};
use super::traversal;
use crate::error::FlowError;
use crate::store::traits::FlowStore;

/// What the onboarding wizard needs to render a client's position.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub flow_id: Uuid,
    pub progress: OnboardingProgress,
    /// The step to present, or `None` once onboarding is finished.
    pub current: Option<Node>,
    pub required_total: usize,
    pub required_completed: usize,
    pub is_complete: bool,
}

/// Records step completions and resolves the next step for client users.
/// Only ever reads the authoring side.
pub struct ProgressTracker {
    store: Arc<dyn FlowStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    async fn live_graph(&self, org: &OrgContext) -> Result<FlowGraph, FlowError> {
        let flow = self
            .store
            .find_flow(&org.org_id, FlowStatus::Published)
            .await?
            .ok_or_else(|| FlowError::not_found("published flow", &org.org_id))?;
        let nodes = self.store.list_nodes(flow.id).await?;
        let edges = self.store.list_edges(flow.id).await?;
        Ok(FlowGraph { flow, nodes, edges })
    }

    async fn load(
        &self,
        org: &OrgContext,
        user_id: &str,
        graph: &FlowGraph,
    ) -> Result<OnboardingProgress, FlowError> {
        match self.store.get_progress(&org.org_id, user_id).await? {
            Some(mut progress) if progress.flow_id != graph.flow.id => {
                // Republished since the last visit: a step stays done if the
                // live flow still has a copy of it.
                let previous = self.store.list_nodes(progress.flow_id).await?;
                let done: HashSet<Uuid> = previous
                    .iter()
                    .filter(|n| progress.completed.contains(&n.id))
                    .map(Node::lineage)
                    .collect();
                progress.completed = graph
                    .nodes
                    .iter()
                    .filter(|n| done.contains(&n.lineage()))
                    .map(|n| n.id)
                    .collect();
                debug!(
                    user_id,
                    from = %progress.flow_id,
                    to = %graph.flow.id,
                    kept = progress.completed.len(),
                    "Progress carried to republished flow"
                );
                progress.flow_id = graph.flow.id;
                Ok(progress)
            }
            Some(progress) => Ok(progress),
            None => {
                info!(org_id = %org.org_id, user_id, flow_id = %graph.flow.id, "Onboarding started");
                Ok(OnboardingProgress::new(&org.org_id, user_id, graph.flow.id))
            }
        }
    }

    /// Open (or resume) a client's onboarding and present the next step.
    pub async fn start(&self, org: &OrgContext, user_id: &str) -> Result<ProgressView, FlowError> {
        let graph = self.live_graph(org).await?;
        let mut progress = self.load(org, user_id, &graph).await?;
        let view = resolve(&graph, &mut progress);
        self.store.save_progress(&view.progress).await?;
        Ok(view)
    }

    /// Mark a step of the published flow done and advance.
    pub async fn complete(
        &self,
        org: &OrgContext,
        user_id: &str,
        node_id: Uuid,
    ) -> Result<ProgressView, FlowError> {
        let graph = self.live_graph(org).await?;
        if graph.node(node_id).is_none() {
            return Err(FlowError::not_found("node", node_id));
        }

        let mut progress = self.load(org, user_id, &graph).await?;
        progress.completed.insert(node_id);
        let view = resolve(&graph, &mut progress);
        self.store.save_progress(&view.progress).await?;

        info!(
            org_id = %org.org_id,
            user_id,
            node_id = %node_id,
            done = view.required_completed,
            total = view.required_total,
            "Onboarding step completed"
        );
        if view.is_complete {
            info!(org_id = %org.org_id, user_id, "Onboarding finished");
        }
        Ok(view)
    }
}

fn resolve(graph: &FlowGraph, progress: &mut OnboardingProgress) -> ProgressView {
    let completed: HashSet<Uuid> = progress.completed.iter().copied().collect();
    let current = traversal::next_step(graph, &completed).cloned();
    let required = traversal::required_steps(graph);
    let required_completed = required
        .iter()
        .filter(|n| completed.contains(&n.id))
        .count();
    let is_complete = current.is_none();

    let now = Utc::now();
    progress.current_node_id = current.as_ref().map(|n| n.id);
    progress.updated_at = now;
    if is_complete {
        progress.completed_at.get_or_insert(now);
    } else {
        progress.completed_at = None;
    }

    ProgressView {
        flow_id: graph.flow.id,
        progress: progress.clone(),
        current,
        required_total: required.len(),
        required_completed,
        is_complete,
    }
}
