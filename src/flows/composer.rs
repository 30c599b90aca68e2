//! Graph composer: node and edge CRUD over a draft flow.
//!
//! Every mutation is scoped to the caller's organization, rejected on
//! anything but a draft, and followed by a `FlowEvent` carrying the node's
//! recomputed completion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{EventBus, FlowEvent};
use super::model::{
    Edge, Flow, FlowGraph, FlowStatus, NewNode, Node, NodePatch, OrgContext, Position,
};
use super::validator;
use crate::error::{DatabaseError, FlowError};
use crate::store::traits::{DocumentStore, DocumentUpload, FlowStore};

/// Load a flow and check it belongs to `org`. Foreign flows read as missing.
pub(crate) async fn load_scoped_flow(
    store: &dyn FlowStore,
    org: &OrgContext,
    flow_id: Uuid,
) -> Result<Flow, FlowError> {
    match store.get_flow(flow_id).await? {
        Some(flow) if flow.org_id == org.org_id => Ok(flow),
        _ => Err(FlowError::not_found("flow", flow_id)),
    }
}

fn ensure_draft(flow: &Flow) -> Result<(), FlowError> {
    if flow.is_draft() {
        Ok(())
    } else {
        Err(FlowError::invalid_flow(
            flow.id,
            format!("flow is {}; only drafts can be edited", flow.status),
        ))
    }
}

/// Resolve the `order_index` for a new node: the requested index if it is
/// free, otherwise one past the current maximum (0 for an empty flow).
pub(crate) fn next_order_index<'a>(
    existing: impl IntoIterator<Item = &'a u32>,
    requested: Option<u32>,
) -> u32 {
    let existing: Vec<u32> = existing.into_iter().copied().collect();
    if let Some(index) = requested
        && !existing.contains(&index)
    {
        return index;
    }
    existing.iter().max().map_or(0, |max| max + 1)
}

/// Authoring service for an organization's draft flow.
pub struct Composer {
    store: Arc<dyn FlowStore>,
    events: EventBus,
    strict_versions: bool,
}

impl Composer {
    pub fn new(store: Arc<dyn FlowStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            strict_versions: false,
        }
    }

    /// Require `expected_version` on every node update.
    pub fn with_strict_versions(mut self, strict: bool) -> Self {
        self.strict_versions = strict;
        self
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The organization's current draft, if any.
    pub async fn draft(&self, org: &OrgContext) -> Result<Option<Flow>, FlowError> {
        Ok(self.store.find_flow(&org.org_id, FlowStatus::Draft).await?)
    }

    /// The organization's live flow, if any.
    pub async fn published(&self, org: &OrgContext) -> Result<Option<Flow>, FlowError> {
        Ok(self
            .store
            .find_flow(&org.org_id, FlowStatus::Published)
            .await?)
    }

    /// Full node and edge set of a flow.
    pub async fn graph(&self, org: &OrgContext, flow_id: Uuid) -> Result<FlowGraph, FlowError> {
        let flow = load_scoped_flow(self.store.as_ref(), org, flow_id).await?;
        let nodes = self.store.list_nodes(flow.id).await?;
        let edges = self.store.list_edges(flow.id).await?;
        Ok(FlowGraph { flow, nodes, edges })
    }

    /// Return the draft `flow_id`, creating it empty if it does not exist yet.
    pub async fn open_draft(&self, org: &OrgContext, flow_id: Uuid) -> Result<Flow, FlowError> {
        if let Some(flow) = self.store.get_flow(flow_id).await? {
            if flow.org_id != org.org_id {
                return Err(FlowError::not_found("flow", flow_id));
            }
            ensure_draft(&flow)?;
            return Ok(flow);
        }

        let flow = Flow::new_draft(flow_id, &org.org_id);
        match self.store.insert_flow(&flow).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                // Either a concurrent caller created this same draft, or the
                // organization already has a different one.
                return match self.store.get_flow(flow_id).await? {
                    Some(existing) if existing.org_id == org.org_id && existing.is_draft() => {
                        Ok(existing)
                    }
                    _ => Err(FlowError::invalid_flow(
                        flow_id,
                        "organization already has a draft flow",
                    )),
                };
            }
            Err(e) => return Err(e.into()),
        }
        info!(flow_id = %flow.id, org_id = %org.org_id, "Draft flow created");
        self.events.emit(FlowEvent::FlowCreated { flow: flow.clone() });
        Ok(flow)
    }

    async fn scoped_node(&self, org: &OrgContext, node_id: Uuid) -> Result<(Flow, Node), FlowError> {
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| FlowError::not_found("node", node_id))?;
        let flow = load_scoped_flow(self.store.as_ref(), org, node.flow_id)
            .await
            .map_err(|_| FlowError::not_found("node", node_id))?;
        Ok((flow, node))
    }

    /// Add a node, implicitly creating the draft flow on first use.
    pub async fn create_node(
        &self,
        org: &OrgContext,
        flow_id: Uuid,
        new: NewNode,
    ) -> Result<Node, FlowError> {
        let flow = self.open_draft(org, flow_id).await?;
        let existing = self.store.list_nodes(flow.id).await?;
        let order_index =
            next_order_index(existing.iter().map(|n| &n.order_index), new.order_index);

        let node = new.into_node(flow.id, order_index);
        self.store.insert_node(&node).await?;

        let completion = validator::validate_node(&node);
        info!(
            node_id = %node.id,
            flow_id = %flow.id,
            node_type = %node.node_type,
            order_index,
            complete = completion.is_complete,
            "Node created"
        );
        self.events.emit(FlowEvent::NodeCreated {
            node: node.clone(),
            completion,
        });
        Ok(node)
    }

    /// Merge `patch` into a node and bump its version.
    pub async fn update_node(
        &self,
        org: &OrgContext,
        node_id: Uuid,
        patch: NodePatch,
    ) -> Result<Node, FlowError> {
        let (flow, mut node) = self.scoped_node(org, node_id).await?;
        ensure_draft(&flow)?;

        if self.strict_versions && patch.expected_version.is_none() {
            return Err(FlowError::invalid_flow(
                flow.id,
                "node updates must carry expected_version",
            ));
        }
        if let Some(expected) = patch.expected_version
            && expected != node.version
        {
            warn!(node_id = %node_id, expected, actual = node.version, "Stale node update rejected");
            return Err(FlowError::VersionConflict {
                node_id,
                expected,
                actual: node.version,
            });
        }

        patch.apply_to(&mut node);
        node.version += 1;
        node.updated_at = Utc::now();

        if !self.store.update_node(&node, patch.expected_version).await? {
            // Lost a race between our read and the write.
            return Err(match (patch.expected_version, self.store.get_node(node_id).await?) {
                (Some(expected), Some(current)) => {
                    warn!(node_id = %node_id, expected, actual = current.version, "Stale node update rejected");
                    FlowError::VersionConflict {
                        node_id,
                        expected,
                        actual: current.version,
                    }
                }
                _ => FlowError::not_found("node", node_id),
            });
        }

        let completion = validator::validate_node(&node);
        info!(
            node_id = %node_id,
            version = node.version,
            complete = completion.is_complete,
            "Node updated"
        );
        self.events.emit(FlowEvent::NodeUpdated {
            node: node.clone(),
            completion,
        });
        Ok(node)
    }

    /// Persist a node's canvas position. Version and completion are unaffected.
    pub async fn move_node(
        &self,
        org: &OrgContext,
        node_id: Uuid,
        position: Position,
    ) -> Result<Node, FlowError> {
        let (flow, mut node) = self.scoped_node(org, node_id).await?;
        ensure_draft(&flow)?;

        if !self.store.update_node_position(node_id, position).await? {
            return Err(FlowError::not_found("node", node_id));
        }
        node.position = position;
        self.events.emit(FlowEvent::NodeMoved {
            flow_id: flow.id,
            node_id,
            position,
        });
        Ok(node)
    }

    /// Delete a node and every edge touching it. Returns the removed edge IDs.
    ///
    /// Deleting a node that does not exist is a successful no-op.
    pub async fn delete_node(&self, org: &OrgContext, node_id: Uuid) -> Result<Vec<Uuid>, FlowError> {
        let Some(node) = self.store.get_node(node_id).await? else {
            return Ok(Vec::new());
        };
        let flow = load_scoped_flow(self.store.as_ref(), org, node.flow_id)
            .await
            .map_err(|_| FlowError::not_found("node", node_id))?;
        ensure_draft(&flow)?;

        let removed_edges = self.store.delete_node(node_id).await?;
        info!(
            node_id = %node_id,
            flow_id = %flow.id,
            removed_edges = removed_edges.len(),
            "Node deleted"
        );
        self.events.emit(FlowEvent::NodeDeleted {
            flow_id: flow.id,
            node_id,
            removed_edges: removed_edges.clone(),
        });
        Ok(removed_edges)
    }

    /// Connect two nodes of the same draft flow.
    pub async fn create_edge(
        &self,
        org: &OrgContext,
        flow_id: Uuid,
        source: Uuid,
        target: Uuid,
    ) -> Result<Edge, FlowError> {
        let flow = load_scoped_flow(self.store.as_ref(), org, flow_id).await?;
        ensure_draft(&flow)?;

        let source_node = self
            .store
            .get_node(source)
            .await?
            .ok_or_else(|| FlowError::not_found("node", source))?;
        let target_node = self
            .store
            .get_node(target)
            .await?
            .ok_or_else(|| FlowError::not_found("node", target))?;

        if source_node.flow_id != flow.id || target_node.flow_id != flow.id {
            warn!(
                flow_id = %flow.id,
                source = %source,
                target = %target,
                "Cross-flow edge rejected"
            );
            return Err(FlowError::CrossFlowReference {
                edge_flow: flow.id,
                source_flow: source_node.flow_id,
                target_flow: target_node.flow_id,
            });
        }

        let edge = Edge::new(flow.id, source, target);
        self.store.insert_edge(&edge).await?;
        info!(edge_id = %edge.id, flow_id = %flow.id, "Edge created");
        self.events.emit(FlowEvent::EdgeCreated { edge: edge.clone() });
        Ok(edge)
    }

    /// Remove an edge. Removing one that does not exist is a no-op.
    pub async fn delete_edge(&self, org: &OrgContext, edge_id: Uuid) -> Result<(), FlowError> {
        let Some(edge) = self.store.get_edge(edge_id).await? else {
            return Ok(());
        };
        let flow = load_scoped_flow(self.store.as_ref(), org, edge.flow_id)
            .await
            .map_err(|_| FlowError::not_found("edge", edge_id))?;
        ensure_draft(&flow)?;

        if self.store.delete_edge(edge_id).await? {
            info!(edge_id = %edge_id, flow_id = %flow.id, "Edge deleted");
            self.events.emit(FlowEvent::EdgeDeleted {
                flow_id: flow.id,
                edge_id,
            });
        }
        Ok(())
    }

    /// Upload a document and store its reference in `config.document_file`.
    pub async fn attach_document(
        &self,
        org: &OrgContext,
        node_id: Uuid,
        documents: &dyn DocumentStore,
        upload: DocumentUpload,
    ) -> Result<Node, FlowError> {
        let (flow, node) = self.scoped_node(org, node_id).await?;
        ensure_draft(&flow)?;

        let file = documents.put(&org.org_id, node_id, upload).await?;
        let value = serde_json::to_value(&file)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.update_node(
            org,
            node_id,
            NodePatch::config("document_file", value).expecting(node.version),
        )
        .await
    }

    /// Seed `flow_id` with `steps` in order (`order_index` 0..N-1), creating
    /// the draft if it does not exist. The target must be an empty draft, and
    /// the flow and its nodes are written together or not at all.
    pub async fn seed_draft(
        &self,
        org: &OrgContext,
        flow_id: Uuid,
        steps: Vec<NewNode>,
    ) -> Result<Flow, FlowError> {
        let (flow, created) = match self.store.get_flow(flow_id).await? {
            Some(flow) if flow.org_id == org.org_id => {
                ensure_draft(&flow)?;
                if !self.store.list_nodes(flow.id).await?.is_empty() {
                    return Err(FlowError::invalid_flow(
                        flow.id,
                        "only an empty draft can be seeded",
                    ));
                }
                (flow, false)
            }
            Some(_) => return Err(FlowError::not_found("flow", flow_id)),
            None => (Flow::new_draft(flow_id, &org.org_id), true),
        };

        let nodes: Vec<Node> = steps
            .into_iter()
            .zip(0u32..)
            .map(|(new, index)| new.into_node(flow.id, index))
            .collect();
        self.store
            .insert_graph(&flow, &nodes, &[])
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(reason) => FlowError::invalid_flow(flow.id, reason),
                other => other.into(),
            })?;

        info!(flow_id = %flow.id, nodes = nodes.len(), created, "Draft seeded");
        if created {
            self.events.emit(FlowEvent::FlowCreated { flow: flow.clone() });
        }
        for node in nodes {
            let completion = validator::validate_node(&node);
            self.events.emit(FlowEvent::NodeCreated { node, completion });
        }
        Ok(flow)
    }

    /// Return the organization's draft, forking one from the published flow
    /// when none exists. The copy gets fresh node and edge IDs; each node
    /// remembers the step it descends from through `origin_id`.
    pub async fn fork_draft(&self, org: &OrgContext) -> Result<Flow, FlowError> {
        if let Some(draft) = self.draft(org).await? {
            return Ok(draft);
        }
        let published = self
            .published(org)
            .await?
            .ok_or_else(|| FlowError::not_found("published flow", &org.org_id))?;

        let draft = Flow::new_draft(Uuid::new_v4(), &org.org_id);
        let now = Utc::now();

        let mut id_map = HashMap::new();
        let mut nodes = Vec::new();
        for node in self.store.list_nodes(published.id).await? {
            let copy = Node {
                id: Uuid::new_v4(),
                flow_id: draft.id,
                version: 1,
                origin_id: Some(node.lineage()),
                created_at: now,
                updated_at: now,
                ..node
            };
            id_map.insert(node.id, copy.id);
            nodes.push(copy);
        }
        let edges: Vec<Edge> = self
            .store
            .list_edges(published.id)
            .await?
            .into_iter()
            .filter_map(|edge| {
                let source = *id_map.get(&edge.source)?;
                let target = *id_map.get(&edge.target)?;
                Some(Edge::new(draft.id, source, target))
            })
            .collect();

        match self.store.insert_graph(&draft, &nodes, &edges).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                // Lost a race with another fork or a fresh draft.
                return self
                    .draft(org)
                    .await?
                    .ok_or_else(|| FlowError::invalid_flow(draft.id, "draft fork conflicted"));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            flow_id = %draft.id,
            from = %published.id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Draft forked from published flow"
        );
        self.events.emit(FlowEvent::FlowCreated { flow: draft.clone() });
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::model::NodeType;
    use crate::store::interleave::{After, InterleavedStore};
    use crate::store::{MemoryDocumentStore, MemoryStore};
    use serde_json::json;

    fn composer() -> Composer {
        Composer::new(Arc::new(MemoryStore::new()), EventBus::new())
    }

    fn org() -> OrgContext {
        OrgContext::new("org-1")
    }

    #[test]
    fn order_index_resolution() {
        assert_eq!(next_order_index(&[], None), 0);
        assert_eq!(next_order_index(&[0, 1, 4], None), 5);
        assert_eq!(next_order_index(&[0, 1, 4], Some(2)), 2);
        assert_eq!(next_order_index(&[0, 1, 4], Some(1)), 5);
    }

    #[tokio::test]
    async fn first_node_creates_the_draft() {
        let c = composer();
        let flow_id = Uuid::new_v4();
        let mut rx = c.events().subscribe();

        let node = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Welcome, "Welcome"))
            .await
            .unwrap();
        assert_eq!(node.order_index, 0);
        assert_eq!(c.draft(&org()).await.unwrap().unwrap().id, flow_id);

        assert!(matches!(rx.recv().await.unwrap(), FlowEvent::FlowCreated { .. }));
        match rx.recv().await.unwrap() {
            FlowEvent::NodeCreated { completion, .. } => {
                assert_eq!(completion.missing_fields, vec!["document_file.url"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_after_gap_uses_max_plus_one() {
        let c = composer();
        let flow_id = Uuid::new_v4();
        for (i, title) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            let node = c
                .create_node(&org(), flow_id, NewNode::new(NodeType::Call, title))
                .await
                .unwrap();
            assert_eq!(node.order_index, i as u32);
        }
        let graph = c.graph(&org(), flow_id).await.unwrap();
        c.delete_node(&org(), graph.nodes[2].id).await.unwrap();
        c.delete_node(&org(), graph.nodes[3].id).await.unwrap();

        let node = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "f"))
            .await
            .unwrap();
        assert_eq!(node.order_index, 5);

        let explicit = c
            .create_node(
                &org(),
                flow_id,
                NewNode::new(NodeType::Call, "g").with_order_index(2),
            )
            .await
            .unwrap();
        assert_eq!(explicit.order_index, 2);
    }

    #[tokio::test]
    async fn cross_flow_edge_is_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let c = Composer::new(store.clone(), EventBus::new());
        let other_org = OrgContext::new("org-2");

        let flow1 = Uuid::new_v4();
        let a = c
            .create_node(&org(), flow1, NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let b = c
            .create_node(&other_org, Uuid::new_v4(), NewNode::new(NodeType::Call, "B"))
            .await
            .unwrap();

        let err = c.create_edge(&org(), flow1, a.id, b.id).await.unwrap_err();
        assert!(matches!(err, FlowError::CrossFlowReference { .. }));
        assert!(store.list_edges(flow1).await.unwrap().is_empty());
        assert!(store.list_edges(b.flow_id).await.unwrap().is_empty());

        let err = c
            .create_edge(&org(), flow1, a.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound { entity: "node", .. }));
    }

    #[tokio::test]
    async fn update_merges_patch_and_bumps_version() {
        let c = composer();
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Payment, "Deposit"))
            .await
            .unwrap();

        let updated = c
            .update_node(
                &org(),
                node.id,
                NodePatch::config("stripe_url", json!("https://buy.stripe.com/x")),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.order_index, node.order_index);
        assert_eq!(updated.flow_id, node.flow_id);
        assert!(validator::validate_node(&updated).is_complete);
    }

    #[tokio::test]
    async fn stale_update_conflicts_and_leaves_node_untouched() {
        let c = composer();
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Call, "Kickoff"))
            .await
            .unwrap();
        c.update_node(&org(), node.id, NodePatch::title("Intro call").expecting(1))
            .await
            .unwrap();

        let err = c
            .update_node(&org(), node.id, NodePatch::title("Other").expecting(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        let stored = c.store().get_node(node.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Intro call");
    }

    #[tokio::test]
    async fn strict_versions_require_expected_version() {
        let c = composer().with_strict_versions(true);
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Call, "Kickoff"))
            .await
            .unwrap();
        let err = c
            .update_node(&org(), node.id, NodePatch::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidFlow { .. }));
        assert!(c
            .update_node(&org(), node.id, NodePatch::title("x").expecting(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_unknown_node_is_not_found() {
        let c = composer();
        let err = c
            .update_node(&org(), Uuid::new_v4(), NodePatch::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound { entity: "node", .. }));
    }

    #[tokio::test]
    async fn delete_node_cascades_and_is_idempotent() {
        let c = composer();
        let flow_id = Uuid::new_v4();
        let a = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let b = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "B"))
            .await
            .unwrap();
        let edge = c.create_edge(&org(), flow_id, a.id, b.id).await.unwrap();

        assert_eq!(c.delete_node(&org(), b.id).await.unwrap(), vec![edge.id]);
        assert!(c.delete_node(&org(), b.id).await.unwrap().is_empty());
        assert!(c.graph(&org(), flow_id).await.unwrap().edges.is_empty());

        c.delete_edge(&org(), edge.id).await.unwrap();
    }

    #[tokio::test]
    async fn move_node_keeps_version() {
        let c = composer();
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let moved = c
            .move_node(&org(), node.id, Position::new(300.0, 80.0))
            .await
            .unwrap();
        assert_eq!(moved.position, Position::new(300.0, 80.0));
        let stored = c.store().get_node(node.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.order_index, node.order_index);
    }

    #[tokio::test]
    async fn other_orgs_cannot_see_nodes() {
        let c = composer();
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let intruder = OrgContext::new("org-9");
        assert!(matches!(
            c.update_node(&intruder, node.id, NodePatch::title("x")).await,
            Err(FlowError::NotFound { .. })
        ));
        assert!(matches!(
            c.graph(&intruder, node.flow_id).await,
            Err(FlowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn attach_document_completes_welcome_node() {
        let c = composer();
        let docs = MemoryDocumentStore::new();
        let node = c
            .create_node(&org(), Uuid::new_v4(), NewNode::new(NodeType::Welcome, "Welcome"))
            .await
            .unwrap();

        let updated = c
            .attach_document(
                &org(),
                node.id,
                &docs,
                DocumentUpload {
                    name: "welcome.pdf".into(),
                    content_type: "application/pdf".into(),
                    bytes: b"%PDF".to_vec(),
                },
            )
            .await
            .unwrap();

        assert!(validator::validate_node(&updated).is_complete);
        let url = updated.config["document_file"]["url"].as_str().unwrap();
        assert_eq!(docs.get(url).await.unwrap(), b"%PDF".to_vec());
        assert_eq!(updated.config["document_file"]["type"], "application/pdf");
    }

    #[tokio::test]
    async fn published_flow_is_immutable_until_forked() {
        let c = composer();
        let flow_id = Uuid::new_v4();
        let a = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let b = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "B"))
            .await
            .unwrap();
        c.create_edge(&org(), flow_id, a.id, b.id).await.unwrap();
        let nodes = c.store().list_nodes(flow_id).await.unwrap();
        c.store().commit_publish(flow_id, &nodes, None).await.unwrap();

        let err = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "C"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidFlow { .. }));
        assert!(matches!(
            c.update_node(&org(), a.id, NodePatch::title("x")).await,
            Err(FlowError::InvalidFlow { .. })
        ));
        assert!(matches!(
            c.delete_node(&org(), a.id).await,
            Err(FlowError::InvalidFlow { .. })
        ));

        let draft = c.fork_draft(&org()).await.unwrap();
        assert_ne!(draft.id, flow_id);
        let graph = c.graph(&org(), draft.id).await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.nodes.iter().all(|n| n.id != a.id && n.id != b.id));
        assert_eq!(graph.edges[0].source, graph.nodes[0].id);
        assert_eq!(graph.nodes[0].origin_id, Some(a.id));
        assert_eq!(graph.nodes[1].lineage(), b.id);

        // Second fork returns the same draft.
        assert_eq!(c.fork_draft(&org()).await.unwrap().id, draft.id);
    }

    #[tokio::test]
    async fn fork_without_published_flow_is_not_found() {
        let c = composer();
        assert!(matches!(
            c.fork_draft(&org()).await,
            Err(FlowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_first_creates_share_the_draft() {
        let memory = Arc::new(MemoryStore::new());
        let flow_id = Uuid::new_v4();
        // The other caller creates the draft right after our existence check.
        let racing = InterleavedStore::new(memory.clone(), After::GetFlow, move |store| async move {
            store.insert_flow(&Flow::new_draft(flow_id, "org-1")).await.unwrap();
        });
        let c = Composer::new(Arc::new(racing), EventBus::new());

        let node = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "Kickoff"))
            .await
            .unwrap();
        assert_eq!(node.flow_id, flow_id);
        assert_eq!(memory.list_nodes(flow_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_different_existing_draft_still_blocks_open() {
        let memory = Arc::new(MemoryStore::new());
        let racing = InterleavedStore::new(memory.clone(), After::GetFlow, |store| async move {
            store
                .insert_flow(&Flow::new_draft(Uuid::new_v4(), "org-1"))
                .await
                .unwrap();
        });
        let c = Composer::new(Arc::new(racing), EventBus::new());

        let flow_id = Uuid::new_v4();
        let err = c.open_draft(&org(), flow_id).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidFlow { .. }));
        assert!(memory.get_flow(flow_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forks_keep_lineage_across_generations() {
        let c = composer();
        let flow_id = Uuid::new_v4();
        let a = c
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let nodes = c.store().list_nodes(flow_id).await.unwrap();
        c.store().commit_publish(flow_id, &nodes, None).await.unwrap();

        let second = c.fork_draft(&org()).await.unwrap();
        let nodes = c.store().list_nodes(second.id).await.unwrap();
        c.store()
            .commit_publish(second.id, &nodes, Some(flow_id))
            .await
            .unwrap();

        let third = c.fork_draft(&org()).await.unwrap();
        let graph = c.graph(&org(), third.id).await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_ne!(graph.nodes[0].id, nodes[0].id);
        assert_eq!(graph.nodes[0].lineage(), a.id);
    }

    #[tokio::test]
    async fn fork_that_loses_a_race_returns_the_winning_draft() {
        let memory = Arc::new(MemoryStore::new());
        let setup = Composer::new(memory.clone(), EventBus::new());
        let flow_id = Uuid::new_v4();
        setup
            .create_node(&org(), flow_id, NewNode::new(NodeType::Call, "A"))
            .await
            .unwrap();
        let nodes = memory.list_nodes(flow_id).await.unwrap();
        memory.commit_publish(flow_id, &nodes, None).await.unwrap();

        let winner = Flow::new_draft(Uuid::new_v4(), "org-1");
        let racing = InterleavedStore::new(memory.clone(), After::FindFlow(FlowStatus::Draft), {
            let winner = winner.clone();
            move |store| async move {
                store.insert_flow(&winner).await.unwrap();
            }
        });
        let c = Composer::new(Arc::new(racing), EventBus::new());

        let draft = c.fork_draft(&org()).await.unwrap();
        assert_eq!(draft.id, winner.id);
        assert!(memory.list_nodes(winner.id).await.unwrap().is_empty());
        assert_eq!(
            memory.find_flow("org-1", FlowStatus::Draft).await.unwrap().map(|f| f.id),
            Some(winner.id)
        );
    }
}
