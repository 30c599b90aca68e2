//! Publish gate: the draft → published transition.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::composer::load_scoped_flow;
use super::events::{EventBus, FlowEvent};
use super::model::{Flow, FlowStatus, OrgContext};
use super::validator::SetupChecklist;
use crate::error::{DatabaseError, FlowError};
use crate::store::traits::FlowStore;

pub struct PublishGate {
    store: Arc<dyn FlowStore>,
    events: EventBus,
}

impl PublishGate {
    pub fn new(store: Arc<dyn FlowStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Per-node completion for the flow, without attempting a publish.
    pub async fn readiness(&self, org: &OrgContext, flow_id: Uuid) -> Result<SetupChecklist, FlowError> {
        let flow = load_scoped_flow(self.store.as_ref(), org, flow_id).await?;
        let nodes = self.store.list_nodes(flow.id).await?;
        Ok(SetupChecklist::from_nodes(&nodes))
    }

    /// Publish a draft.
    ///
    /// Every node must pass validation; otherwise this fails with
    /// `IncompletePublish` listing each incomplete node's title in
    /// `order_index` order, and the draft is left as it was. On success all
    /// nodes are saved, any previously published flow is archived, and the
    /// status flips, as one atomic commit. If the draft changed after it was
    /// validated, nothing is written and this fails with `InvalidFlow`.
    pub async fn publish(&self, org: &OrgContext, flow_id: Uuid) -> Result<Flow, FlowError> {
        let flow = load_scoped_flow(self.store.as_ref(), org, flow_id).await?;
        if !flow.is_draft() {
            return Err(FlowError::invalid_flow(
                flow.id,
                format!("flow is already {}", flow.status),
            ));
        }

        let nodes = self.store.list_nodes(flow.id).await?;
        let checklist = SetupChecklist::from_nodes(&nodes);
        if !checklist.is_ready() {
            let titles = checklist.incomplete_titles();
            warn!(flow_id = %flow.id, incomplete = titles.len(), "Publish blocked by incomplete steps");
            return Err(FlowError::IncompletePublish { titles });
        }

        let superseded = self
            .store
            .find_flow(&org.org_id, FlowStatus::Published)
            .await?
            .map(|f| f.id);
        let published = self
            .store
            .commit_publish(flow.id, &nodes, superseded)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(reason) | DatabaseError::Constraint(reason) => {
                    warn!(flow_id = %flow.id, %reason, "Publish aborted by a concurrent change");
                    FlowError::invalid_flow(flow.id, reason)
                }
                other => other.into(),
            })?;

        info!(
            flow_id = %published.id,
            org_id = %org.org_id,
            nodes = nodes.len(),
            superseded = ?superseded,
            "Flow published"
        );
        self.events.emit(FlowEvent::FlowPublished {
            flow: published.clone(),
            superseded,
        });
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::composer::Composer;
    use crate::flows::model::{NewNode, NodePatch, NodeType};
    use crate::store::MemoryStore;
    use crate::store::interleave::{After, InterleavedStore};
    use serde_json::json;

    struct Fixture {
        composer: Composer,
        gate: PublishGate,
        org: OrgContext,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn FlowStore> = Arc::new(MemoryStore::new());
        let events = EventBus::new();
        Fixture {
            composer: Composer::new(store.clone(), events.clone()),
            gate: PublishGate::new(store, events),
            org: OrgContext::new("org-1"),
        }
    }

    async fn three_step_flow(f: &Fixture, stripe_url: &str) -> Uuid {
        let flow_id = Uuid::new_v4();
        f.composer
            .create_node(
                &f.org,
                flow_id,
                NewNode::new(NodeType::Welcome, "Welcome").with_config(
                    "document_file",
                    json!({"url": "https://files.example/w.pdf", "name": "w.pdf", "type": "application/pdf"}),
                ),
            )
            .await
            .unwrap();
        f.composer
            .create_node(
                &f.org,
                flow_id,
                NewNode::new(NodeType::Payment, "Pay deposit")
                    .with_config("stripe_url", json!(stripe_url)),
            )
            .await
            .unwrap();
        f.composer
            .create_node(&f.org, flow_id, NewNode::new(NodeType::Call, "Kickoff call"))
            .await
            .unwrap();
        flow_id
    }

    #[tokio::test]
    async fn incomplete_node_blocks_publish() {
        let f = fixture();
        let flow_id = three_step_flow(&f, "").await;

        let err = f.gate.publish(&f.org, flow_id).await.unwrap_err();
        match err {
            FlowError::IncompletePublish { titles } => assert_eq!(titles, vec!["Pay deposit"]),
            other => panic!("unexpected error: {other:?}"),
        }
        let flow = f.composer.store().get_flow(flow_id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Draft);
    }

    #[tokio::test]
    async fn titles_are_listed_in_order_index_order() {
        let f = fixture();
        let flow_id = Uuid::new_v4();
        f.composer
            .create_node(
                &f.org,
                flow_id,
                NewNode::new(NodeType::Consent, "Consent").with_order_index(3),
            )
            .await
            .unwrap();
        f.composer
            .create_node(
                &f.org,
                flow_id,
                NewNode::new(NodeType::Contract, "Sign MSA").with_order_index(1),
            )
            .await
            .unwrap();
        f.composer
            .create_node(&f.org, flow_id, NewNode::new(NodeType::Upload, "Logo").with_order_index(0))
            .await
            .unwrap();

        let checklist = f.gate.readiness(&f.org, flow_id).await.unwrap();
        assert_eq!(checklist.incomplete_count, 2);

        match f.gate.publish(&f.org, flow_id).await.unwrap_err() {
            FlowError::IncompletePublish { titles } => {
                assert_eq!(titles, vec!["Sign MSA", "Consent"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_flow_publishes() {
        let f = fixture();
        let mut rx = f.composer.events().subscribe();
        let flow_id = three_step_flow(&f, "https://buy.stripe.com/abc").await;

        let flow = f.gate.publish(&f.org, flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Published);
        assert!(flow.published_at.is_some());

        let mut saw_publish = false;
        while let Ok(event) = rx.try_recv() {
            if let FlowEvent::FlowPublished { flow, superseded } = event {
                assert_eq!(flow.id, flow_id);
                assert!(superseded.is_none());
                saw_publish = true;
            }
        }
        assert!(saw_publish);

        // Published flows cannot be published again.
        assert!(matches!(
            f.gate.publish(&f.org, flow_id).await,
            Err(FlowError::InvalidFlow { .. })
        ));
    }

    #[tokio::test]
    async fn empty_flow_is_publishable() {
        let f = fixture();
        let flow = f.composer.open_draft(&f.org, Uuid::new_v4()).await.unwrap();
        let published = f.gate.publish(&f.org, flow.id).await.unwrap();
        assert_eq!(published.status, FlowStatus::Published);
    }

    #[tokio::test]
    async fn republishing_a_fork_archives_the_old_flow() {
        let f = fixture();
        let first = three_step_flow(&f, "https://buy.stripe.com/abc").await;
        f.gate.publish(&f.org, first).await.unwrap();

        let draft = f.composer.fork_draft(&f.org).await.unwrap();
        let graph = f.composer.graph(&f.org, draft.id).await.unwrap();
        f.composer
            .update_node(&f.org, graph.nodes[2].id, NodePatch::title("Strategy call"))
            .await
            .unwrap();
        f.gate.publish(&f.org, draft.id).await.unwrap();

        let store = f.composer.store();
        assert_eq!(
            store.get_flow(first).await.unwrap().unwrap().status,
            FlowStatus::Archived
        );
        let live = f.composer.published(&f.org).await.unwrap().unwrap();
        assert_eq!(live.id, draft.id);
        assert!(f.composer.draft(&f.org).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edits_after_validation_abort_the_publish() {
        let memory = Arc::new(MemoryStore::new());
        let org = OrgContext::new("org-1");
        let composer = Composer::new(memory.clone(), EventBus::new());
        let flow_id = Uuid::new_v4();
        let kickoff = composer
            .create_node(&org, flow_id, NewNode::new(NodeType::Call, "Kickoff"))
            .await
            .unwrap();

        // Another operator edits a step and adds an incomplete one while the
        // publish is between its check and its commit.
        let edited = {
            let mut node = kickoff.clone();
            node.title = "Edited by operator B".into();
            node.version = 2;
            node
        };
        let late = NewNode::new(NodeType::Payment, "Late incomplete payment").into_node(flow_id, 1);
        let racing = InterleavedStore::new(memory.clone(), After::FindFlow(FlowStatus::Published), {
            let (edited, late) = (edited.clone(), late.clone());
            move |store| async move {
                assert!(store.update_node(&edited, Some(1)).await.unwrap());
                store.insert_node(&late).await.unwrap();
            }
        });
        let gate = PublishGate::new(Arc::new(racing), EventBus::new());

        let err = gate.publish(&org, flow_id).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidFlow { .. }), "got {err:?}");
        assert!(memory.get_flow(flow_id).await.unwrap().unwrap().is_draft());
        let stored = memory.get_node(kickoff.id).await.unwrap().unwrap();
        assert_eq!((stored.title.as_str(), stored.version), ("Edited by operator B", 2));

        // The retry validates the new step.
        match gate.publish(&org, flow_id).await.unwrap_err() {
            FlowError::IncompletePublish { titles } => {
                assert_eq!(titles, vec!["Late incomplete payment"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
