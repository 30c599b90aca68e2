//! REST endpoints for flow authoring and client onboarding.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

use super::canvas::{self, CanvasDocument};
use super::composer::Composer;
use super::events::EventBus;
use super::model::{Edge, Flow, FlowGraph, NewNode, Node, NodePatch, OrgContext};
use super::progress::{ProgressTracker, ProgressView};
use super::publish::PublishGate;
use super::registry::{self, NodeTypeSpec};
use super::templates::{self, FlowTemplate};
use super::validator::SetupChecklist;
use crate::error::FlowError;
use crate::store::traits::{DocumentStore, DocumentUpload, FlowStore};

/// Shared state for flow routes.
#[derive(Clone)]
pub struct FlowRouteState {
    pub composer: Arc<Composer>,
    pub gate: Arc<PublishGate>,
    pub tracker: Arc<ProgressTracker>,
    pub documents: Arc<dyn DocumentStore>,
}

impl FlowRouteState {
    /// Wire the flow services over one store and a shared event bus.
    pub fn new(
        store: Arc<dyn FlowStore>,
        documents: Arc<dyn DocumentStore>,
        events: EventBus,
        strict_versions: bool,
    ) -> Self {
        Self {
            composer: Arc::new(
                Composer::new(store.clone(), events.clone()).with_strict_versions(strict_versions),
            ),
            gate: Arc::new(PublishGate::new(store.clone(), events)),
            tracker: Arc::new(ProgressTracker::new(store)),
            documents,
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = match &self {
            FlowError::NotFound { .. } | FlowError::UnknownTemplate(_) => StatusCode::NOT_FOUND,
            FlowError::CrossFlowReference { .. } => StatusCode::BAD_REQUEST,
            FlowError::InvalidFlow { .. } | FlowError::VersionConflict { .. } => {
                StatusCode::CONFLICT
            }
            FlowError::IncompletePublish { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FlowError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            FlowError::IncompletePublish { titles } => serde_json::json!({
                "error": self.to_string(),
                "incomplete_titles": titles,
            }),
            FlowError::Persistence(e) => {
                error!(error = %e, "Store operation failed");
                serde_json::json!({"error": "Failed to save changes"})
            }
            _ => serde_json::json!({"error": self.to_string()}),
        };

        (status, Json(body)).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/node-types
async fn list_node_types() -> Json<&'static [NodeTypeSpec]> {
    Json(registry::all())
}

/// GET /api/templates
async fn list_templates() -> Json<&'static [FlowTemplate]> {
    Json(templates::all())
}

/// GET /api/orgs/{org_id}/flows/draft
///
/// The organization's draft graph, or 404 if there is none.
async fn get_draft(
    State(state): State<FlowRouteState>,
    Path(org_id): Path<String>,
) -> Result<Json<FlowGraph>, FlowError> {
    let org = OrgContext::new(org_id);
    let draft = state
        .composer
        .draft(&org)
        .await?
        .ok_or_else(|| FlowError::not_found("draft flow", &org.org_id))?;
    Ok(Json(state.composer.graph(&org, draft.id).await?))
}

/// POST /api/orgs/{org_id}/flows/draft/fork
async fn fork_draft(
    State(state): State<FlowRouteState>,
    Path(org_id): Path<String>,
) -> Result<Json<Flow>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.composer.fork_draft(&org).await?))
}

#[derive(Debug, Deserialize)]
struct InstantiateRequest {
    #[serde(default)]
    template_id: Option<String>,
}

/// POST /api/orgs/{org_id}/flows/{flow_id}/instantiate
async fn instantiate(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
    Json(req): Json<InstantiateRequest>,
) -> Result<(StatusCode, Json<Flow>), FlowError> {
    let org = OrgContext::new(org_id);
    let flow =
        templates::instantiate(&state.composer, &org, flow_id, req.template_id.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(flow)))
}

/// GET /api/orgs/{org_id}/flows/{flow_id}
async fn get_flow(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
) -> Result<Json<FlowGraph>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.composer.graph(&org, flow_id).await?))
}

/// GET /api/orgs/{org_id}/flows/{flow_id}/canvas
async fn get_canvas(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
) -> Result<Json<CanvasDocument>, FlowError> {
    let org = OrgContext::new(org_id);
    let graph = state.composer.graph(&org, flow_id).await?;
    Ok(Json(canvas::to_canvas(&graph)))
}

/// GET /api/orgs/{org_id}/flows/{flow_id}/readiness
async fn get_readiness(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
) -> Result<Json<SetupChecklist>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.gate.readiness(&org, flow_id).await?))
}

/// POST /api/orgs/{org_id}/flows/{flow_id}/publish
async fn publish(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
) -> Result<Json<Flow>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.gate.publish(&org, flow_id).await?))
}

/// POST /api/orgs/{org_id}/flows/{flow_id}/nodes
async fn create_node(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
    Json(new): Json<NewNode>,
) -> Result<(StatusCode, Json<Node>), FlowError> {
    let org = OrgContext::new(org_id);
    let node = state.composer.create_node(&org, flow_id, new).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

#[derive(Debug, Deserialize)]
struct CreateEdgeRequest {
    source: Uuid,
    target: Uuid,
}

/// POST /api/orgs/{org_id}/flows/{flow_id}/edges
async fn create_edge(
    State(state): State<FlowRouteState>,
    Path((org_id, flow_id)): Path<(String, Uuid)>,
    Json(req): Json<CreateEdgeRequest>,
) -> Result<(StatusCode, Json<Edge>), FlowError> {
    let org = OrgContext::new(org_id);
    let edge = state
        .composer
        .create_edge(&org, flow_id, req.source, req.target)
        .await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// PATCH /api/orgs/{org_id}/nodes/{node_id}
async fn update_node(
    State(state): State<FlowRouteState>,
    Path((org_id, node_id)): Path<(String, Uuid)>,
    Json(patch): Json<NodePatch>,
) -> Result<Json<Node>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.composer.update_node(&org, node_id, patch).await?))
}

/// DELETE /api/orgs/{org_id}/nodes/{node_id}
async fn delete_node(
    State(state): State<FlowRouteState>,
    Path((org_id, node_id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>, FlowError> {
    let org = OrgContext::new(org_id);
    let removed = state.composer.delete_node(&org, node_id).await?;
    Ok(Json(serde_json::json!({"removed_edges": removed})))
}

/// PUT /api/orgs/{org_id}/nodes/{node_id}/position
///
/// Accepts the renderer's node payload or a bare `{x, y}`.
async fn move_node(
    State(state): State<FlowRouteState>,
    Path((org_id, node_id)): Path<(String, Uuid)>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Some(position) = canvas::position_from_canvas(&body) else {
        return bad_request("Expected numeric x and y");
    };
    let org = OrgContext::new(org_id);
    match state.composer.move_node(&org, node_id, position).await {
        Ok(node) => Json(node).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AttachDocumentRequest {
    name: String,
    content_type: String,
    #[serde(default)]
    content: String,
}

/// POST /api/orgs/{org_id}/nodes/{node_id}/document
async fn attach_document(
    State(state): State<FlowRouteState>,
    Path((org_id, node_id)): Path<(String, Uuid)>,
    Json(req): Json<AttachDocumentRequest>,
) -> Result<Json<Node>, FlowError> {
    let org = OrgContext::new(org_id);
    let upload = DocumentUpload {
        name: req.name,
        content_type: req.content_type,
        bytes: req.content.into_bytes(),
    };
    let node = state
        .composer
        .attach_document(&org, node_id, state.documents.as_ref(), upload)
        .await?;
    Ok(Json(node))
}

/// DELETE /api/orgs/{org_id}/edges/{edge_id}
async fn delete_edge(
    State(state): State<FlowRouteState>,
    Path((org_id, edge_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, FlowError> {
    let org = OrgContext::new(org_id);
    state.composer.delete_edge(&org, edge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/orgs/{org_id}/clients/{user_id}/onboarding
async fn get_onboarding(
    State(state): State<FlowRouteState>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Result<Json<ProgressView>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.tracker.start(&org, &user_id).await?))
}

/// POST /api/orgs/{org_id}/clients/{user_id}/onboarding/{node_id}/complete
async fn complete_step(
    State(state): State<FlowRouteState>,
    Path((org_id, user_id, node_id)): Path<(String, String, Uuid)>,
) -> Result<Json<ProgressView>, FlowError> {
    let org = OrgContext::new(org_id);
    Ok(Json(state.tracker.complete(&org, &user_id, node_id).await?))
}

/// CORS policy: permissive when no origins are configured.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the flow REST routes.
pub fn flow_routes(state: FlowRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/node-types", get(list_node_types))
        .route("/api/templates", get(list_templates))
        .route("/api/orgs/{org_id}/flows/draft", get(get_draft))
        .route("/api/orgs/{org_id}/flows/draft/fork", post(fork_draft))
        .route("/api/orgs/{org_id}/flows/{flow_id}", get(get_flow))
        .route(
            "/api/orgs/{org_id}/flows/{flow_id}/instantiate",
            post(instantiate),
        )
        .route("/api/orgs/{org_id}/flows/{flow_id}/canvas", get(get_canvas))
        .route(
            "/api/orgs/{org_id}/flows/{flow_id}/readiness",
            get(get_readiness),
        )
        .route("/api/orgs/{org_id}/flows/{flow_id}/publish", post(publish))
        .route("/api/orgs/{org_id}/flows/{flow_id}/nodes", post(create_node))
        .route("/api/orgs/{org_id}/flows/{flow_id}/edges", post(create_edge))
        .route(
            "/api/orgs/{org_id}/nodes/{node_id}",
            patch(update_node).delete(delete_node),
        )
        .route("/api/orgs/{org_id}/nodes/{node_id}/position", put(move_node))
        .route(
            "/api/orgs/{org_id}/nodes/{node_id}/document",
            post(attach_document),
        )
        .route("/api/orgs/{org_id}/edges/{edge_id}", delete(delete_edge))
        .route(
            "/api/orgs/{org_id}/clients/{user_id}/onboarding",
            get(get_onboarding),
        )
        .route(
            "/api/orgs/{org_id}/clients/{user_id}/onboarding/{node_id}/complete",
            post(complete_step),
        )
        .with_state(state)
}
