//! Flow data model: flows, nodes, edges, and client progress.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type-specific node configuration. Its shape is defined per node type by
/// the registry.
pub type NodeConfig = serde_json::Map<String, serde_json::Value>;

/// The kind of onboarding step a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Welcome,
    Scope,
    Terms,
    Contract,
    #[serde(alias = "invoice")]
    Payment,
    Consent,
    Upload,
    Connect,
    Call,
}

impl NodeType {
    /// Every node type, in registry order.
    pub const ALL: [NodeType; 9] = [
        NodeType::Welcome,
        NodeType::Scope,
        NodeType::Terms,
        NodeType::Contract,
        NodeType::Payment,
        NodeType::Consent,
        NodeType::Upload,
        NodeType::Connect,
        NodeType::Call,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Scope => "scope",
            Self::Terms => "terms",
            Self::Contract => "contract",
            Self::Payment => "payment",
            Self::Consent => "consent",
            Self::Upload => "upload",
            Self::Connect => "connect",
            Self::Call => "call",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(Self::Welcome),
            "scope" => Ok(Self::Scope),
            "terms" => Ok(Self::Terms),
            "contract" => Ok(Self::Contract),
            "payment" | "invoice" => Ok(Self::Payment),
            "consent" => Ok(Self::Consent),
            "upload" => Ok(Self::Upload),
            "connect" => Ok(Self::Connect),
            "call" => Ok(Self::Call),
            other => Err(format!("Unknown node type: {other}")),
        }
    }
}

/// Lifecycle status of a flow.
///
/// `Draft → Published`. A published flow that is replaced by a newer publish
/// becomes `Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Draft,
    Published,
    Archived,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(format!("Unknown flow status: {other}")),
        }
    }
}

/// The onboarding procedure definition for one client organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub org_id: String,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Flow {
    /// Create a new, empty draft flow.
    pub fn new_draft(id: Uuid, org_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            org_id: org_id.into(),
            status: FlowStatus::Draft,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == FlowStatus::Draft
    }
}

/// Canvas position. Persisted, but carries no meaning for validation or
/// traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single onboarding step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Position,
    /// Unique within the owning flow.
    pub order_index: u32,
    /// Bumped on every persisted content update.
    pub version: i64,
    /// The node this one was first copied from when a draft was forked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Identity shared by every copy of this step across republished flows.
    pub fn lineage(&self) -> Uuid {
        self.origin_id.unwrap_or(self.id)
    }
}

/// Input for creating a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Option<Position>,
    /// Requested `order_index`; ignored when already taken.
    #[serde(default)]
    pub order_index: Option<u32>,
}

fn default_required() -> bool {
    true
}

impl NewNode {
    pub fn new(node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            node_type,
            title: title.into(),
            description: None,
            required: true,
            config: NodeConfig::new(),
            position: None,
            order_index: None,
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Builder: set the required flag.
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Builder: set a top-level config value.
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Builder: set canvas position.
    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Builder: request an explicit `order_index`.
    pub fn with_order_index(mut self, index: u32) -> Self {
        self.order_index = Some(index);
        self
    }

    /// Materialize into a node for `flow_id` at the resolved `order_index`.
    pub fn into_node(self, flow_id: Uuid, order_index: u32) -> Node {
        let now = Utc::now();
        Node {
            id: Uuid::new_v4(),
            flow_id,
            node_type: self.node_type,
            title: self.title,
            description: self.description,
            required: self.required,
            config: self.config,
            position: self.position.unwrap_or_default(),
            order_index,
            version: 1,
            origin_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a node's editable fields.
///
/// `config` is merged key by key: a `null` value removes the key.
/// An empty `description` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default)]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub config: Option<NodeConfig>,
    #[serde(default)]
    pub position: Option<Position>,
    /// When set, the update only applies if the stored node is at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl NodePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn config(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut config = NodeConfig::new();
        config.insert(key.into(), value);
        Self {
            config: Some(config),
            ..Default::default()
        }
    }

    /// Builder: guard the update with an expected version.
    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Merge the patch into `node`. Identity fields (`id`, `flow_id`,
    /// `order_index`) and bookkeeping (`version`, timestamps) are untouched.
    pub fn apply_to(&self, node: &mut Node) {
        if let Some(node_type) = self.node_type {
            node.node_type = node_type;
        }
        if let Some(ref title) = self.title {
            node.title = title.clone();
        }
        if let Some(ref description) = self.description {
            node.description = if description.is_empty() {
                None
            } else {
                Some(description.clone())
            };
        }
        if let Some(required) = self.required {
            node.required = required;
        }
        if let Some(ref config) = self.config {
            for (key, value) in config {
                if value.is_null() {
                    node.config.remove(key);
                } else {
                    node.config.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(position) = self.position {
            node.position = position;
        }
    }
}

/// A directed transition between two nodes of the same flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(flow_id: Uuid, source: Uuid, target: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            source,
            target,
            created_at: Utc::now(),
        }
    }
}

/// A flow with its full node and edge set, nodes sorted by `order_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub flow: Flow,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Validator verdict for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub is_complete: bool,
    /// Missing configuration, in the node type's declared order.
    pub missing_fields: Vec<String>,
}

/// A stored document reference, as returned by the document store and kept
/// under `config.document_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFile {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// The organization a request acts on. Authorization happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgContext {
    pub org_id: String,
}

impl OrgContext {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
        }
    }
}

/// A client user's progress through the published flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingProgress {
    pub org_id: String,
    pub user_id: String,
    pub flow_id: Uuid,
    pub completed: BTreeSet<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingProgress {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>, flow_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
            flow_id,
            completed: BTreeSet::new(),
            current_node_id: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_node() -> Node {
        NewNode::new(NodeType::Payment, "Deposit")
            .with_config("stripe_url", json!("https://pay.example/abc"))
            .with_config("amount_label", json!("$500"))
            .into_node(Uuid::new_v4(), 3)
    }

    #[test]
    fn node_type_accepts_invoice_alias() {
        let parsed: NodeType = serde_json::from_str("\"invoice\"").unwrap();
        assert_eq!(parsed, NodeType::Payment);
        assert_eq!("invoice".parse::<NodeType>().unwrap(), NodeType::Payment);
        assert_eq!(serde_json::to_string(&NodeType::Payment).unwrap(), "\"payment\"");
    }

    #[test]
    fn node_type_display_roundtrips_through_from_str() {
        for nt in NodeType::ALL {
            assert_eq!(nt.to_string().parse::<NodeType>().unwrap(), nt);
        }
        assert!("webinar".parse::<NodeType>().is_err());
    }

    #[test]
    fn flow_status_parse() {
        assert_eq!("published".parse::<FlowStatus>().unwrap(), FlowStatus::Published);
        assert!("live".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn new_node_defaults() {
        let node = NewNode::new(NodeType::Call, "Kickoff").into_node(Uuid::nil(), 0);
        assert!(node.required);
        assert!(node.config.is_empty());
        assert_eq!(node.position, Position::default());
        assert_eq!(node.version, 1);
        assert_eq!(node.lineage(), node.id);
    }

    #[test]
    fn patch_merges_config_and_removes_nulls() {
        let mut node = sample_node();
        let mut config = NodeConfig::new();
        config.insert("amount_label".into(), serde_json::Value::Null);
        config.insert("stripe_url".into(), json!("https://pay.example/xyz"));
        let patch = NodePatch {
            config: Some(config),
            ..Default::default()
        };
        patch.apply_to(&mut node);

        assert_eq!(node.config.get("stripe_url"), Some(&json!("https://pay.example/xyz")));
        assert!(!node.config.contains_key("amount_label"));
    }

    #[test]
    fn patch_never_touches_identity() {
        let mut node = sample_node();
        let before = node.clone();
        let patch = NodePatch {
            title: Some("Final payment".into()),
            required: Some(false),
            description: Some("Due on signing".into()),
            ..Default::default()
        };
        patch.apply_to(&mut node);

        assert_eq!(node.id, before.id);
        assert_eq!(node.flow_id, before.flow_id);
        assert_eq!(node.order_index, before.order_index);
        assert_eq!(node.version, before.version);
        assert_eq!(node.title, "Final payment");
        assert!(!node.required);

        NodePatch {
            description: Some(String::new()),
            ..Default::default()
        }
        .apply_to(&mut node);
        assert!(node.description.is_none());
    }

    #[test]
    fn document_file_serializes_type_key() {
        let doc = DocumentFile {
            url: "https://files.example/msa.pdf".into(),
            name: "msa.pdf".into(),
            content_type: "application/pdf".into(),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], "application/pdf");
    }
}
