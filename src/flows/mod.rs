//! Onboarding flows: typed step graphs, their validation, publishing, and
//! client traversal.

pub mod canvas;
pub mod composer;
pub mod events;
pub mod model;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod routes;
pub mod session;
pub mod templates;
pub mod traversal;
pub mod validator;

pub use composer::Composer;
pub use events::{CompletionBoard, EventBus, FlowEvent};
pub use model::{
    CompletionResult, Edge, Flow, FlowGraph, FlowStatus, NewNode, Node, NodePatch, NodeType,
    OnboardingProgress, OrgContext, Position,
};
pub use progress::{ProgressTracker, ProgressView};
pub use publish::PublishGate;
pub use routes::{FlowRouteState, flow_routes};
pub use session::{DraftSession, EditCommand, NodeHandle};
pub use traversal::next_step;
pub use validator::validate;
