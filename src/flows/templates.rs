//! Flow templates: canned step sequences to seed a draft.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::composer::Composer;
use super::model::{Flow, NewNode, NodeType, OrgContext};
use crate::error::FlowError;

/// One step of a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateStep {
    pub node_type: NodeType,
    pub title: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub summary: &'static str,
    pub steps: &'static [TemplateStep],
}

const fn step(node_type: NodeType, title: &'static str, description: &'static str) -> TemplateStep {
    TemplateStep {
        node_type,
        title,
        description,
        required: true,
    }
}

static TEMPLATES: [FlowTemplate; 3] = [
    FlowTemplate {
        id: "standard_agency",
        name: "Standard agency onboarding",
        summary: "Welcome pack through kickoff call for a new project client.",
        steps: &[
            step(NodeType::Welcome, "Welcome", "Introduce the team and how we work."),
            step(NodeType::Scope, "Scope of work", "Review what is and isn't included."),
            step(NodeType::Contract, "Sign the agreement", "Countersign the services agreement."),
            step(NodeType::Payment, "Pay the deposit", "Settle the first invoice."),
            step(NodeType::Consent, "Privacy consent", "Accept the terms and privacy policy."),
            step(NodeType::Upload, "Share brand assets", "Upload logos, fonts and guidelines."),
            step(NodeType::Connect, "Connect accounts", "Grant access to the tools we'll use."),
            step(NodeType::Call, "Book kickoff call", "Pick a time for the kickoff."),
        ],
    },
    FlowTemplate {
        id: "quick_start",
        name: "Quick start",
        summary: "Minimal flow: welcome, terms, kickoff.",
        steps: &[
            step(NodeType::Welcome, "Welcome", "Start here."),
            step(NodeType::Terms, "Terms of service", "Read and accept our terms."),
            step(NodeType::Call, "Book kickoff call", "Pick a time for the kickoff."),
        ],
    },
    FlowTemplate {
        id: "retainer",
        name: "Monthly retainer",
        summary: "Contract and recurring billing for ongoing engagements.",
        steps: &[
            step(NodeType::Welcome, "Welcome", "Introduce the retainer programme."),
            step(NodeType::Contract, "Sign the retainer", "Countersign the retainer agreement."),
            step(NodeType::Payment, "Set up billing", "Start the monthly subscription."),
            step(NodeType::Connect, "Connect accounts", "Grant access to the tools we'll use."),
        ],
    },
];

/// Every available template.
pub fn all() -> &'static [FlowTemplate] {
    &TEMPLATES
}

pub fn find(id: &str) -> Option<&'static FlowTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Seed the draft `flow_id` from a template, or create it empty with `None`.
///
/// Nodes are created in template order with `order_index` 0..N-1 and no
/// edges, in one atomic write. The target must be missing or an empty draft.
/// An unknown template fails before anything is written.
pub async fn instantiate(
    composer: &Composer,
    org: &OrgContext,
    flow_id: Uuid,
    template_id: Option<&str>,
) -> Result<Flow, FlowError> {
    let template = template_id
        .map(|id| find(id).ok_or_else(|| FlowError::UnknownTemplate(id.to_string())))
        .transpose()?;

    let steps: Vec<NewNode> = template
        .map(|t| {
            t.steps
                .iter()
                .map(|step| {
                    NewNode::new(step.node_type, step.title)
                        .with_description(step.description)
                        .with_required(step.required)
                })
                .collect()
        })
        .unwrap_or_default();
    let flow = composer.seed_draft(org, flow_id, steps).await?;

    if let Some(template) = template {
        info!(
            flow_id = %flow.id,
            template = template.id,
            nodes = template.steps.len(),
            "Template instantiated"
        );
    }
    Ok(flow)
}
