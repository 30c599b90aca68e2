//! Error types for the onboarding flow core.

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Stored state no longer matches what the caller read.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the flow authoring and traversal operations.
///
/// Incomplete node configuration is *not* an error on its own; it is
/// reported through `CompletionResult` and only becomes `IncompletePublish`
/// when a publish is attempted.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "Edge in flow {edge_flow} cannot connect nodes from flows {source_flow} and {target_flow}"
    )]
    CrossFlowReference {
        edge_flow: Uuid,
        source_flow: Uuid,
        target_flow: Uuid,
    },

    #[error("Flow {flow_id} cannot be modified: {reason}")]
    InvalidFlow { flow_id: Uuid, reason: String },

    #[error("Cannot publish: {} incomplete step(s): {}", titles.len(), titles.join(", "))]
    IncompletePublish { titles: Vec<String> },

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Node {node_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        node_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] DatabaseError),
}

impl FlowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_flow(flow_id: Uuid, reason: impl Into<String>) -> Self {
        Self::InvalidFlow {
            flow_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_publish_lists_every_title() {
        let err = FlowError::IncompletePublish {
            titles: vec!["Pay deposit".into(), "Sign MSA".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cannot publish: 2 incomplete step(s): Pay deposit, Sign MSA"
        );
    }

    #[test]
    fn database_errors_convert_to_persistence_failures() {
        let err: FlowError = DatabaseError::Query("disk full".into()).into();
        assert!(matches!(err, FlowError::Persistence(_)));
    }
}
