//! Domain errors for the remedy repair loop.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Reasons an [`ErrorDag`](crate::domain::models::ErrorDag) fails validation.
///
/// Validation errors are fatal to the decomposition attempt that produced the
/// graph; the coordinator falls back to non-decomposed planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagValidationError {
    #[error("Decomposition graph has no nodes")]
    EmptyGraph,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },

    #[error("Decomposition graph contains a cycle: {}", format_cycle_path(.0))]
    CyclicGraph(Vec<String>),

    #[error("Decomposition graph has {count} nodes, more than the allowed {max}")]
    TooManyNodes { count: usize, max: usize },
}

/// Domain-level errors that can occur in the repair loop.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Reliability event not found: {0}")]
    EventNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid decomposition: {0}")]
    DagInvalid(#[from] DagValidationError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{collaborator} failed: {message}")]
    CollaboratorFailed { collaborator: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Sandbox error: {0}")]
    SandboxError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl DomainError {
    /// Shorthand for a collaborator failure.
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorFailed {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_display() {
        let err = DagValidationError::CyclicGraph(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Decomposition graph contains a cycle: a -> b -> a");
    }

    #[test]
    fn test_dag_error_converts_into_domain_error() {
        let err: DomainError = DagValidationError::EmptyGraph.into();
        assert!(matches!(err, DomainError::DagInvalid(DagValidationError::EmptyGraph)));
    }
}
