//! Typed errors for the task-positioning subsystem.
//!
//! `PositionError` is what the store, the HTTP layer and the client cache
//! agree on. Storage internals keep using `anyhow` with `.context(...)` and
//! are folded into `PositionError::Database` at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    /// A task, project or status does not belong to the caller's organization.
    #[error("{0}")]
    NotFound(String),

    /// A concurrent write won the race; re-read positions and retry.
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),

    /// Rejected before any store access.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    /// Transport failure talking to a remote position service.
    #[error("Remote error: {0}")]
    Remote(String),
}

impl PositionError {
    pub fn task_not_found(task_id: i64, organization_id: i64) -> Self {
        Self::NotFound(format!(
            "Task {} not found in organization {}",
            task_id, organization_id
        ))
    }

    /// Whether the caller is expected to re-fetch and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<anyhow::Error> for PositionError {
    fn from(err: anyhow::Error) -> Self {
        // Errors that were already typed survive a round trip through anyhow.
        match err.downcast::<PositionError>() {
            Ok(typed) => typed,
            Err(other) => Self::Database(other),
        }
    }
}
