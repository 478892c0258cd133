//! Domain error shared by every crate in the workspace.

/// Failures of domain operations, independent of transport or storage.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No record with `id` exists for `entity` (e.g. an unknown batch job).
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request itself is malformed (e.g. an empty topic list).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request is well-formed but contradicts current state, such as
    /// retrying a topic that has not failed.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
