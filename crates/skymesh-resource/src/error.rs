//! Shared-resource error types.

use thiserror::Error;

/// Result type alias for shared-resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors surfaced by the shared-resource manager.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A required resource was missing and on-demand creation was off.
    #[error("required resource missing: {0}")]
    MissingRequired(String),

    /// The resource still has referents and `force` was not given.
    #[error("resource {id} is still associated with {count} object(s)")]
    StillAssociated { id: String, count: usize },

    /// Rollback left resources behind; the operator must clean up.
    #[error("CRITICAL: rollback incomplete, manual cleanup required: {0}")]
    RollbackIncomplete(String),

    #[error("csp error: {0}")]
    Csp(#[from] skymesh_spider::SpiderError),

    #[error("state error: {0}")]
    State(#[from] skymesh_state::StateError),
}
