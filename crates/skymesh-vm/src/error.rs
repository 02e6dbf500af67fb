//! VM engine error types.

use thiserror::Error;

/// Result type alias for VM engine operations.
pub type VmResult<T> = Result<T, VmError>;

/// Errors surfaced by the VM lifecycle engine.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid vm request: {0}")]
    Invalid(String),

    #[error("vm not found: {0}")]
    NotFound(String),

    #[error("mci not found: {0}")]
    MciNotFound(String),

    #[error("csp error: {0}")]
    Csp(#[from] skymesh_spider::SpiderError),

    #[error("state error: {0}")]
    State(#[from] skymesh_state::StateError),

    #[error("resource error: {0}")]
    Resource(#[from] skymesh_resource::ResourceError),
}
