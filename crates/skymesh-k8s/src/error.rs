//! K8s orchestrator error types.

use thiserror::Error;

/// Result type alias for K8s orchestration.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors surfaced by the K8s orchestrator.
#[derive(Debug, Error)]
pub enum K8sError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    /// No capability entry for the provider, or the requested version
    /// is not offered in the region.
    #[error("capability error: {0}")]
    Capability(String),

    #[error("csp error: {0}")]
    Csp(#[from] skymesh_spider::SpiderError),

    #[error("resource error: {0}")]
    Resource(#[from] skymesh_resource::ResourceError),

    #[error("state error: {0}")]
    State(#[from] skymesh_state::StateError),
}
