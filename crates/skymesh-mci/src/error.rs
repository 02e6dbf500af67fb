//! Orchestrator error types.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type MciResult<T> = Result<T, MciError>;

/// Errors surfaced by the MCI orchestrator.
#[derive(Debug, Error)]
pub enum MciError {
    /// Bad request: name grammar, unknown spec/image/connection, or a
    /// risk-gated configuration. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The store is not in a state that permits the operation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Shared-resource preparation failed; created resources were
    /// rolled back (or the message carries the CRITICAL marker).
    #[error("shared resource preparation failed: {0}")]
    SharedResource(String),

    /// policy=rollback removed the whole MCI after VM failures.
    #[error("mci rolled back: {0}")]
    RolledBack(String),

    /// A held creation was withdrawn by the user.
    #[error("mci creation was withdrawn")]
    Withdrawn,

    #[error("vm error: {0}")]
    Vm(#[from] skymesh_vm::VmError),

    #[error("resource error: {0}")]
    Resource(#[from] skymesh_resource::ResourceError),

    #[error("csp error: {0}")]
    Csp(#[from] skymesh_spider::SpiderError),

    #[error("state error: {0}")]
    State(#[from] skymesh_state::StateError),
}
