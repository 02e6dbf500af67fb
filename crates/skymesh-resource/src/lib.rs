//! Shared default resources.
//!
//! Each (namespace, connection) pair gets one default vNet (with a
//! subnet), SSH key, and security group, created lazily on first use
//! and shared by every VM and cluster on that connection. Creation is
//! tracked per request so a failed provisioning run can roll back
//! exactly what it created.

pub mod error;
pub mod shared;

pub use error::{ResourceError, ResourceResult};
pub use shared::{shared_resource_id, AssocOp, CreatedResource, SharedResourceManager};
