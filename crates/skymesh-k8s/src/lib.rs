//! Managed Kubernetes orchestration.
//!
//! Clusters and node groups are provisioned through the same shared
//! resources and Spider client as VMs, driven by a per-provider
//! capability table (node-group bundling, image designation, subnet
//! requirements, available versions per region).

pub mod capability;
pub mod cluster;
pub mod error;
pub mod version;

pub use capability::{K8sCapabilities, ProviderCapability};
pub use cluster::K8sOrchestrator;
pub use error::{K8sError, K8sResult};
pub use version::recommend_version;
