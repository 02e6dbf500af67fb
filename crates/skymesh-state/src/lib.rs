//! Persistent state for the skymesh orchestrator.
//!
//! A single ordered string→string key-value store (redb-backed) holds
//! every record: MCIs, VMs, sub-groups, shared resources, the spec/image
//! catalog, connection configs, and provisioning logs. The key layout
//! lives in [`keys`]; the record types in [`types`]. Nothing outside
//! this crate touches redb.

pub mod catalog;
pub mod error;
pub mod keys;
pub mod kv;
pub mod requests;
pub mod types;

pub use catalog::Catalog;
pub use error::{StateError, StateResult};
pub use kv::KvStore;
pub use types::*;
