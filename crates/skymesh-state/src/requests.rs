//! Request shapes accepted by the orchestrators.
//!
//! Dynamic requests name a spec/image from the shared catalog and let
//! the orchestrator derive everything else; resolved requests carry the
//! concrete resource ids a VM will be created with.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{PartialFailurePolicy, PostCommand};

fn default_sub_group_size() -> u32 {
    1
}

fn default_install_mon_agent() -> String {
    "yes".to_string()
}

fn default_risk_gating() -> bool {
    true
}

/// Declarative request for one sub-group of VMs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDynamicReq {
    pub name: String,
    /// Catalog spec id, e.g. `aws-ap-northeast-2-t2-small`.
    pub common_spec: String,
    /// Catalog image id, e.g. `ubuntu22.04`.
    pub common_image: String,
    /// Explicit connection override; defaults to the spec's connection.
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default = "default_sub_group_size")]
    pub sub_group_size: u32,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub vm_user_password: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
}

/// Declarative request for a whole MCI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MciDynamicReq {
    pub name: String,
    pub vm: Vec<VmDynamicReq>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_install_mon_agent")]
    pub install_mon_agent: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
    #[serde(default)]
    pub post_command: Option<PostCommand>,
    #[serde(default)]
    pub policy_on_partial_failure: PartialFailurePolicy,
    /// Abort creation when the risk analyzer reports a high-risk
    /// spec/image combination.
    #[serde(default = "default_risk_gating")]
    pub risk_gating: bool,
}

/// Resolved request for one sub-group, produced from a [`VmDynamicReq`]
/// after shared resources are reserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmReq {
    pub name: String,
    pub connection: String,
    pub spec_id: String,
    pub image_id: String,
    pub v_net_id: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    #[serde(default)]
    pub data_disk_ids: Vec<String>,
    #[serde(default = "default_sub_group_size")]
    pub sub_group_size: u32,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub vm_user_password: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
    /// Pre-existing CSP VM id, required when registering instead of
    /// creating.
    #[serde(default)]
    pub csp_resource_id: String,
}

/// Resolved request for a whole MCI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MciReq {
    pub name: String,
    pub vm: Vec<VmReq>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub install_mon_agent: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
    #[serde(default)]
    pub post_command: Option<PostCommand>,
    #[serde(default)]
    pub policy_on_partial_failure: PartialFailurePolicy,
}

/// Declarative request for a managed K8s cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sClusterDynamicReq {
    pub name: String,
    pub common_spec: String,
    /// `"default"` or empty where the provider does not support node
    /// image designation.
    #[serde(default)]
    pub common_image: String,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub node_group_name: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub on_auto_scaling: Option<bool>,
    #[serde(default)]
    pub desired_node_size: Option<u32>,
    #[serde(default)]
    pub min_node_size: Option<u32>,
    #[serde(default)]
    pub max_node_size: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
}

/// Declarative request for adding a node group to an existing cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sNodeGroupDynamicReq {
    pub name: String,
    pub common_spec: String,
    #[serde(default)]
    pub common_image: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub on_auto_scaling: Option<bool>,
    #[serde(default)]
    pub desired_node_size: Option<u32>,
    #[serde(default)]
    pub min_node_size: Option<u32>,
    #[serde(default)]
    pub max_node_size: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
}
