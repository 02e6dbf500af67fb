//! Persisted record types and the closed enums behind them.
//!
//! Status, action, kind, and policy families that the original data
//! model keeps as strings are closed enums here, serialized under their
//! wire spellings so stored records stay self-describing.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Status / action / kind families ────────────────────────────────

/// Lifecycle status of a VM (also used for target status, where
/// `Complete` marks a finished control operation).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum VmStatus {
    Preparing,
    Prepared,
    Creating,
    Running,
    Suspending,
    Suspended,
    Resuming,
    Rebooting,
    Terminating,
    Terminated,
    Failed,
    #[default]
    Undefined,
    Complete,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Preparing => "Preparing",
            VmStatus::Prepared => "Prepared",
            VmStatus::Creating => "Creating",
            VmStatus::Running => "Running",
            VmStatus::Suspending => "Suspending",
            VmStatus::Suspended => "Suspended",
            VmStatus::Resuming => "Resuming",
            VmStatus::Rebooting => "Rebooting",
            VmStatus::Terminating => "Terminating",
            VmStatus::Terminated => "Terminated",
            VmStatus::Failed => "Failed",
            VmStatus::Undefined => "Undefined",
            VmStatus::Complete => "Complete",
        }
    }

    /// Parse a native status string from the CSP; anything outside the
    /// whitelist maps to `Undefined`.
    pub fn from_native(native: &str) -> VmStatus {
        match native {
            "Creating" => VmStatus::Creating,
            "Running" => VmStatus::Running,
            "Suspending" => VmStatus::Suspending,
            "Suspended" => VmStatus::Suspended,
            "Resuming" => VmStatus::Resuming,
            "Rebooting" => VmStatus::Rebooting,
            "Terminating" => VmStatus::Terminating,
            "Terminated" => VmStatus::Terminated,
            _ => VmStatus::Undefined,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control operation a VM or MCI is currently carrying out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum VmAction {
    Create,
    Suspend,
    Resume,
    Reboot,
    Terminate,
    Refine,
    Complete,
    #[default]
    #[serde(rename = "")]
    None,
}

impl VmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmAction::Create => "Create",
            VmAction::Suspend => "Suspend",
            VmAction::Resume => "Resume",
            VmAction::Reboot => "Reboot",
            VmAction::Terminate => "Terminate",
            VmAction::Refine => "Refine",
            VmAction::Complete => "Complete",
            VmAction::None => "",
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when part of an MCI fails to provision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PartialFailurePolicy {
    #[default]
    Continue,
    Rollback,
    Refine,
}

impl PartialFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartialFailurePolicy::Continue => "continue",
            PartialFailurePolicy::Rollback => "rollback",
            PartialFailurePolicy::Refine => "refine",
        }
    }
}

impl fmt::Display for PartialFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind discriminator for records under `/ns/<ns>/resources/`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ResourceKind {
    #[serde(rename = "vNet")]
    VNet,
    #[serde(rename = "subnet")]
    Subnet,
    #[serde(rename = "sshKey")]
    SshKey,
    #[serde(rename = "securityGroup")]
    SecurityGroup,
    #[serde(rename = "dataDisk")]
    DataDisk,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "customImage")]
    CustomImage,
    #[serde(rename = "spec")]
    Spec,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VNet => "vNet",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SshKey => "sshKey",
            ResourceKind::SecurityGroup => "securityGroup",
            ResourceKind::DataDisk => "dataDisk",
            ResourceKind::Image => "image",
            ResourceKind::CustomImage => "customImage",
            ResourceKind::Spec => "spec",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Catalog records (read-only in this system) ─────────────────────

/// A `(provider, region[, zone])` credential-and-endpoint bundle,
/// consulted but never created here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnConfig {
    pub name: String,
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
}

/// A VM size descriptor produced externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecRecord {
    pub id: String,
    pub connection: String,
    pub csp_spec_name: String,
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub root_disk_type: Option<String>,
    #[serde(default)]
    pub root_disk_size: Option<String>,
    #[serde(default)]
    pub cost_per_hour: Option<f64>,
    /// Infra the spec targets ("vm", "k8s", ...); used by the K8s
    /// orchestrator's request filtering.
    #[serde(default)]
    pub infra_type: Option<String>,
}

/// An OS image reference produced externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub connection: String,
    pub csp_image_name: String,
    #[serde(default)]
    pub os_family: Option<String>,
    #[serde(default)]
    pub infra_type: Option<String>,
}

// ── Shared resources ───────────────────────────────────────────────

/// An on-demand default vNet/subnet/SSH key/security group created per
/// (namespace, connection). `associated` is the back-reference set of
/// record keys currently using this resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedResourceRecord {
    pub kind: ResourceKind,
    pub id: String,
    pub uid: String,
    pub connection: String,
    pub csp_resource_id: String,
    pub csp_resource_name: String,
    #[serde(default)]
    pub cidr: Option<String>,
    /// Id of the owning vNet, set on subnet records.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub associated: Vec<String>,
}

impl SharedResourceRecord {
    /// Whether nothing references this resource anymore.
    pub fn is_unreferenced(&self) -> bool {
        self.associated.is_empty()
    }
}

// ── VM / SubGroup / MCI records ────────────────────────────────────

/// Persisted state of a single VM.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub sub_group_id: Option<String>,
    pub connection: String,

    pub spec_id: String,
    pub image_id: String,
    pub v_net_id: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    #[serde(default)]
    pub data_disk_ids: Vec<String>,

    pub status: VmStatus,
    pub target_status: VmStatus,
    pub target_action: VmAction,
    #[serde(default)]
    pub system_message: String,

    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub ssh_port: String,

    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub csp_spec_name: String,
    #[serde(default)]
    pub csp_image_name: String,

    #[serde(default)]
    pub mon_agent_status: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub label: HashMap<String, String>,

    #[serde(default)]
    pub vm_user_name: String,
    #[serde(default)]
    pub vm_user_password: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub description: String,
    /// VM acting as SSH bastion for this one, if any.
    #[serde(default)]
    pub bastion_vm_id: Option<String>,
}

/// A named homogeneous collection of VMs inside an MCI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGroupRecord {
    pub id: String,
    pub name: String,
    pub uid: String,
    pub size: u32,
    pub vm_ids: Vec<String>,
}

/// Persisted state of an MCI. The VM list is assembled from the KV scan
/// on read, not embedded in this record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MciRecord {
    pub id: String,
    pub uid: String,
    pub name: String,
    /// Derived composite status such as `Running:3 (R:3/3)` or
    /// `Partial-Failed:1 (R:2/3)`.
    #[serde(default)]
    pub status: String,
    pub target_status: VmStatus,
    pub target_action: VmAction,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub install_mon_agent: String,
    #[serde(default)]
    pub post_command: Option<PostCommand>,
    #[serde(default)]
    pub post_command_result: Option<Vec<String>>,
    #[serde(default)]
    pub system_label: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub status_count: StatusCount,
    #[serde(default)]
    pub creation_errors: Option<MciCreationErrors>,
}

/// Commands executed on every VM after an MCI finishes provisioning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostCommand {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub command: Vec<String>,
}

/// Per-status VM counts for an MCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCount {
    pub total: u32,
    pub failed: u32,
    pub suspended: u32,
    pub running: u32,
    pub terminated: u32,
    pub creating: u32,
    pub suspending: u32,
    pub resuming: u32,
    pub rebooting: u32,
    pub terminating: u32,
    pub undefined: u32,
}

// ── Creation error aggregation ─────────────────────────────────────

/// Phase in which a VM failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPhase {
    ObjectCreation,
    VmCreation,
}

/// One VM-level provisioning failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmCreationError {
    pub vm_name: String,
    pub phase: CreationPhase,
    pub error: String,
    pub timestamp: String,
}

/// Aggregated provisioning failures attached to an MCI record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MciCreationErrors {
    pub vm_object_creation_errors: Vec<VmCreationError>,
    pub vm_creation_errors: Vec<VmCreationError>,
    pub total_vm_count: u32,
    pub successful_vm_count: u32,
    pub failed_vm_count: u32,
    pub failure_handling_strategy: PartialFailurePolicy,
}

// ── Provisioning history ───────────────────────────────────────────

/// Durable per-spec log of provisioning outcomes. Failures are always
/// recorded; successes only once the spec has a failure on record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvisioningLog {
    pub spec_id: String,
    #[serde(default)]
    pub connection_name: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub region_name: String,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(default)]
    pub failure_timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub success_timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub failure_messages: Vec<String>,
    #[serde(default)]
    pub failure_images: Vec<String>,
    #[serde(default)]
    pub success_images: Vec<String>,
    #[serde(default)]
    pub additional_info: HashMap<String, String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

// ── K8s records ────────────────────────────────────────────────────

/// Lifecycle status of a managed K8s cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum K8sClusterStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    #[default]
    Undefined,
}

/// Lifecycle status of a K8s node group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum K8sNodeGroupStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    #[default]
    Undefined,
}

/// Node-count scaling block of a node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeScaling {
    pub on_auto: bool,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for NodeScaling {
    fn default() -> Self {
        Self {
            on_auto: true,
            desired: 1,
            min: 1,
            max: 2,
        }
    }
}

/// Persisted state of a K8s node group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sNodeGroupRecord {
    pub name: String,
    pub spec_id: String,
    #[serde(default)]
    pub csp_image_name: Option<String>,
    pub ssh_key_id: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    pub scaling: NodeScaling,
    pub status: K8sNodeGroupStatus,
}

/// Persisted state of a managed K8s cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sClusterRecord {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub connection: String,
    pub version: String,
    pub v_net_id: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub node_groups: Vec<K8sNodeGroupRecord>,
    pub status: K8sClusterStatus,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_under_wire_spelling() {
        let json = serde_json::to_string(&VmStatus::Running).unwrap();
        assert_eq!(json, "\"Running\"");
        let back: VmStatus = serde_json::from_str("\"Terminating\"").unwrap();
        assert_eq!(back, VmStatus::Terminating);
    }

    #[test]
    fn action_none_is_empty_string() {
        let json = serde_json::to_string(&VmAction::None).unwrap();
        assert_eq!(json, "\"\"");
        let back: VmAction = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, VmAction::None);
    }

    #[test]
    fn policy_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PartialFailurePolicy::Rollback).unwrap(),
            "\"rollback\""
        );
    }

    #[test]
    fn resource_kind_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&ResourceKind::SecurityGroup).unwrap(),
            "\"securityGroup\""
        );
        assert_eq!(ResourceKind::VNet.as_str(), "vNet");
    }

    #[test]
    fn native_status_whitelist() {
        assert_eq!(VmStatus::from_native("Running"), VmStatus::Running);
        assert_eq!(VmStatus::from_native("Suspended"), VmStatus::Suspended);
        // Anything outside the whitelist collapses to Undefined.
        assert_eq!(VmStatus::from_native("Booting"), VmStatus::Undefined);
        assert_eq!(VmStatus::from_native(""), VmStatus::Undefined);
        // Preparing/Prepared/Failed are internal-only statuses.
        assert_eq!(VmStatus::from_native("Prepared"), VmStatus::Undefined);
    }

    #[test]
    fn vm_record_round_trips_declarative_fields() {
        let mut vm = VmRecord {
            id: "v-1".to_string(),
            name: "v-1".to_string(),
            sub_group_id: Some("v".to_string()),
            connection: "aws-ap-northeast-2".to_string(),
            status: VmStatus::Running,
            target_status: VmStatus::Complete,
            target_action: VmAction::Complete,
            ..VmRecord::default()
        };
        vm.label.insert("role".to_string(), "worker".to_string());

        let encoded = serde_json::to_string(&vm).unwrap();
        let decoded: VmRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, vm);
        // Re-encoding is byte-stable.
        assert_eq!(serde_json::to_string(&decoded).unwrap(), encoded);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"id":"m1","uid":"u","name":"m1","target_status":"Running",
                       "target_action":"Create","notAField":42}"#;
        let mci: MciRecord = serde_json::from_str(json).unwrap();
        assert_eq!(mci.id, "m1");
        assert_eq!(mci.target_action, VmAction::Create);
    }
}
