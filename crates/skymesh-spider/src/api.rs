//! The CSP seam.
//!
//! Orchestrators hold an `Arc<dyn CspApi>`; production wires in
//! [`crate::SpiderClient`], tests wire in [`crate::fake::FakeSpider`].

use async_trait::async_trait;

use crate::error::SpiderResult;
use crate::types::*;

/// Lifecycle control verbs accepted by `GET /controlvm/{name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmControlAction {
    Suspend,
    Resume,
    Reboot,
}

impl VmControlAction {
    /// Query-parameter spelling.
    pub fn as_query(&self) -> &'static str {
        match self {
            VmControlAction::Suspend => "suspend",
            VmControlAction::Resume => "resume",
            VmControlAction::Reboot => "reboot",
        }
    }
}

/// Every CSP-side operation the orchestrators perform.
#[async_trait]
pub trait CspApi: Send + Sync {
    // ── Catalog lookups ────────────────────────────────────────────

    async fn lookup_spec(
        &self,
        connection: &str,
        csp_spec_name: &str,
    ) -> SpiderResult<VmSpecLookup>;

    async fn lookup_image(
        &self,
        connection: &str,
        csp_image_name: &str,
    ) -> SpiderResult<VmImageLookup>;

    // ── vNet / subnet ──────────────────────────────────────────────

    async fn create_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo>;

    async fn get_vpc(&self, connection: &str, name: &str) -> SpiderResult<VpcInfo>;

    async fn register_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo>;

    async fn create_subnet(&self, req: &SubnetAddReq) -> SpiderResult<SubnetInfo>;

    async fn delete_vpc(&self, connection: &str, name: &str) -> SpiderResult<()>;

    // ── SSH keys ───────────────────────────────────────────────────

    async fn create_keypair(
        &self,
        req: &KeyPairCreateReq,
    ) -> SpiderResult<KeyPairInfo>;

    async fn delete_keypair(&self, connection: &str, name: &str) -> SpiderResult<()>;

    // ── Security groups ────────────────────────────────────────────

    async fn create_security_group(
        &self,
        req: &SecurityGroupCreateReq,
    ) -> SpiderResult<SecurityGroupInfo>;

    async fn add_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<SecurityGroupInfo>;

    async fn remove_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<bool>;

    async fn delete_security_group(
        &self,
        connection: &str,
        name: &str,
    ) -> SpiderResult<()>;

    // ── VMs ────────────────────────────────────────────────────────

    async fn create_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo>;

    async fn register_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo>;

    async fn get_vm(&self, connection: &str, name: &str) -> SpiderResult<SpiderVmInfo>;

    /// Status read; implementations retry up to twice on empty-status
    /// bodies with a 5-second back-off.
    async fn get_vm_status(
        &self,
        connection: &str,
        name: &str,
    ) -> SpiderResult<VmStatusInfo>;

    async fn control_vm(
        &self,
        connection: &str,
        name: &str,
        action: VmControlAction,
    ) -> SpiderResult<()>;

    async fn terminate_vm(&self, connection: &str, name: &str) -> SpiderResult<()>;

    // ── Disks ──────────────────────────────────────────────────────

    async fn create_disk(&self, req: &DiskCreateReq) -> SpiderResult<DiskInfo>;

    async fn attach_disk(
        &self,
        name: &str,
        req: &DiskAttachDetachReq,
    ) -> SpiderResult<DiskInfo>;

    async fn detach_disk(
        &self,
        name: &str,
        req: &DiskAttachDetachReq,
    ) -> SpiderResult<bool>;

    // ── Clusters / node groups ─────────────────────────────────────

    async fn create_cluster(&self, req: &ClusterCreateReq)
        -> SpiderResult<ClusterInfo>;

    async fn add_node_group(
        &self,
        cluster: &str,
        req: &NodeGroupAddReq,
    ) -> SpiderResult<ClusterInfo>;

    async fn set_node_group_autoscaling(
        &self,
        cluster: &str,
        node_group: &str,
        req: &SetAutoscalingReq,
    ) -> SpiderResult<bool>;

    async fn change_node_group_autoscale_size(
        &self,
        cluster: &str,
        node_group: &str,
        req: &ChangeAutoscaleSizeReq,
    ) -> SpiderResult<ClusterInfo>;

    async fn upgrade_cluster(
        &self,
        cluster: &str,
        req: &ClusterUpgradeReq,
    ) -> SpiderResult<ClusterInfo>;

    async fn delete_cluster(&self, connection: &str, name: &str) -> SpiderResult<()>;
}
