//! VmEngine — creates, reconciles, controls, and deletes single VMs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use skymesh_core::names;
use skymesh_resource::{AssocOp, SharedResourceManager};
use skymesh_spider::types::{
    DiskAttachDetachReq, DiskCreateReq, DiskReqInfo, DiskVmReqInfo, VmCreateReq,
    VmReqInfo,
};
use skymesh_spider::{csp_resource_name, CspApi, VmControlAction};
use skymesh_state::{
    keys, Catalog, KvStore, ResourceKind, SharedResourceRecord, VmAction, VmRecord,
    VmStatus,
};

use crate::error::{VmError, VmResult};
use crate::lifecycle::correct_status;

/// Attach attempts for a freshly provisioned data disk.
const DISK_ATTACH_RETRIES: u32 = 3;
/// Back-off between attach attempts.
const DISK_ATTACH_BACKOFF: Duration = Duration::from_secs(5);

/// Reconciled view of a VM's status, returned by
/// [`VmEngine::fetch_vm_status`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VmStatusView {
    pub id: String,
    pub name: String,
    pub csp_vm_name: String,
    pub status: VmStatus,
    pub target_status: VmStatus,
    pub target_action: VmAction,
    pub native_status: String,
    pub public_ip: String,
    pub private_ip: String,
    pub ssh_port: String,
    pub system_message: String,
    pub created_time: String,
    pub mon_agent_status: String,
}

/// Engine acting on individual VMs.
#[derive(Clone)]
pub struct VmEngine {
    kv: KvStore,
    catalog: Catalog,
    csp: Arc<dyn CspApi>,
    resources: SharedResourceManager,
}

impl VmEngine {
    pub fn new(
        kv: KvStore,
        catalog: Catalog,
        csp: Arc<dyn CspApi>,
        resources: SharedResourceManager,
    ) -> Self {
        Self {
            kv,
            catalog,
            csp,
            resources,
        }
    }

    // ── Object access ──────────────────────────────────────────────

    pub fn get_vm(&self, ns: &str, mci_id: &str, vm_id: &str) -> VmResult<VmRecord> {
        self.kv
            .get_json::<VmRecord>(&keys::vm_key(ns, mci_id, vm_id))?
            .ok_or_else(|| VmError::NotFound(format!("{ns}/{mci_id}/{vm_id}")))
    }

    /// Write a VM object under an existing MCI. Referential integrity
    /// is enforced here: an absent MCI record rejects the write.
    pub fn create_vm_object(
        &self,
        ns: &str,
        mci_id: &str,
        vm: &VmRecord,
    ) -> VmResult<()> {
        if self.kv.get(&keys::mci_key(ns, mci_id))?.is_none() {
            return Err(VmError::MciNotFound(format!("{ns}/{mci_id}")));
        }
        self.kv.put_json(&keys::vm_key(ns, mci_id, &vm.id), vm)?;
        debug!(vm = %vm.id, %mci_id, "vm object stored");
        Ok(())
    }

    /// Update a VM record, writing only when the value actually
    /// changed. A missing key is left missing.
    pub fn update_vm_info(&self, ns: &str, mci_id: &str, vm: &VmRecord) -> VmResult<()> {
        let key = keys::vm_key(ns, mci_id, &vm.id);
        let Some(current) = self.kv.get_json::<VmRecord>(&key)? else {
            return Ok(());
        };
        if &current != vm {
            self.kv.put_json(&key, vm)?;
        }
        Ok(())
    }

    /// Convenience transition: load, restamp status fields, store.
    pub fn update_vm_status(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        status: VmStatus,
        target_status: Option<VmStatus>,
        system_message: &str,
    ) -> VmResult<()> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;
        vm.status = status;
        if let Some(target) = target_status {
            vm.target_status = target;
        }
        vm.system_message = system_message.to_string();
        self.update_vm_info(ns, mci_id, &vm)
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create the VM on the CSP side (or register a pre-existing one)
    /// and fill the record from the response. On failure the record is
    /// marked `Failed` with the cause in `system_message`.
    pub async fn create_vm(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        register: bool,
    ) -> VmResult<()> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;
        info!(vm = %vm.name, %mci_id, register, "creating vm");

        if let Err(err) = self.validate_for_create(&vm, register) {
            self.mark_failed(ns, mci_id, &mut vm, &err.to_string())?;
            return Err(err);
        }

        let request = match self.build_create_request(ns, &vm, register) {
            Ok(request) => request,
            Err(err) => {
                self.mark_failed(ns, mci_id, &mut vm, &err.to_string())?;
                return Err(err);
            }
        };

        let result = if register {
            self.csp.register_vm(&request).await
        } else {
            self.csp.create_vm(&request).await
        };
        let info = match result {
            Ok(info) => info,
            Err(err) => {
                error!(vm = %vm.name, error = %err, "vm creation failed");
                self.mark_failed(ns, mci_id, &mut vm, &err.to_string())?;
                return Err(err.into());
            }
        };

        // Fill the record from the CSP response.
        vm.vm_user_name = info.vm_user_id.clone();
        vm.vm_user_password = info.vm_user_passwd.clone();
        vm.csp_resource_name = info.iid.name_id.clone();
        vm.csp_resource_id = info.iid.system_id.clone();
        vm.public_ip = info.public_ip.clone();
        vm.private_ip = info.private_ip.clone();
        vm.ssh_port = names::ssh_port_from_access_point(&info.ssh_access_point)
            .unwrap_or_else(|| "22".to_string());
        if !info.vm_spec_name.is_empty() {
            vm.csp_spec_name = info.vm_spec_name.clone();
        }
        vm.csp_image_name = info.image_iid.system_id.clone();
        vm.root_disk_type = info.root_disk_type.clone();
        vm.root_disk_size = info.root_disk_size.clone();

        let vm_key = keys::vm_key(ns, mci_id, &vm.id);
        if !register {
            self.add_associations(ns, &vm, &vm_key);
        }

        // Data disks born with the VM get their own records.
        for disk_iid in &info.data_disk_iids {
            let record = SharedResourceRecord {
                kind: ResourceKind::DataDisk,
                id: disk_iid.name_id.clone(),
                uid: names::gen_uid(),
                connection: vm.connection.clone(),
                csp_resource_id: disk_iid.system_id.clone(),
                csp_resource_name: disk_iid.name_id.clone(),
                cidr: None,
                parent_id: None,
                associated: Vec::new(),
            };
            let disk_key =
                keys::resource_key(ns, ResourceKind::DataDisk, &disk_iid.name_id);
            if let Err(err) = self.kv.put_json(&disk_key, &record) {
                warn!(disk = %disk_iid.name_id, error = %err, "failed to register data disk");
                continue;
            }
            vm.data_disk_ids.push(disk_iid.name_id.clone());
            let _ = self.resources.update_association(
                ns,
                ResourceKind::DataDisk,
                &disk_iid.name_id,
                AssocOp::Add,
                &vm_key,
            );
        }

        // Bastion assignment is best-effort; failures are logged only.
        if let Err(err) = self.assign_bastion(ns, mci_id, &mut vm) {
            debug!(vm = %vm.name, error = %err, "bastion assignment skipped");
        }

        vm.target_action = VmAction::Complete;
        vm.target_status = VmStatus::Complete;
        vm.mon_agent_status = "notInstalled".to_string();
        vm.created_time = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.update_vm_info(ns, mci_id, &vm)?;

        // Settle the stored status from the CSP's view.
        match self.fetch_vm_status(ns, mci_id, &vm.id).await {
            Ok(view) => {
                debug!(vm = %vm.name, status = %view.status, "vm created");
                Ok(())
            }
            Err(err) => {
                let message = format!("cannot fetch vm status: {err}");
                let mut current = self.get_vm(ns, mci_id, &vm.id)?;
                self.mark_failed(ns, mci_id, &mut current, &message)?;
                Err(err)
            }
        }
    }

    fn validate_for_create(&self, vm: &VmRecord, register: bool) -> VmResult<()> {
        let missing = |field: &str| VmError::Invalid(format!("vm.{field} is empty"));
        if vm.name.is_empty() {
            return Err(missing("name"));
        }
        if vm.image_id.is_empty() {
            return Err(missing("image_id"));
        }
        if vm.connection.is_empty() {
            return Err(missing("connection"));
        }
        if vm.ssh_key_id.is_empty() {
            return Err(missing("ssh_key_id"));
        }
        if vm.spec_id.is_empty() {
            return Err(missing("spec_id"));
        }
        if vm.security_group_ids.is_empty() {
            return Err(missing("security_group_ids"));
        }
        if vm.v_net_id.is_empty() {
            return Err(missing("v_net_id"));
        }
        if vm.subnet_id.is_empty() {
            return Err(missing("subnet_id"));
        }
        if register && vm.csp_resource_id.is_empty() {
            return Err(missing("csp_resource_id (required to register)"));
        }
        Ok(())
    }

    fn build_create_request(
        &self,
        ns: &str,
        vm: &VmRecord,
        register: bool,
    ) -> VmResult<VmCreateReq> {
        let mut req_info = VmReqInfo {
            name: csp_resource_name(&vm.connection, &vm.uid),
            vm_user_id: vm.vm_user_name.clone(),
            vm_user_passwd: if vm.vm_user_password.is_empty() {
                // Windows images require a password even when the user
                // did not supply one.
                names::gen_random_password(14)
            } else {
                vm.vm_user_password.clone()
            },
            root_disk_type: vm.root_disk_type.clone(),
            root_disk_size: vm.root_disk_size.clone(),
            ..VmReqInfo::default()
        };

        if register {
            req_info.csp_id = vm.csp_resource_id.clone();
            return Ok(VmCreateReq {
                connection_name: vm.connection.clone(),
                req_info,
            });
        }

        // Custom images (VM snapshots) take priority over catalog
        // images and must not carry root-disk overrides.
        let custom_key =
            keys::resource_key(ns, ResourceKind::CustomImage, &vm.image_id);
        if let Some(custom) = self.kv.get_json::<SharedResourceRecord>(&custom_key)? {
            req_info.image_name = custom.csp_resource_name;
            req_info.image_type = "MyImage".to_string();
            req_info.root_disk_type = String::new();
            req_info.root_disk_size = String::new();
        } else {
            match self.catalog.get_image(ns, &vm.image_id) {
                Ok(image) => req_info.image_name = image.csp_image_name,
                Err(_) => {
                    // Unknown in the catalog: pass the id through as the
                    // CSP image name.
                    debug!(image = %vm.image_id, "image not in catalog, using id directly");
                    req_info.image_name = vm.image_id.clone();
                }
            }
        }

        let spec = self.catalog.get_spec(ns, &vm.spec_id)?;
        req_info.vm_spec_name = spec.csp_spec_name;

        let vnet = self.resources.get(ns, ResourceKind::VNet, &vm.v_net_id)?;
        req_info.vpc_name = vnet.csp_resource_name;

        let subnet = self.resources.get(ns, ResourceKind::Subnet, &vm.subnet_id)?;
        req_info.subnet_name = subnet.csp_resource_name;

        for sg_id in &vm.security_group_ids {
            let sg = self
                .resources
                .get(ns, ResourceKind::SecurityGroup, sg_id)?;
            req_info.security_group_names.push(sg.csp_resource_name);
        }

        let key = self.resources.get(ns, ResourceKind::SshKey, &vm.ssh_key_id)?;
        req_info.key_pair_name = key.csp_resource_name;

        for disk_id in &vm.data_disk_ids {
            if disk_id.is_empty() {
                continue;
            }
            let disk = self.resources.get(ns, ResourceKind::DataDisk, disk_id)?;
            req_info.data_disk_names.push(disk.csp_resource_name);
        }

        Ok(VmCreateReq {
            connection_name: vm.connection.clone(),
            req_info,
        })
    }

    fn add_associations(&self, ns: &str, vm: &VmRecord, vm_key: &str) {
        let image_kind = if self
            .kv
            .get(&keys::resource_key(ns, ResourceKind::CustomImage, &vm.image_id))
            .ok()
            .flatten()
            .is_some()
        {
            ResourceKind::CustomImage
        } else {
            ResourceKind::Image
        };
        let mut updates = vec![
            (image_kind, vm.image_id.clone()),
            (ResourceKind::SshKey, vm.ssh_key_id.clone()),
            (ResourceKind::VNet, vm.v_net_id.clone()),
            (ResourceKind::Subnet, vm.subnet_id.clone()),
        ];
        for sg in &vm.security_group_ids {
            updates.push((ResourceKind::SecurityGroup, sg.clone()));
        }
        for disk in &vm.data_disk_ids {
            updates.push((ResourceKind::DataDisk, disk.clone()));
        }
        for (kind, id) in updates {
            if let Err(err) =
                self.resources
                    .update_association(ns, kind, &id, AssocOp::Add, vm_key)
            {
                warn!(kind = %kind, %id, error = %err, "association add failed");
            }
        }
    }

    fn remove_associations(&self, ns: &str, vm: &VmRecord, vm_key: &str) {
        let image_kind = if self
            .kv
            .get(&keys::resource_key(ns, ResourceKind::CustomImage, &vm.image_id))
            .ok()
            .flatten()
            .is_some()
        {
            ResourceKind::CustomImage
        } else {
            ResourceKind::Image
        };
        let mut updates = vec![
            (image_kind, vm.image_id.clone()),
            (ResourceKind::SshKey, vm.ssh_key_id.clone()),
            (ResourceKind::VNet, vm.v_net_id.clone()),
            (ResourceKind::Subnet, vm.subnet_id.clone()),
        ];
        for sg in &vm.security_group_ids {
            updates.push((ResourceKind::SecurityGroup, sg.clone()));
        }
        for disk in &vm.data_disk_ids {
            updates.push((ResourceKind::DataDisk, disk.clone()));
        }
        for (kind, id) in updates {
            if let Err(err) = self.resources.update_association(
                ns,
                kind,
                &id,
                AssocOp::Remove,
                vm_key,
            ) {
                warn!(kind = %kind, %id, error = %err, "association remove failed");
            }
        }
    }

    /// Pick the first other VM in the MCI with a public IP as this VM's
    /// bastion.
    fn assign_bastion(&self, ns: &str, mci_id: &str, vm: &mut VmRecord) -> VmResult<()> {
        if vm.bastion_vm_id.is_some() {
            return Ok(());
        }
        let prefix = keys::mci_descendants_prefix(ns, mci_id);
        for (key, value) in self.kv.list(&prefix)? {
            if keys::vm_id_from_key(ns, mci_id, &key).is_none() {
                continue;
            }
            let Ok(other) = serde_json::from_str::<VmRecord>(&value) else {
                continue;
            };
            if other.id != vm.id && !other.public_ip.is_empty() {
                vm.bastion_vm_id = Some(other.id);
                return Ok(());
            }
        }
        Ok(())
    }

    fn mark_failed(
        &self,
        ns: &str,
        mci_id: &str,
        vm: &mut VmRecord,
        message: &str,
    ) -> VmResult<()> {
        vm.status = VmStatus::Failed;
        vm.system_message = message.to_string();
        self.update_vm_info(ns, mci_id, vm)
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Read the VM's native status from the CSP, map and correct it,
    /// complete the target when reached (re-reading public IP and SSH
    /// port), and write the record back idempotently.
    pub async fn fetch_vm_status(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
    ) -> VmResult<VmStatusView> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;
        let csp_name = vm.csp_resource_name.clone();

        if vm.target_action != VmAction::Create
            && vm.target_action != VmAction::Terminate
            && csp_name.is_empty()
        {
            return Err(VmError::Invalid(format!(
                "vm '{vm_id}' has no CSP-side name"
            )));
        }

        let mut system_message = vm.system_message.clone();
        let native = if vm.status != VmStatus::Terminated && !csp_name.is_empty() {
            match self.csp.get_vm_status(&vm.connection, &csp_name).await {
                Ok(info) => info.status,
                Err(err) => {
                    debug!(vm = %vm_id, error = %err, "status read failed");
                    system_message = err.to_string();
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let mapped = VmStatus::from_native(&native);
        let mut status = correct_status(mapped, vm.target_action, vm.status);
        let mut target_status = vm.target_status;
        let mut target_action = vm.target_action;

        if status == target_status {
            if target_status != VmStatus::Terminated {
                system_message = format!("{target_status}=={status}");
                target_status = VmStatus::Complete;
                target_action = VmAction::Complete;

                // The public endpoint may have changed across the
                // transition; re-read it.
                if !csp_name.is_empty() {
                    match self.csp.get_vm(&vm.connection, &csp_name).await {
                        Ok(info) => {
                            vm.public_ip = info.public_ip;
                            vm.private_ip = info.private_ip;
                            vm.ssh_port = names::ssh_port_from_access_point(
                                &info.ssh_access_point,
                            )
                            .unwrap_or_else(|| vm.ssh_port.clone());
                        }
                        Err(err) => {
                            debug!(vm = %vm_id, error = %err, "public ip refresh failed");
                        }
                    }
                }
            } else {
                // Terminated stays finalized until the record is
                // deleted.
                status = VmStatus::Terminated;
                target_status = VmStatus::Terminated;
                target_action = VmAction::Terminate;
                system_message =
                    "terminated VM. No action is acceptable except deletion".to_string();
            }
        }

        vm.status = status;
        vm.target_status = target_status;
        vm.target_action = target_action;
        vm.system_message = system_message;

        if !csp_name.is_empty() {
            self.update_vm_info(ns, mci_id, &vm)?;
        }

        Ok(VmStatusView {
            id: vm.id.clone(),
            name: vm.name.clone(),
            csp_vm_name: csp_name,
            status,
            target_status,
            target_action,
            native_status: native,
            public_ip: vm.public_ip.clone(),
            private_ip: vm.private_ip.clone(),
            ssh_port: vm.ssh_port.clone(),
            system_message: vm.system_message.clone(),
            created_time: vm.created_time.clone(),
            mon_agent_status: vm.mon_agent_status.clone(),
        })
    }

    // ── Control actions ────────────────────────────────────────────

    /// Drive a lifecycle action (suspend/resume/reboot/terminate) and
    /// reconcile the resulting status.
    pub async fn control_vm(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        action: VmAction,
    ) -> VmResult<VmStatusView> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;

        if vm.status == VmStatus::Terminated && action != VmAction::Terminate {
            return Err(VmError::Invalid(format!(
                "vm '{vm_id}' is terminated; only deletion is acceptable"
            )));
        }
        if vm.target_action != VmAction::Complete && vm.target_action != VmAction::None
        {
            return Err(VmError::Invalid(format!(
                "vm '{vm_id}' is still executing {}; retry once it completes",
                vm.target_action
            )));
        }

        let (transitional, target) = match action {
            VmAction::Suspend => (VmStatus::Suspending, VmStatus::Suspended),
            VmAction::Resume => (VmStatus::Resuming, VmStatus::Running),
            VmAction::Reboot => (VmStatus::Rebooting, VmStatus::Running),
            VmAction::Terminate => (VmStatus::Terminating, VmStatus::Terminated),
            other => {
                return Err(VmError::Invalid(format!(
                    "'{other}' is not a vm control action"
                )))
            }
        };

        vm.target_action = action;
        vm.target_status = target;
        vm.status = transitional;
        self.update_vm_info(ns, mci_id, &vm)?;

        let csp_name = vm.csp_resource_name.clone();
        let call = match action {
            VmAction::Suspend => {
                self.csp
                    .control_vm(&vm.connection, &csp_name, VmControlAction::Suspend)
                    .await
            }
            VmAction::Resume => {
                self.csp
                    .control_vm(&vm.connection, &csp_name, VmControlAction::Resume)
                    .await
            }
            VmAction::Reboot => {
                self.csp
                    .control_vm(&vm.connection, &csp_name, VmControlAction::Reboot)
                    .await
            }
            VmAction::Terminate => {
                self.csp.terminate_vm(&vm.connection, &csp_name).await
            }
            _ => unreachable!(),
        };
        if let Err(err) = call {
            self.mark_failed(ns, mci_id, &mut vm, &err.to_string())?;
            return Err(err.into());
        }

        self.fetch_vm_status(ns, mci_id, vm_id).await
    }

    // ── Data disks ─────────────────────────────────────────────────

    /// Create a data disk and attach it to the VM. The attach is
    /// retried a few times; freshly created disks are not always
    /// immediately attachable.
    pub async fn provision_data_disk(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        disk_name: &str,
        disk_type: &str,
        disk_size: &str,
    ) -> VmResult<VmRecord> {
        let vm = self.get_vm(ns, mci_id, vm_id)?;

        let uid = names::gen_uid();
        let csp_name = csp_resource_name(&vm.connection, &uid);
        let req = DiskCreateReq {
            connection_name: vm.connection.clone(),
            req_info: DiskReqInfo {
                name: csp_name,
                disk_type: disk_type.to_string(),
                disk_size: disk_size.to_string(),
            },
        };
        let info = self.csp.create_disk(&req).await?;
        let record = SharedResourceRecord {
            kind: ResourceKind::DataDisk,
            id: disk_name.to_string(),
            uid,
            connection: vm.connection.clone(),
            csp_resource_id: info.iid.system_id,
            csp_resource_name: info.iid.name_id,
            cidr: None,
            parent_id: None,
            associated: Vec::new(),
        };
        self.kv.put_json(
            &keys::resource_key(ns, ResourceKind::DataDisk, disk_name),
            &record,
        )?;

        let mut last_err = None;
        for attempt in 0..DISK_ATTACH_RETRIES {
            match self.attach_data_disk(ns, mci_id, vm_id, disk_name).await {
                Ok(vm) => return Ok(vm),
                Err(err) => {
                    debug!(disk = %disk_name, attempt, error = %err, "attach failed");
                    last_err = Some(err);
                    tokio::time::sleep(DISK_ATTACH_BACKOFF).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            VmError::Invalid(format!("disk '{disk_name}' could not be attached"))
        }))
    }

    /// Attach an existing data disk to the VM.
    pub async fn attach_data_disk(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        disk_id: &str,
    ) -> VmResult<VmRecord> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;
        if vm.data_disk_ids.iter().any(|d| d == disk_id) {
            return Err(VmError::Invalid(format!(
                "disk '{disk_id}' is already attached to vm '{vm_id}'"
            )));
        }
        let disk = self.resources.get(ns, ResourceKind::DataDisk, disk_id)?;

        let req = DiskAttachDetachReq {
            connection_name: vm.connection.clone(),
            req_info: DiskVmReqInfo {
                vm_name: vm.csp_resource_name.clone(),
            },
        };
        self.csp.attach_disk(&disk.csp_resource_name, &req).await?;

        vm.data_disk_ids.push(disk_id.to_string());
        self.update_vm_info(ns, mci_id, &vm)?;
        let vm_key = keys::vm_key(ns, mci_id, vm_id);
        self.resources.update_association(
            ns,
            ResourceKind::DataDisk,
            disk_id,
            AssocOp::Add,
            &vm_key,
        )?;
        Ok(vm)
    }

    /// Detach a data disk from the VM.
    pub async fn detach_data_disk(
        &self,
        ns: &str,
        mci_id: &str,
        vm_id: &str,
        disk_id: &str,
    ) -> VmResult<VmRecord> {
        let mut vm = self.get_vm(ns, mci_id, vm_id)?;
        if !vm.data_disk_ids.iter().any(|d| d == disk_id) {
            return Err(VmError::Invalid(format!(
                "disk '{disk_id}' is not attached to vm '{vm_id}'"
            )));
        }
        let disk = self.resources.get(ns, ResourceKind::DataDisk, disk_id)?;

        let req = DiskAttachDetachReq {
            connection_name: vm.connection.clone(),
            req_info: DiskVmReqInfo {
                vm_name: vm.csp_resource_name.clone(),
            },
        };
        self.csp.detach_disk(&disk.csp_resource_name, &req).await?;

        vm.data_disk_ids.retain(|d| d != disk_id);
        self.update_vm_info(ns, mci_id, &vm)?;
        let vm_key = keys::vm_key(ns, mci_id, vm_id);
        self.resources.update_association(
            ns,
            ResourceKind::DataDisk,
            disk_id,
            AssocOp::Remove,
            &vm_key,
        )?;
        Ok(vm)
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Remove the VM record and every back-reference it holds. The VM
    /// itself must already be terminated (or never created).
    pub fn delete_vm(&self, ns: &str, mci_id: &str, vm_id: &str) -> VmResult<VmRecord> {
        let vm = self.get_vm(ns, mci_id, vm_id)?;
        let vm_key = keys::vm_key(ns, mci_id, vm_id);
        self.remove_associations(ns, &vm, &vm_key);
        self.kv.delete(&vm_key)?;
        info!(vm = %vm_id, %mci_id, "vm record deleted");
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_resource::shared_resource_id;
    use skymesh_spider::fake::FakeSpider;
    use skymesh_state::{ImageRecord, MciRecord, SpecRecord};

    const NS: &str = "demo";
    const MCI: &str = "m1";
    const CONN: &str = "aws-ap-northeast-2";
    const SPEC: &str = "aws-ap-northeast-2-t2-small";
    const IMAGE: &str = "ubuntu22.04";

    struct Harness {
        engine: VmEngine,
        spider: Arc<FakeSpider>,
        kv: KvStore,
        resources: SharedResourceManager,
    }

    async fn harness() -> Harness {
        let kv = KvStore::open_in_memory().unwrap();
        let catalog = Catalog::new(kv.clone(), "system-ns");
        let spider = Arc::new(FakeSpider::new());
        let resources = SharedResourceManager::new(kv.clone(), spider.clone());
        let engine = VmEngine::new(
            kv.clone(),
            catalog.clone(),
            spider.clone(),
            resources.clone(),
        );

        catalog
            .put_spec(
                "system-ns",
                &SpecRecord {
                    id: SPEC.to_string(),
                    connection: CONN.to_string(),
                    csp_spec_name: "t2.small".to_string(),
                    provider: "aws".to_string(),
                    region: "ap-northeast-2".to_string(),
                    root_disk_type: None,
                    root_disk_size: None,
                    cost_per_hour: Some(0.026),
                    infra_type: None,
                },
            )
            .unwrap();
        catalog
            .put_image(
                "system-ns",
                &ImageRecord {
                    id: IMAGE.to_string(),
                    connection: CONN.to_string(),
                    csp_image_name: "ami-0ubuntu2204".to_string(),
                    os_family: Some("ubuntu".to_string()),
                    infra_type: None,
                },
            )
            .unwrap();

        // MCI shell the VMs hang off.
        kv.put_json(
            &keys::mci_key(NS, MCI),
            &MciRecord {
                id: MCI.to_string(),
                uid: "u-mci".to_string(),
                name: MCI.to_string(),
                ..MciRecord::default()
            },
        )
        .unwrap();

        resources
            .ensure_for_connection(NS, CONN, true, &mut Vec::new())
            .await
            .unwrap();

        Harness {
            engine,
            spider,
            kv,
            resources,
        }
    }

    fn vm_record(id: &str) -> VmRecord {
        let shared = shared_resource_id(NS, CONN);
        VmRecord {
            id: id.to_string(),
            uid: format!("u-{id}"),
            name: id.to_string(),
            connection: CONN.to_string(),
            spec_id: SPEC.to_string(),
            image_id: IMAGE.to_string(),
            v_net_id: shared.clone(),
            subnet_id: shared.clone(),
            security_group_ids: vec![shared.clone()],
            ssh_key_id: shared,
            status: VmStatus::Creating,
            target_status: VmStatus::Running,
            target_action: VmAction::Create,
            ..VmRecord::default()
        }
    }

    #[tokio::test]
    async fn create_fills_record_and_reaches_running() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let vm = h.engine.get_vm(NS, MCI, "v-1").unwrap();
        assert_eq!(vm.status, VmStatus::Running);
        assert_eq!(vm.target_status, VmStatus::Complete);
        assert_eq!(vm.target_action, VmAction::Complete);
        assert!(!vm.public_ip.is_empty());
        assert_eq!(vm.ssh_port, "22");
        assert!(vm.csp_resource_name.starts_with(CONN));
        assert!(!vm.created_time.is_empty());
        assert_eq!(vm.mon_agent_status, "notInstalled");
    }

    #[tokio::test]
    async fn create_adds_back_references() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let vm_key = keys::vm_key(NS, MCI, "v-1");
        let shared = shared_resource_id(NS, CONN);
        for kind in [
            ResourceKind::VNet,
            ResourceKind::Subnet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            let record = h.resources.get(NS, kind, &shared).unwrap();
            assert!(
                record.associated.contains(&vm_key),
                "{kind} missing back-reference"
            );
        }
    }

    #[tokio::test]
    async fn csp_failure_marks_vm_failed() {
        let h = harness().await;
        h.spider.fail_vm_create_call(1);
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();

        let err = h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap_err();
        assert!(matches!(err, VmError::Csp(_)));

        let vm = h.engine.get_vm(NS, MCI, "v-1").unwrap();
        assert_eq!(vm.status, VmStatus::Failed);
        assert!(vm.system_message.contains("capacity"));
    }

    #[tokio::test]
    async fn missing_field_fails_validation() {
        let h = harness().await;
        let mut record = vm_record("v-1");
        record.ssh_key_id = String::new();
        h.engine.create_vm_object(NS, MCI, &record).unwrap();

        let err = h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap_err();
        assert!(matches!(err, VmError::Invalid(_)));
        let vm = h.engine.get_vm(NS, MCI, "v-1").unwrap();
        assert_eq!(vm.status, VmStatus::Failed);
    }

    #[tokio::test]
    async fn vm_object_requires_existing_mci() {
        let h = harness().await;
        let err = h
            .engine
            .create_vm_object(NS, "ghost", &vm_record("v-1"))
            .unwrap_err();
        assert!(matches!(err, VmError::MciNotFound(_)));
    }

    #[tokio::test]
    async fn update_vm_info_skips_identical_writes() {
        let h = harness().await;
        let record = vm_record("v-1");
        h.engine.create_vm_object(NS, MCI, &record).unwrap();

        // Unchanged record: the stored bytes stay put.
        let before = h.kv.get(&keys::vm_key(NS, MCI, "v-1")).unwrap();
        h.engine.update_vm_info(NS, MCI, &record).unwrap();
        let after = h.kv.get(&keys::vm_key(NS, MCI, "v-1")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reconcile_upgrades_undefined_to_creating_during_create() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        // CSP momentarily reports a status outside the whitelist.
        let vm = h.engine.get_vm(NS, MCI, "v-1").unwrap();
        h.spider.set_vm_status(&vm.csp_resource_name, "Booting");
        let mut stored = vm.clone();
        stored.status = VmStatus::Creating;
        stored.target_status = VmStatus::Running;
        stored.target_action = VmAction::Create;
        h.engine.update_vm_info(NS, MCI, &stored).unwrap();

        let view = h.engine.fetch_vm_status(NS, MCI, "v-1").await.unwrap();
        assert_eq!(view.status, VmStatus::Creating);
        assert_eq!(view.native_status, "Booting");
    }

    #[tokio::test]
    async fn reconcile_completes_target_when_reached() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let mut vm = h.engine.get_vm(NS, MCI, "v-1").unwrap();
        vm.status = VmStatus::Creating;
        vm.target_status = VmStatus::Running;
        vm.target_action = VmAction::Create;
        vm.public_ip = String::new();
        h.engine.update_vm_info(NS, MCI, &vm).unwrap();

        let view = h.engine.fetch_vm_status(NS, MCI, "v-1").await.unwrap();
        assert_eq!(view.status, VmStatus::Running);
        assert_eq!(view.target_status, VmStatus::Complete);
        assert_eq!(view.target_action, VmAction::Complete);
        // Public endpoint was re-read on completion.
        assert!(!view.public_ip.is_empty());
    }

    #[tokio::test]
    async fn suspend_resume_cycle() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let view = h
            .engine
            .control_vm(NS, MCI, "v-1", VmAction::Suspend)
            .await
            .unwrap();
        assert_eq!(view.status, VmStatus::Suspended);
        assert_eq!(view.target_status, VmStatus::Complete);

        let view = h
            .engine
            .control_vm(NS, MCI, "v-1", VmAction::Resume)
            .await
            .unwrap();
        assert_eq!(view.status, VmStatus::Running);
    }

    #[tokio::test]
    async fn terminate_is_terminal() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let view = h
            .engine
            .control_vm(NS, MCI, "v-1", VmAction::Terminate)
            .await
            .unwrap();
        assert_eq!(view.status, VmStatus::Terminated);

        let err = h
            .engine
            .control_vm(NS, MCI, "v-1", VmAction::Resume)
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Invalid(_)));
    }

    #[tokio::test]
    async fn delete_removes_record_and_back_references() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();
        h.engine
            .control_vm(NS, MCI, "v-1", VmAction::Terminate)
            .await
            .unwrap();

        h.engine.delete_vm(NS, MCI, "v-1").unwrap();

        assert!(h.engine.get_vm(NS, MCI, "v-1").is_err());
        let shared = shared_resource_id(NS, CONN);
        for kind in [
            ResourceKind::VNet,
            ResourceKind::Subnet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            let record = h.resources.get(NS, kind, &shared).unwrap();
            assert!(record.associated.is_empty(), "{kind} still referenced");
        }
    }

    #[tokio::test]
    async fn data_disk_provision_attach_detach() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();

        let vm = h
            .engine
            .provision_data_disk(NS, MCI, "v-1", "data-1", "gp2", "100")
            .await
            .unwrap();
        assert_eq!(vm.data_disk_ids, vec!["data-1".to_string()]);

        let vm_key = keys::vm_key(NS, MCI, "v-1");
        let disk = h
            .resources
            .get(NS, ResourceKind::DataDisk, "data-1")
            .unwrap();
        assert!(disk.associated.contains(&vm_key));

        // Double attach is refused.
        let err = h
            .engine
            .attach_data_disk(NS, MCI, "v-1", "data-1")
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Invalid(_)));

        let vm = h
            .engine
            .detach_data_disk(NS, MCI, "v-1", "data-1")
            .await
            .unwrap();
        assert!(vm.data_disk_ids.is_empty());
        let disk = h
            .resources
            .get(NS, ResourceKind::DataDisk, "data-1")
            .unwrap();
        assert!(disk.associated.is_empty());
    }

    #[tokio::test]
    async fn second_vm_gets_a_bastion() {
        let h = harness().await;
        h.engine.create_vm_object(NS, MCI, &vm_record("v-1")).unwrap();
        h.engine.create_vm(NS, MCI, "v-1", false).await.unwrap();
        h.engine.create_vm_object(NS, MCI, &vm_record("v-2")).unwrap();
        h.engine.create_vm(NS, MCI, "v-2", false).await.unwrap();

        let vm = h.engine.get_vm(NS, MCI, "v-2").unwrap();
        assert_eq!(vm.bastion_vm_id.as_deref(), Some("v-1"));
    }
}
