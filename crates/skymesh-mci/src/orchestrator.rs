//! MciOrchestrator — top-level MCI creation and inspection.
//!
//! The dynamic create pipeline: validate → create the MCI shell and VM
//! objects → check spec/image availability → reserve shared resources
//! (rolling back exactly what this request created on failure) →
//! optional hold → fan out VM creation with pacing → apply the
//! partial-failure policy → reconcile → post-create hooks → record
//! history.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use skymesh_core::{for_each_bounded, names, MAX_CONCURRENCY};
use skymesh_history::{HistoryStore, RiskLevel};
use skymesh_resource::{CreatedResource, SharedResourceManager};
use skymesh_spider::CspApi;
use skymesh_state::requests::{MciDynamicReq, VmDynamicReq};
use skymesh_state::{
    keys, Catalog, CreationPhase, KvStore, MciCreationErrors, MciRecord,
    PartialFailurePolicy, SpecRecord, StatusCount, SubGroupRecord, VmAction,
    VmCreationError, VmRecord, VmStatus,
};
use skymesh_vm::{VmEngine, VmStatusView};

use crate::actions::{DeleteOption, MciAction};
use crate::error::{MciError, MciResult};
use crate::hold::{HoldRegistry, HoldSignal};
use crate::hooks::{CommandRunner, MonitoringHooks, NoopCommandRunner, NoopMonitoring};
use crate::status;

/// Wait before contacting VMs for agent installation.
const MONITORING_WAIT_SMALL: Duration = Duration::from_secs(30);
const MONITORING_WAIT_LARGE: Duration = Duration::from_secs(60);
/// VM count above which the longer monitoring wait applies.
const MONITORING_LARGE_THRESHOLD: usize = 5;
/// Settle before post-deployment commands run.
const POST_COMMAND_SETTLE: Duration = Duration::from_secs(5);
/// Settle before rolling back resources created by a failed request.
const PREP_FAILURE_SETTLE: Duration = Duration::from_secs(5);

/// Per-VM-create pacing: `min(200ms × index, 5s)`.
fn stagger_delay(index: usize) -> Duration {
    Duration::from_millis((200 * index as u64).min(5_000))
}

/// Whether the creation proceeds immediately or parks for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOption {
    Create,
    Hold,
}

/// An MCI record with its VMs assembled from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MciView {
    pub mci: MciRecord,
    pub vms: Vec<VmRecord>,
}

/// Reconciled status of an MCI.
#[derive(Debug, Clone, PartialEq)]
pub struct MciStatusView {
    pub id: String,
    pub status: String,
    pub status_count: StatusCount,
    pub target_status: VmStatus,
    pub target_action: VmAction,
    pub master_vm_id: Option<String>,
    pub master_ip: String,
    pub vms: Vec<VmStatusView>,
}

/// One sub-group of the request, resolved against the catalog.
#[derive(Debug, Clone)]
pub(crate) struct SubGroupPlan {
    pub(crate) req: VmDynamicReq,
    pub(crate) group: String,
    pub(crate) connection: String,
    pub(crate) spec: SpecRecord,
    pub(crate) csp_image_name: String,
    pub(crate) vm_names: Vec<String>,
}

/// Top-level orchestrator for multi-cloud infrastructures.
#[derive(Clone)]
pub struct MciOrchestrator {
    pub(crate) kv: KvStore,
    pub(crate) catalog: Catalog,
    pub(crate) csp: Arc<dyn CspApi>,
    pub(crate) resources: SharedResourceManager,
    pub(crate) history: HistoryStore,
    pub(crate) engine: VmEngine,
    pub(crate) hold: HoldRegistry,
    pub(crate) monitoring: Arc<dyn MonitoringHooks>,
    pub(crate) commands: Arc<dyn CommandRunner>,
}

impl MciOrchestrator {
    /// Wire an orchestrator over the shared store and CSP client, with
    /// no-op post-create hooks.
    pub fn new(kv: KvStore, catalog: Catalog, csp: Arc<dyn CspApi>) -> Self {
        let resources = SharedResourceManager::new(kv.clone(), csp.clone());
        let history = HistoryStore::new(kv.clone(), catalog.clone());
        let engine = VmEngine::new(
            kv.clone(),
            catalog.clone(),
            csp.clone(),
            resources.clone(),
        );
        Self {
            kv,
            catalog,
            csp,
            resources,
            history,
            engine,
            hold: HoldRegistry::new(),
            monitoring: Arc::new(NoopMonitoring),
            commands: Arc::new(NoopCommandRunner),
        }
    }

    /// Replace the post-create hooks.
    pub fn with_hooks(
        mut self,
        monitoring: Arc<dyn MonitoringHooks>,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        self.monitoring = monitoring;
        self.commands = commands;
        self
    }

    pub fn hold_registry(&self) -> &HoldRegistry {
        &self.hold
    }

    pub fn engine(&self) -> &VmEngine {
        &self.engine
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    // ── Create pipeline ────────────────────────────────────────────

    /// Create an MCI from a dynamic request.
    pub async fn create_mci_dynamic(
        &self,
        ns: &str,
        req: &MciDynamicReq,
        deploy: DeployOption,
    ) -> MciResult<MciView> {
        names::check_name(ns).map_err(MciError::Validation)?;
        names::check_name(&names::to_lower(&req.name)).map_err(MciError::Validation)?;
        if req.vm.is_empty() {
            return Err(MciError::Validation("no VM requests provided".to_string()));
        }

        // Resolve every sub-group against the catalog (and the risk
        // gate) before anything is written.
        let mut plans = Vec::with_capacity(req.vm.len());
        for vm_req in &req.vm {
            plans.push(self.plan_sub_group(ns, req, vm_req)?);
        }
        let total_vm_count: usize = plans.iter().map(|p| p.vm_names.len()).sum();
        info!(mci = %req.name, %ns, vms = total_vm_count, "creating mci");

        // MCI shell in Preparing; an existing record rejects the
        // request atomically.
        let mci = MciRecord {
            id: req.name.clone(),
            uid: names::gen_uid(),
            name: req.name.clone(),
            status: VmStatus::Preparing.to_string(),
            target_status: VmStatus::Prepared,
            target_action: VmAction::None,
            description: req.description.clone(),
            install_mon_agent: req.install_mon_agent.clone(),
            post_command: req.post_command.clone(),
            system_label: req.system_label.clone(),
            label: req.label.clone(),
            ..MciRecord::default()
        };
        let written = self
            .kv
            .put_json_if_absent(&keys::mci_key(ns, &req.name), &mci)?;
        if !written {
            return Err(MciError::Precondition(format!(
                "mci '{}' already exists in namespace '{ns}'",
                req.name
            )));
        }

        // VM objects in Preparing, so the whole deployment is visible
        // while resources are reserved.
        for plan in &plans {
            for name in &plan.vm_names {
                let vm = VmRecord {
                    id: name.clone(),
                    uid: names::gen_uid(),
                    name: name.clone(),
                    sub_group_id: Some(plan.group.clone()),
                    connection: plan.connection.clone(),
                    status: VmStatus::Preparing,
                    target_status: VmStatus::Prepared,
                    target_action: VmAction::None,
                    description: plan.req.description.clone(),
                    label: plan.req.label.clone(),
                    ..VmRecord::default()
                };
                self.kv.put_json(&keys::vm_key(ns, &req.name, name), &vm)?;
            }
        }

        // Availability checks against the CSP, in parallel.
        self.check_availability(ns, &req.name, &plans).await?;

        // Shared-resource reservation, in parallel, with rollback of
        // exactly what this request created on any failure.
        self.prepare_shared_resources(ns, &req.name, &plans).await?;
        self.update_mci_record(ns, &req.name, |mci| {
            mci.status = VmStatus::Prepared.to_string();
            mci.system_message =
                format!("All {total_vm_count} VMs prepared successfully");
        })?;

        // Hold gate.
        if deploy == DeployOption::Hold {
            info!(mci = %req.name, "holding before VM provisioning");
            if self.hold.hold(&keys::mci_key(ns, &req.name)).await
                == HoldSignal::Withdraw
            {
                warn!(mci = %req.name, "creation withdrawn, force-deleting");
                self.del_mci(ns, &req.name, DeleteOption::Force).await?;
                return Err(MciError::Withdrawn);
            }
        }

        // Provision the VMs.
        let (object_errors, create_errors) =
            self.provision_vms(ns, req, &plans).await?;
        let failed_count = object_errors.len() + create_errors.len();
        let policy = req.policy_on_partial_failure;

        if failed_count > 0 && policy == PartialFailurePolicy::Rollback {
            error!(
                mci = %req.name,
                failed = failed_count,
                "VM creation failed, rolling back entire mci"
            );
            self.del_mci(ns, &req.name, DeleteOption::Force).await?;
            return Err(MciError::RolledBack(format!(
                "{failed_count} of {total_vm_count} VMs failed; the mci was deleted"
            )));
        }

        // Reconcile and finalize the record.
        let status_view = self.get_mci_status(ns, &req.name).await?;
        self.update_mci_record(ns, &req.name, |mci| {
            mci.status = status_view.status.clone();
            mci.status_count = status_view.status_count;
        })?;

        // Post-create hooks.
        self.run_monitoring_hook(ns, &req.name, &req.install_mon_agent, total_vm_count)
            .await;
        self.run_post_commands(ns, &req.name, req.post_command.as_ref())
            .await;

        // refine removes the failed VMs once the others are up.
        if failed_count > 0 && policy == PartialFailurePolicy::Refine {
            info!(mci = %req.name, "refining failed VMs per policy");
            if let Err(err) = self
                .handle_mci_action(ns, &req.name, MciAction::Refine, true)
                .await
            {
                error!(mci = %req.name, error = %err, "refine after creation failed");
            }
        }

        if failed_count > 0 {
            let errors = MciCreationErrors {
                vm_object_creation_errors: object_errors,
                vm_creation_errors: create_errors,
                total_vm_count: total_vm_count as u32,
                successful_vm_count: (total_vm_count - failed_count) as u32,
                failed_vm_count: failed_count as u32,
                failure_handling_strategy: policy,
            };
            self.update_mci_record(ns, &req.name, |mci| {
                mci.creation_errors = Some(errors.clone());
            })?;
            warn!(
                mci = %req.name,
                failed = failed_count,
                total = total_vm_count,
                policy = %policy,
                "mci created with failures"
            );
        } else {
            info!(mci = %req.name, vms = total_vm_count, "mci created");
        }

        let view = self.get_mci_info(ns, &req.name).await?;
        self.history.record_mci_outcome(
            &req.name,
            &view.vms,
            view.mci.creation_errors.as_ref(),
        )?;
        Ok(view)
    }

    fn plan_sub_group(
        &self,
        ns: &str,
        req: &MciDynamicReq,
        vm_req: &VmDynamicReq,
    ) -> MciResult<SubGroupPlan> {
        let group = names::to_lower(&vm_req.name);
        names::check_name(&group).map_err(MciError::Validation)?;

        let spec = self.catalog.get_spec(ns, &vm_req.common_spec).map_err(|e| {
            MciError::Validation(format!(
                "failed to find VM specification '{}' for '{}': {e}",
                vm_req.common_spec, vm_req.name
            ))
        })?;
        let connection = vm_req
            .connection
            .clone()
            .unwrap_or_else(|| spec.connection.clone());
        self.catalog.get_connection(&connection).map_err(|e| {
            MciError::Validation(format!(
                "cannot retrieve connection config '{connection}' for '{}': {e}",
                vm_req.name
            ))
        })?;

        let csp_image_name = self
            .catalog
            .get_image(ns, &vm_req.common_image)
            .map(|image| image.csp_image_name)
            .unwrap_or_else(|_| vm_req.common_image.clone());

        if req.risk_gating {
            let analysis = self.history.analyze(&vm_req.common_spec, &csp_image_name)?;
            if analysis.overall_risk.level == RiskLevel::High {
                return Err(MciError::Validation(format!(
                    "high provisioning failure risk for spec '{}' with image '{}': {}",
                    vm_req.common_spec, vm_req.common_image, analysis.overall_risk.message
                )));
            }
        }

        let size = vm_req.sub_group_size.max(1);
        let vm_names = if size == 1 {
            vec![group.clone()]
        } else {
            (1..=size).map(|i| format!("{group}-{i}")).collect()
        };

        Ok(SubGroupPlan {
            req: vm_req.clone(),
            group,
            connection,
            spec,
            csp_image_name,
            vm_names,
        })
    }

    /// Verify each sub-group's spec and image exist on the CSP side.
    async fn check_availability(
        &self,
        ns: &str,
        mci_id: &str,
        plans: &[SubGroupPlan],
    ) -> MciResult<()> {
        let ns_owned = ns.to_string();
        let mci_owned = mci_id.to_string();

        let results = for_each_bounded(plans.to_vec(), MAX_CONCURRENCY, |_, plan| {
            let engine = self.engine.clone();
            let ns = ns_owned.clone();
            let mci = mci_owned.clone();
            let csp = self.csp.clone();
            async move {
                let spec_check = csp
                    .lookup_spec(&plan.connection, &plan.spec.csp_spec_name)
                    .await
                    .map_err(|e| {
                        format!(
                            "spec '{}' is not available in connection '{}': {e}",
                            plan.spec.csp_spec_name, plan.connection
                        )
                    });
                let image_check = csp
                    .lookup_image(&plan.connection, &plan.csp_image_name)
                    .await
                    .map_err(|e| {
                        format!(
                            "image '{}' is not available in connection '{}': {e}",
                            plan.csp_image_name, plan.connection
                        )
                    });

                let mut problems = Vec::new();
                if let Err(e) = spec_check {
                    problems.push(e);
                }
                if let Err(e) = image_check {
                    problems.push(e);
                }
                if problems.is_empty() {
                    Ok(())
                } else {
                    let message = problems.join("; ");
                    for name in &plan.vm_names {
                        let _ = engine.update_vm_status(
                            &ns,
                            &mci,
                            name,
                            VmStatus::Failed,
                            None,
                            &message,
                        );
                    }
                    Err(format!("vm '{}': {message}", plan.req.name))
                }
            }
        })
        .await;

        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }
        self.update_mci_record(ns, mci_id, |mci| {
            mci.status = VmStatus::Failed.to_string();
            mci.system_message = failures.join("; ");
        })?;
        Err(MciError::Validation(failures.join("; ")))
    }

    /// Reserve shared resources per connection, rolling back this
    /// request's creations if any sub-group fails.
    async fn prepare_shared_resources(
        &self,
        ns: &str,
        mci_id: &str,
        plans: &[SubGroupPlan],
    ) -> MciResult<()> {
        let ns_owned = ns.to_string();
        let outcomes = for_each_bounded(plans.to_vec(), MAX_CONCURRENCY, |_, plan| {
            let resources = self.resources.clone();
            let ns = ns_owned.clone();
            async move {
                let mut created = Vec::new();
                let result = resources
                    .ensure_for_connection(&ns, &plan.connection, true, &mut created)
                    .await;
                (plan, created, result)
            }
        })
        .await;

        let mut all_created: Vec<CreatedResource> = Vec::new();
        let mut failures = Vec::new();
        for (plan, created, result) in outcomes {
            all_created.extend(created);
            match result {
                Ok(()) => {
                    for name in &plan.vm_names {
                        self.engine.update_vm_status(
                            ns,
                            mci_id,
                            name,
                            VmStatus::Prepared,
                            Some(VmStatus::Running),
                            "Resources prepared successfully",
                        )?;
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    for name in &plan.vm_names {
                        let _ = self.engine.update_vm_status(
                            ns,
                            mci_id,
                            name,
                            VmStatus::Failed,
                            None,
                            &message,
                        );
                    }
                    failures.push(format!("vm '{}': {message}", plan.req.name));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        warn!(
            mci = %mci_id,
            failed = failures.len(),
            created = all_created.len(),
            "resource preparation failed, rolling back"
        );
        sleep(PREP_FAILURE_SETTLE).await;
        let rollback = self.resources.rollback(ns, &all_created).await;

        self.update_mci_record(ns, mci_id, |mci| {
            mci.status = VmStatus::Failed.to_string();
            mci.system_message = failures.join("; ");
        })?;

        let mut message = format!(
            "mci '{mci_id}' creation failed during resource preparation: {}",
            failures.join("; ")
        );
        match rollback {
            Ok(()) => {
                message.push_str("; all created resources have been rolled back")
            }
            Err(err) => message = format!("{message}; {err}"),
        }
        Err(MciError::SharedResource(message))
    }

    /// Create sub-group records and fan out the VM creations.
    async fn provision_vms(
        &self,
        ns: &str,
        req: &MciDynamicReq,
        plans: &[SubGroupPlan],
    ) -> MciResult<(Vec<VmCreationError>, Vec<VmCreationError>)> {
        let mci_id = &req.name;
        let shared = |connection: &str| {
            skymesh_resource::shared_resource_id(ns, connection)
        };

        self.update_mci_record(ns, mci_id, |mci| {
            mci.status = VmStatus::Creating.to_string();
            mci.target_status = VmStatus::Running;
            mci.target_action = VmAction::Create;
            mci.system_message = "Starting VM provisioning".to_string();
        })?;

        let mut object_errors = Vec::new();
        let mut create_order: Vec<String> = Vec::new();

        for plan in plans {
            let sub_group = SubGroupRecord {
                id: plan.group.clone(),
                name: plan.group.clone(),
                uid: names::gen_uid(),
                size: plan.vm_names.len() as u32,
                vm_ids: plan.vm_names.clone(),
            };
            self.kv.put_json(
                &keys::sub_group_key(ns, mci_id, &plan.group),
                &sub_group,
            )?;

            let shared_id = shared(&plan.connection);
            for name in &plan.vm_names {
                match self.materialize_vm(ns, mci_id, plan, name, &shared_id) {
                    Ok(()) => create_order.push(name.clone()),
                    Err(err) => {
                        warn!(vm = %name, error = %err, "vm object creation failed");
                        object_errors.push(VmCreationError {
                            vm_name: name.clone(),
                            phase: CreationPhase::ObjectCreation,
                            error: err.to_string(),
                            timestamp: Utc::now().to_rfc3339(),
                        });
                    }
                }
            }
        }

        info!(mci = %mci_id, vms = create_order.len(), "creating VMs");
        let ns_owned = ns.to_string();
        let mci_owned = mci_id.to_string();
        let results = for_each_bounded(create_order, MAX_CONCURRENCY, |index, name| {
            let engine = self.engine.clone();
            let ns = ns_owned.clone();
            let mci = mci_owned.clone();
            async move {
                // Pace the creations to soften CSP rate limits.
                sleep(stagger_delay(index)).await;
                match engine.create_vm(&ns, &mci, &name, false).await {
                    Ok(()) => None,
                    Err(err) => Some(VmCreationError {
                        vm_name: name,
                        phase: CreationPhase::VmCreation,
                        error: err.to_string(),
                        timestamp: Utc::now().to_rfc3339(),
                    }),
                }
            }
        })
        .await;
        let create_errors: Vec<VmCreationError> =
            results.into_iter().flatten().collect();

        Ok((object_errors, create_errors))
    }

    /// Flip a Preparing/Prepared VM object into a full Creating record.
    fn materialize_vm(
        &self,
        ns: &str,
        mci_id: &str,
        plan: &SubGroupPlan,
        name: &str,
        shared_id: &str,
    ) -> MciResult<()> {
        let mut vm = self.engine.get_vm(ns, mci_id, name)?;
        vm.sub_group_id = Some(plan.group.clone());
        vm.connection = plan.connection.clone();
        vm.spec_id = plan.req.common_spec.clone();
        vm.image_id = plan.req.common_image.clone();
        vm.csp_image_name = plan.csp_image_name.clone();
        vm.v_net_id = shared_id.to_string();
        vm.subnet_id = shared_id.to_string();
        vm.security_group_ids = vec![shared_id.to_string()];
        vm.ssh_key_id = shared_id.to_string();
        vm.root_disk_type = plan.req.root_disk_type.clone();
        vm.root_disk_size = plan.req.root_disk_size.clone();
        vm.vm_user_password = plan.req.vm_user_password.clone();
        vm.status = VmStatus::Creating;
        vm.target_status = VmStatus::Running;
        vm.target_action = VmAction::Create;
        vm.system_message = String::new();
        self.engine.update_vm_info(ns, mci_id, &vm)?;
        Ok(())
    }

    // ── Scale-out ──────────────────────────────────────────────────

    /// Add VMs to an existing sub-group, cloning its template VM.
    pub async fn scale_out_sub_group(
        &self,
        ns: &str,
        mci_id: &str,
        sub_group_id: &str,
        additional: u32,
    ) -> MciResult<MciView> {
        if additional == 0 {
            return Err(MciError::Validation(
                "number of VMs to add must be positive".to_string(),
            ));
        }
        let sg_key = keys::sub_group_key(ns, mci_id, sub_group_id);
        let mut sub_group: SubGroupRecord =
            self.kv.get_json(&sg_key)?.ok_or_else(|| {
                MciError::Precondition(format!("sub-group '{sub_group_id}' not found"))
            })?;
        let template_id = sub_group.vm_ids.first().cloned().ok_or_else(|| {
            MciError::Precondition(format!("sub-group '{sub_group_id}' has no VMs"))
        })?;
        let template = self.engine.get_vm(ns, mci_id, &template_id)?;

        let start = sub_group.size + 1;
        let new_names: Vec<String> = (start..start + additional)
            .map(|i| format!("{sub_group_id}-{i}"))
            .collect();

        for name in &new_names {
            let mut vm = template.clone();
            vm.id = name.clone();
            vm.name = name.clone();
            vm.uid = names::gen_uid();
            vm.status = VmStatus::Creating;
            vm.target_status = VmStatus::Running;
            vm.target_action = VmAction::Create;
            vm.system_message = String::new();
            vm.public_ip = String::new();
            vm.private_ip = String::new();
            vm.ssh_port = String::new();
            vm.csp_resource_id = String::new();
            vm.csp_resource_name = String::new();
            vm.created_time = String::new();
            vm.bastion_vm_id = None;
            self.engine.create_vm_object(ns, mci_id, &vm)?;
        }
        sub_group.size += additional;
        sub_group.vm_ids.extend(new_names.iter().cloned());
        self.kv.put_json(&sg_key, &sub_group)?;

        info!(%mci_id, %sub_group_id, added = additional, "scaling out sub-group");
        let ns_owned = ns.to_string();
        let mci_owned = mci_id.to_string();
        let results = for_each_bounded(new_names, MAX_CONCURRENCY, |index, name| {
            let engine = self.engine.clone();
            let ns = ns_owned.clone();
            let mci = mci_owned.clone();
            async move {
                sleep(stagger_delay(index)).await;
                engine
                    .create_vm(&ns, &mci, &name, false)
                    .await
                    .err()
                    .map(|err| format!("{name}: {err}"))
            }
        })
        .await;
        for failure in results.into_iter().flatten() {
            warn!(%mci_id, %failure, "scale-out vm failed");
        }

        self.get_mci_info(ns, mci_id).await
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// List VM ids of an MCI, ordered lexicographically by key.
    pub fn list_vm_ids(&self, ns: &str, mci_id: &str) -> MciResult<Vec<String>> {
        let prefix = keys::mci_descendants_prefix(ns, mci_id);
        let mut ids = Vec::new();
        for (key, _) in self.kv.list(&prefix)? {
            if let Some(id) = keys::vm_id_from_key(ns, mci_id, &key) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Load the VM records of an MCI, ordered by id.
    pub fn list_vms(&self, ns: &str, mci_id: &str) -> MciResult<Vec<VmRecord>> {
        let prefix = keys::mci_descendants_prefix(ns, mci_id);
        let mut vms = Vec::new();
        for (key, value) in self.kv.list(&prefix)? {
            if keys::vm_id_from_key(ns, mci_id, &key).is_some() {
                let vm: VmRecord = serde_json::from_str(&value).map_err(|e| {
                    skymesh_state::StateError::Deserialize(e.to_string())
                })?;
                vms.push(vm);
            }
        }
        Ok(vms)
    }

    /// List VM ids matching `field == value` over the fixed accessor
    /// table.
    pub fn list_vm_by_filter(
        &self,
        ns: &str,
        mci_id: &str,
        field: &str,
        value: &str,
    ) -> MciResult<Vec<String>> {
        Ok(self
            .list_vms(ns, mci_id)?
            .into_iter()
            .filter(|vm| crate::filter::matches(vm, field, value))
            .map(|vm| vm.id)
            .collect())
    }

    /// List VM ids of a sub-group.
    pub fn list_vm_by_sub_group(
        &self,
        ns: &str,
        mci_id: &str,
        sub_group_id: &str,
    ) -> MciResult<Vec<String>> {
        self.list_vm_by_filter(ns, mci_id, "subGroupId", sub_group_id)
    }

    pub fn get_mci_record(&self, ns: &str, mci_id: &str) -> MciResult<MciRecord> {
        self.kv
            .get_json::<MciRecord>(&keys::mci_key(ns, mci_id))?
            .ok_or_else(|| {
                MciError::Precondition(format!("mci '{mci_id}' does not exist"))
            })
    }

    pub(crate) fn update_mci_record(
        &self,
        ns: &str,
        mci_id: &str,
        apply: impl FnOnce(&mut MciRecord),
    ) -> MciResult<()> {
        let key = keys::mci_key(ns, mci_id);
        let Some(mut record) = self.kv.get_json::<MciRecord>(&key)? else {
            return Ok(());
        };
        let before = record.clone();
        apply(&mut record);
        if record != before {
            self.kv.put_json(&key, &record)?;
        }
        Ok(())
    }

    /// Reconcile every VM against the CSP and derive the MCI status.
    pub async fn get_mci_status(
        &self,
        ns: &str,
        mci_id: &str,
    ) -> MciResult<MciStatusView> {
        let record = self.get_mci_record(ns, mci_id)?;
        let vm_ids = self.list_vm_ids(ns, mci_id)?;

        let ns_owned = ns.to_string();
        let mci_owned = mci_id.to_string();
        let mut views = for_each_bounded(vm_ids, MAX_CONCURRENCY, |_, vm_id| {
            let engine = self.engine.clone();
            let ns = ns_owned.clone();
            let mci = mci_owned.clone();
            async move {
                match engine.fetch_vm_status(&ns, &mci, &vm_id).await {
                    Ok(view) => view,
                    Err(err) => {
                        debug!(vm = %vm_id, error = %err, "status fetch failed");
                        VmStatusView {
                            id: vm_id.clone(),
                            name: vm_id,
                            status: VmStatus::Failed,
                            system_message: err.to_string(),
                            ..VmStatusView::default()
                        }
                    }
                }
            }
        })
        .await;
        views.sort_by(|a, b| a.id.cmp(&b.id));

        let statuses: Vec<VmStatus> = views.iter().map(|v| v.status).collect();
        let (derived, counts) = status::derive(&statuses);

        let master = views.iter().find(|v| v.status == VmStatus::Running);
        let master_vm_id = master.map(|v| v.id.clone());
        let master_ip = master.map(|v| v.public_ip.clone()).unwrap_or_default();

        let mut target_status = record.target_status;
        let mut target_action = record.target_action;
        let targets: Vec<(VmStatus, VmStatus)> =
            views.iter().map(|v| (v.status, v.target_status)).collect();
        if !views.is_empty() && status::all_targets_done(&targets) {
            target_status = VmStatus::Complete;
            target_action = VmAction::Complete;
            self.update_mci_record(ns, mci_id, |mci| {
                mci.target_status = VmStatus::Complete;
                mci.target_action = VmAction::Complete;
                mci.status_count = counts;
            })?;
        }

        Ok(MciStatusView {
            id: mci_id.to_string(),
            status: derived,
            status_count: counts,
            target_status,
            target_action,
            master_vm_id,
            master_ip,
            vms: views,
        })
    }

    /// Load the MCI with a fresh status and its VM records.
    pub async fn get_mci_info(&self, ns: &str, mci_id: &str) -> MciResult<MciView> {
        let status_view = self.get_mci_status(ns, mci_id).await?;
        self.update_mci_record(ns, mci_id, |mci| {
            mci.status = status_view.status.clone();
            mci.status_count = status_view.status_count;
        })?;
        let mci = self.get_mci_record(ns, mci_id)?;
        let vms = self.list_vms(ns, mci_id)?;
        Ok(MciView { mci, vms })
    }

    /// List MCI ids of a namespace.
    pub fn list_mci_ids(&self, ns: &str) -> MciResult<Vec<String>> {
        let prefix = format!("/ns/{ns}/mci/");
        let mut ids = Vec::new();
        for (key, _) in self.kv.list(&prefix)? {
            if let Some(id) = keys::mci_id_from_key(ns, &key) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    // ── Hooks ──────────────────────────────────────────────────────

    async fn run_monitoring_hook(
        &self,
        ns: &str,
        mci_id: &str,
        install_mon_agent: &str,
        vm_count: usize,
    ) {
        if !install_mon_agent.contains("yes") {
            return;
        }
        if !self.monitoring.endpoint_healthy().await {
            warn!(mci = %mci_id, "monitoring endpoint unavailable, skipping agent installation");
            return;
        }
        let wait = if vm_count > MONITORING_LARGE_THRESHOLD {
            MONITORING_WAIT_LARGE
        } else {
            MONITORING_WAIT_SMALL
        };
        info!(mci = %mci_id, wait = ?wait, "waiting before agent installation");
        sleep(wait).await;
        match self.monitoring.install_agents(ns, mci_id).await {
            Ok(result) => info!(mci = %mci_id, %result, "monitoring agents installed"),
            Err(err) => error!(mci = %mci_id, error = %err, "agent installation failed"),
        }
    }

    async fn run_post_commands(
        &self,
        ns: &str,
        mci_id: &str,
        post_command: Option<&skymesh_state::PostCommand>,
    ) {
        let Some(command) = post_command else {
            return;
        };
        if command.command.is_empty() {
            return;
        }
        info!(mci = %mci_id, "waiting before post-deployment commands");
        sleep(POST_COMMAND_SETTLE).await;
        match self.commands.run(ns, mci_id, command).await {
            Ok(outputs) => {
                if let Err(err) = self.update_mci_record(ns, mci_id, |mci| {
                    mci.post_command_result = Some(outputs.clone());
                }) {
                    error!(mci = %mci_id, error = %err, "failed to store command results");
                }
            }
            Err(err) => {
                error!(mci = %mci_id, error = %err, "post-deployment commands failed")
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_is_capped_at_five_seconds() {
        assert_eq!(stagger_delay(0), Duration::from_millis(0));
        assert_eq!(stagger_delay(1), Duration::from_millis(200));
        assert_eq!(stagger_delay(10), Duration::from_millis(2_000));
        assert_eq!(stagger_delay(100), Duration::from_secs(5));
    }
}
