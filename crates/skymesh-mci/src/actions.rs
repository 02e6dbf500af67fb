//! MCI-level actions and deletion.
//!
//! Actions fan out per-VM lifecycle operations; `refine` removes only
//! the Failed/Undefined VMs; deletion guards on terminal statuses and
//! unwinds every back-reference.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use skymesh_core::{for_each_bounded, MAX_CONCURRENCY};
use skymesh_state::{keys, SubGroupRecord, VmAction, VmStatus};

use crate::error::{MciError, MciResult};
use crate::hold::HoldSignal;
use crate::orchestrator::MciOrchestrator;

/// Settle after terminating VMs before deletion proceeds.
const TERMINATE_SETTLE: Duration = Duration::from_secs(5);

/// Action applied to a whole MCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MciAction {
    Suspend,
    Resume,
    Reboot,
    Terminate,
    /// Delete only the Failed/Undefined VMs, keeping the rest.
    Refine,
    /// Release a held creation.
    Continue,
    /// Abort a held creation and force-delete the MCI.
    Withdraw,
}

/// Deletion behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOption {
    /// Refuse unless every VM is Terminated/Undefined/Failed.
    Standard,
    /// Delete records regardless of VM state.
    Force,
    /// Refine, terminate the remaining VMs, settle, then delete.
    Terminate,
}

impl MciOrchestrator {
    /// Apply an action to an MCI. Returns a human-readable summary.
    pub async fn handle_mci_action(
        &self,
        ns: &str,
        mci_id: &str,
        action: MciAction,
        force: bool,
    ) -> MciResult<String> {
        match action {
            MciAction::Continue => {
                let key = keys::mci_key(ns, mci_id);
                if self.hold.signal(&key, HoldSignal::Continue) {
                    Ok(format!("mci '{mci_id}' creation continued"))
                } else {
                    Err(MciError::Precondition(format!(
                        "mci '{mci_id}' is not holding"
                    )))
                }
            }
            MciAction::Withdraw => {
                let key = keys::mci_key(ns, mci_id);
                if self.hold.signal(&key, HoldSignal::Withdraw) {
                    Ok(format!("mci '{mci_id}' creation withdrawn"))
                } else {
                    Err(MciError::Precondition(format!(
                        "mci '{mci_id}' is not holding"
                    )))
                }
            }
            MciAction::Refine => self.refine_mci(ns, mci_id).await,
            MciAction::Suspend => {
                self.control_mci(ns, mci_id, VmAction::Suspend, force).await
            }
            MciAction::Resume => {
                self.control_mci(ns, mci_id, VmAction::Resume, force).await
            }
            MciAction::Reboot => {
                self.control_mci(ns, mci_id, VmAction::Reboot, force).await
            }
            MciAction::Terminate => {
                self.control_mci(ns, mci_id, VmAction::Terminate, force).await
            }
        }
    }

    /// Delete the Failed/Undefined VMs of an MCI, keeping the healthy
    /// ones and their sub-group memberships consistent.
    async fn refine_mci(&self, ns: &str, mci_id: &str) -> MciResult<String> {
        self.get_mci_record(ns, mci_id)?;
        let vms = self.list_vms(ns, mci_id)?;

        let mut removed = 0;
        for vm in vms {
            if vm.status != VmStatus::Failed && vm.status != VmStatus::Undefined {
                continue;
            }
            info!(vm = %vm.id, %mci_id, status = %vm.status, "refining vm");
            self.engine.delete_vm(ns, mci_id, &vm.id)?;
            removed += 1;

            if let Some(group) = &vm.sub_group_id {
                let sg_key = keys::sub_group_key(ns, mci_id, group);
                if let Some(mut sub_group) =
                    self.kv.get_json::<SubGroupRecord>(&sg_key)?
                {
                    sub_group.vm_ids.retain(|id| id != &vm.id);
                    sub_group.size = sub_group.vm_ids.len() as u32;
                    self.kv.put_json(&sg_key, &sub_group)?;
                }
            }
        }

        if removed > 0 {
            let status_view = self.get_mci_status(ns, mci_id).await?;
            self.update_mci_record(ns, mci_id, |mci| {
                mci.status = status_view.status.clone();
                mci.status_count = status_view.status_count;
            })?;
        }
        Ok(format!("refined mci '{mci_id}': removed {removed} vm(s)"))
    }

    /// Fan a lifecycle action out over the MCI's VMs.
    async fn control_mci(
        &self,
        ns: &str,
        mci_id: &str,
        action: VmAction,
        force: bool,
    ) -> MciResult<String> {
        self.get_mci_record(ns, mci_id)?;
        let vms = self.list_vms(ns, mci_id)?;

        // Terminated VMs (and never-created ones) have nothing to do.
        let eligible: Vec<String> = vms
            .iter()
            .filter(|vm| {
                vm.status != VmStatus::Terminated && !vm.csp_resource_name.is_empty()
            })
            .map(|vm| vm.id.clone())
            .collect();
        let total = eligible.len();

        info!(%mci_id, action = %action, vms = total, "controlling mci");
        let ns_owned = ns.to_string();
        let mci_owned = mci_id.to_string();
        let results = for_each_bounded(eligible, MAX_CONCURRENCY, |_, vm_id| {
            let engine = self.engine.clone();
            let ns = ns_owned.clone();
            let mci = mci_owned.clone();
            async move {
                engine
                    .control_vm(&ns, &mci, &vm_id, action)
                    .await
                    .err()
                    .map(|err| format!("{vm_id}: {err}"))
            }
        })
        .await;
        let failures: Vec<String> = results.into_iter().flatten().collect();

        let status_view = self.get_mci_status(ns, mci_id).await?;
        self.update_mci_record(ns, mci_id, |mci| {
            mci.status = status_view.status.clone();
            mci.status_count = status_view.status_count;
            mci.target_status = match action {
                VmAction::Suspend => VmStatus::Suspended,
                VmAction::Terminate => VmStatus::Terminated,
                _ => VmStatus::Running,
            };
            mci.target_action = action;
        })?;

        if failures.is_empty() {
            Ok(format!("{action} applied to {total} vm(s) of mci '{mci_id}'"))
        } else if force {
            warn!(%mci_id, failed = failures.len(), "action failures ignored (force)");
            Ok(format!(
                "{action} applied with {} failure(s): {}",
                failures.len(),
                failures.join("; ")
            ))
        } else {
            Err(MciError::Precondition(format!(
                "{action} failed for {} vm(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Delete an MCI and everything under it.
    ///
    /// `Standard` refuses while any VM is outside
    /// {Terminated, Undefined, Failed}; `Terminate` refines, terminates
    /// the rest, settles, then deletes; `Force` deletes records
    /// regardless.
    pub async fn del_mci(
        &self,
        ns: &str,
        mci_id: &str,
        option: DeleteOption,
    ) -> MciResult<()> {
        let key = keys::mci_key(ns, mci_id);
        self.get_mci_record(ns, mci_id)?;

        if option == DeleteOption::Terminate {
            let _ = self
                .handle_mci_action(ns, mci_id, MciAction::Refine, true)
                .await;
            let _ = self
                .handle_mci_action(ns, mci_id, MciAction::Terminate, true)
                .await;
            sleep(TERMINATE_SETTLE).await;
        }

        let vms = self.list_vms(ns, mci_id)?;
        if option == DeleteOption::Standard {
            let undeletable: Vec<&str> = vms
                .iter()
                .filter(|vm| {
                    !matches!(
                        vm.status,
                        VmStatus::Terminated | VmStatus::Undefined | VmStatus::Failed
                    )
                })
                .map(|vm| vm.id.as_str())
                .collect();
            if !undeletable.is_empty() {
                return Err(MciError::Precondition(format!(
                    "mci '{mci_id}' has non-terminated vm(s) [{}]; terminate them \
                     first or use the terminate/force option",
                    undeletable.join(", ")
                )));
            }
        }

        for vm in &vms {
            self.engine.delete_vm(ns, mci_id, &vm.id)?;
        }
        // Sub-groups and any remaining descendants go with the prefix.
        self.kv
            .delete_prefix(&keys::mci_descendants_prefix(ns, mci_id))?;
        self.kv.delete(&key)?;
        self.hold.remove(&key);
        info!(%mci_id, vms = vms.len(), "mci deleted");
        Ok(())
    }
}
