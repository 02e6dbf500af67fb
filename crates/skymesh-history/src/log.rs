//! Durable per-spec provisioning log.
//!
//! Failures are always recorded. Successes are recorded only when the
//! spec already has failures on record; the log is a
//! regret-minimization store, not a complete audit trail. Corrupted or
//! empty log values are deleted on read and treated as "no history".

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use skymesh_state::keys::{provision_log_key, PROVISION_LOG_PREFIX};
use skymesh_state::{
    Catalog, KvStore, MciCreationErrors, ProvisioningLog, StateResult, VmRecord,
    VmStatus,
};

use crate::risk::RiskAnalysis;

/// One provisioning outcome to fold into the log.
#[derive(Debug, Clone)]
pub struct ProvisioningEvent {
    pub spec_id: String,
    pub csp_image_name: String,
    pub is_success: bool,
    pub error_message: String,
    pub vm_name: String,
    pub mci_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Store for provisioning logs plus the analyzer entry point.
#[derive(Clone)]
pub struct HistoryStore {
    kv: KvStore,
    catalog: Catalog,
}

impl HistoryStore {
    pub fn new(kv: KvStore, catalog: Catalog) -> Self {
        Self { kv, catalog }
    }

    /// Load the log for a spec. Corrupted values are evicted and read
    /// as absent.
    pub fn get_log(&self, spec_id: &str) -> StateResult<Option<ProvisioningLog>> {
        self.kv.get_json_or_evict(&provision_log_key(spec_id))
    }

    /// Store a log, stamping `last_updated`.
    pub fn save_log(&self, log: &mut ProvisioningLog) -> StateResult<()> {
        log.last_updated = Some(Utc::now());
        self.kv.put_json(&provision_log_key(&log.spec_id), log)
    }

    pub fn delete_log(&self, spec_id: &str) -> StateResult<bool> {
        self.kv.delete(&provision_log_key(spec_id))
    }

    /// Fold one event into the spec's log.
    ///
    /// A success with no prior failures on record is intentionally not
    /// persisted; see the module docs.
    pub fn record(&self, event: &ProvisioningEvent) -> StateResult<()> {
        let mut log = match self.get_log(&event.spec_id)? {
            Some(log) => log,
            None => {
                if event.is_success {
                    debug!(spec = %event.spec_id, "success with no failure history, not recorded");
                    return Ok(());
                }
                self.new_log(&event.spec_id)?
            }
        };

        if event.is_success {
            if log.failure_count == 0 {
                debug!(spec = %event.spec_id, "success with no failure history, not recorded");
                return Ok(());
            }
            log.success_count += 1;
            log.success_timestamps.push(event.timestamp);
            if !event.csp_image_name.is_empty()
                && !log.success_images.contains(&event.csp_image_name)
            {
                log.success_images.push(event.csp_image_name.clone());
            }
        } else {
            log.failure_count += 1;
            log.failure_timestamps.push(event.timestamp);
            if !event.error_message.is_empty() {
                log.failure_messages.push(event.error_message.clone());
            }
            if !event.csp_image_name.is_empty()
                && !log.failure_images.contains(&event.csp_image_name)
            {
                log.failure_images.push(event.csp_image_name.clone());
            }
        }

        if !event.mci_id.is_empty() {
            log.additional_info
                .insert("lastMciId".to_string(), event.mci_id.clone());
        }

        self.save_log(&mut log)
    }

    /// Fold an MCI provisioning outcome into the logs: one event per VM,
    /// success iff the VM ended `Running`, failure messages pulled from
    /// the creation-error aggregate when present.
    pub fn record_mci_outcome(
        &self,
        mci_id: &str,
        vms: &[VmRecord],
        creation_errors: Option<&MciCreationErrors>,
    ) -> StateResult<()> {
        for vm in vms {
            let is_success = vm.status == VmStatus::Running;
            let error_message = if is_success {
                String::new()
            } else {
                lookup_error_message(creation_errors, &vm.id)
                    .unwrap_or_else(|| format!("VM creation failed with status: {}", vm.status))
            };
            let event = ProvisioningEvent {
                spec_id: vm.spec_id.clone(),
                csp_image_name: vm.csp_image_name.clone(),
                is_success,
                error_message,
                vm_name: vm.id.clone(),
                mci_id: mci_id.to_string(),
                timestamp: Utc::now(),
            };
            if let Err(err) = self.record(&event) {
                warn!(vm = %vm.id, error = %err, "failed to record provisioning event");
            }
        }
        Ok(())
    }

    /// Analyze the provisioning risk of a (spec, image) pair from the
    /// stored log.
    pub fn analyze(
        &self,
        spec_id: &str,
        csp_image_name: &str,
    ) -> StateResult<RiskAnalysis> {
        let log = self.get_log(spec_id)?;
        Ok(crate::risk::analyze(log.as_ref(), csp_image_name))
    }

    /// Repair a log whose counters and timestamp lists disagree by
    /// truncating the longer lists; delete it outright if undecodable.
    pub fn validate_integrity(&self, spec_id: &str) -> StateResult<()> {
        let Some(mut log) = self.get_log(spec_id)? else {
            return Ok(());
        };
        let counted = log.failure_count as usize + log.success_count as usize;
        let stamped = log.failure_timestamps.len() + log.success_timestamps.len();
        if counted != stamped {
            warn!(spec = %spec_id, counted, stamped, "repairing inconsistent provisioning log");
            log.failure_timestamps.truncate(log.failure_count as usize);
            log.success_timestamps.truncate(log.success_count as usize);
            self.save_log(&mut log)?;
        }
        Ok(())
    }

    /// Sweep all logs, deleting empty or undecodable entries. Returns
    /// the number removed.
    pub fn cleanup_corrupted(&self) -> StateResult<u32> {
        let mut removed = 0;
        for (key, value) in self.kv.list(PROVISION_LOG_PREFIX)? {
            let broken = value.is_empty()
                || serde_json::from_str::<ProvisioningLog>(&value).is_err();
            if broken {
                debug!(%key, "removing corrupted provisioning log");
                if self.kv.delete(&key)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn new_log(&self, spec_id: &str) -> StateResult<ProvisioningLog> {
        // Connection details come from the catalog when the spec is
        // known; an unknown spec still gets its failures logged.
        let mut log = ProvisioningLog {
            spec_id: spec_id.to_string(),
            ..ProvisioningLog::default()
        };
        if let Ok(spec) = self.catalog.get_spec(self.catalog.system_ns(), spec_id) {
            log.connection_name = spec.connection;
            log.provider_name = spec.provider;
            log.region_name = spec.region;
        }
        Ok(log)
    }
}

fn lookup_error_message(
    creation_errors: Option<&MciCreationErrors>,
    vm_id: &str,
) -> Option<String> {
    let errors = creation_errors?;
    errors
        .vm_creation_errors
        .iter()
        .chain(errors.vm_object_creation_errors.iter())
        .find(|e| e.vm_name == vm_id || e.vm_name.contains(vm_id))
        .map(|e| e.error.clone())
}
