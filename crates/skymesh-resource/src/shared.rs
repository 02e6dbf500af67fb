//! Lookup-or-create of shared default resources, with rollback.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use skymesh_core::{for_each_bounded, names, MAX_CONCURRENCY};
use skymesh_spider::types::{
    KeyPairCreateReq, KeyPairReqInfo, SecurityGroupCreateReq, SecurityGroupReqInfo,
    SecurityRuleInfo, SubnetAddReq, SubnetAddReqInfo, SubnetReqInfo, VpcCreateReq,
    VpcReqInfo,
};
use skymesh_spider::{csp_resource_name, CspApi};
use skymesh_state::{keys, KvStore, ResourceKind, SharedResourceRecord};

use crate::error::{ResourceError, ResourceResult};

/// Settling gap between the security-group deletions and the vNet
/// deletions during rollback (CSP-side dependency ordering).
const ROLLBACK_SETTLE: Duration = Duration::from_secs(5);

/// Canonical id of every shared resource for a (namespace, connection).
pub fn shared_resource_id(ns: &str, connection: &str) -> String {
    format!("{ns}-shared-{connection}")
}

/// One resource created on demand during a provisioning request,
/// remembered for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub id: String,
}

/// Add or remove a back-reference on a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocOp {
    Add,
    Remove,
}

/// Lookup-or-create manager for the default vNet/subnet/SSH
/// key/security group of each (namespace, connection).
#[derive(Clone)]
pub struct SharedResourceManager {
    kv: KvStore,
    csp: Arc<dyn CspApi>,
}

impl SharedResourceManager {
    pub fn new(kv: KvStore, csp: Arc<dyn CspApi>) -> Self {
        Self { kv, csp }
    }

    /// Load a shared resource record.
    pub fn get(
        &self,
        ns: &str,
        kind: ResourceKind,
        id: &str,
    ) -> ResourceResult<SharedResourceRecord> {
        self.kv
            .get_json::<SharedResourceRecord>(&keys::resource_key(ns, kind, id))?
            .ok_or_else(|| ResourceError::NotFound(format!("{kind} '{id}'")))
    }

    fn exists(&self, ns: &str, kind: ResourceKind, id: &str) -> ResourceResult<bool> {
        Ok(self.kv.get(&keys::resource_key(ns, kind, id))?.is_some())
    }

    /// Make sure the default vNet+subnet, SSH key, and security group
    /// exist for this connection, appending everything this call
    /// creates to `created` (in creation order) so the caller can roll
    /// back on failure, including a failure partway through.
    ///
    /// With `on_demand` off, a missing resource is fatal. A concurrent
    /// request that finds a resource already present reuses it; identity
    /// is the deterministic id, not the content.
    pub async fn ensure_for_connection(
        &self,
        ns: &str,
        connection: &str,
        on_demand: bool,
        created: &mut Vec<CreatedResource>,
    ) -> ResourceResult<()> {
        let id = shared_resource_id(ns, connection);

        if self.ensure_vnet(ns, connection, &id, on_demand).await? {
            created.push(CreatedResource {
                kind: ResourceKind::VNet,
                id: id.clone(),
            });
        }
        if self.ensure_ssh_key(ns, connection, &id, on_demand).await? {
            created.push(CreatedResource {
                kind: ResourceKind::SshKey,
                id: id.clone(),
            });
        }
        if self
            .ensure_security_group(ns, connection, &id, on_demand)
            .await?
        {
            created.push(CreatedResource {
                kind: ResourceKind::SecurityGroup,
                id,
            });
        }

        Ok(())
    }

    async fn ensure_vnet(
        &self,
        ns: &str,
        connection: &str,
        id: &str,
        on_demand: bool,
    ) -> ResourceResult<bool> {
        if self.exists(ns, ResourceKind::VNet, id)? {
            info!(%id, "reusing default vNet");
            return Ok(false);
        }
        if !on_demand {
            return Err(ResourceError::MissingRequired(format!("vNet '{id}'")));
        }

        let uid = names::gen_uid();
        let csp_name = csp_resource_name(connection, &uid);
        let subnet_csp_name = format!("{csp_name}-sn");
        let req = VpcCreateReq {
            connection_name: connection.to_string(),
            req_info: VpcReqInfo {
                name: csp_name.clone(),
                ipv4_cidr: "10.0.0.0/16".to_string(),
                subnet_info_list: vec![SubnetReqInfo {
                    name: subnet_csp_name.clone(),
                    ipv4_cidr: "10.0.1.0/24".to_string(),
                }],
            },
        };
        let vpc = self.csp.create_vpc(&req).await?;
        info!(%id, csp = %csp_name, "created default vNet");

        let record = SharedResourceRecord {
            kind: ResourceKind::VNet,
            id: id.to_string(),
            uid,
            connection: connection.to_string(),
            csp_resource_id: vpc.iid.system_id.clone(),
            csp_resource_name: vpc.iid.name_id.clone(),
            cidr: Some(req.req_info.ipv4_cidr.clone()),
            parent_id: None,
            associated: Vec::new(),
        };
        self.kv
            .put_json(&keys::resource_key(ns, ResourceKind::VNet, id), &record)?;

        let subnet_info = vpc.subnet_info_list.first();
        let subnet = SharedResourceRecord {
            kind: ResourceKind::Subnet,
            id: id.to_string(),
            uid: names::gen_uid(),
            connection: connection.to_string(),
            csp_resource_id: subnet_info
                .map(|s| s.iid.system_id.clone())
                .unwrap_or_default(),
            csp_resource_name: subnet_info
                .map(|s| s.iid.name_id.clone())
                .unwrap_or(subnet_csp_name),
            cidr: Some("10.0.1.0/24".to_string()),
            parent_id: Some(id.to_string()),
            associated: Vec::new(),
        };
        self.kv
            .put_json(&keys::resource_key(ns, ResourceKind::Subnet, id), &subnet)?;

        Ok(true)
    }

    async fn ensure_ssh_key(
        &self,
        ns: &str,
        connection: &str,
        id: &str,
        on_demand: bool,
    ) -> ResourceResult<bool> {
        if self.exists(ns, ResourceKind::SshKey, id)? {
            info!(%id, "reusing default SSH key");
            return Ok(false);
        }
        if !on_demand {
            return Err(ResourceError::MissingRequired(format!("sshKey '{id}'")));
        }

        let uid = names::gen_uid();
        let csp_name = csp_resource_name(connection, &uid);
        let req = KeyPairCreateReq {
            connection_name: connection.to_string(),
            req_info: KeyPairReqInfo {
                name: csp_name.clone(),
            },
        };
        let key = self.csp.create_keypair(&req).await?;
        info!(%id, csp = %csp_name, "created default SSH key");

        let record = SharedResourceRecord {
            kind: ResourceKind::SshKey,
            id: id.to_string(),
            uid,
            connection: connection.to_string(),
            csp_resource_id: key.iid.system_id,
            csp_resource_name: key.iid.name_id,
            cidr: None,
            parent_id: None,
            associated: Vec::new(),
        };
        self.kv
            .put_json(&keys::resource_key(ns, ResourceKind::SshKey, id), &record)?;
        Ok(true)
    }

    async fn ensure_security_group(
        &self,
        ns: &str,
        connection: &str,
        id: &str,
        on_demand: bool,
    ) -> ResourceResult<bool> {
        if self.exists(ns, ResourceKind::SecurityGroup, id)? {
            info!(%id, "reusing default security group");
            return Ok(false);
        }
        if !on_demand {
            return Err(ResourceError::MissingRequired(format!(
                "securityGroup '{id}'"
            )));
        }

        // The security group lives inside the default vNet.
        let vnet = self.get(ns, ResourceKind::VNet, id)?;

        let uid = names::gen_uid();
        let csp_name = csp_resource_name(connection, &uid);
        let req = SecurityGroupCreateReq {
            connection_name: connection.to_string(),
            req_info: SecurityGroupReqInfo {
                name: csp_name.clone(),
                vpc_name: vnet.csp_resource_name.clone(),
                security_rules: vec![SecurityRuleInfo {
                    from_port: "22".to_string(),
                    to_port: "22".to_string(),
                    ip_protocol: "tcp".to_string(),
                    direction: "inbound".to_string(),
                    cidr: "0.0.0.0/0".to_string(),
                }],
            },
        };
        let group = self.csp.create_security_group(&req).await?;
        info!(%id, csp = %csp_name, "created default security group");

        let record = SharedResourceRecord {
            kind: ResourceKind::SecurityGroup,
            id: id.to_string(),
            uid,
            connection: connection.to_string(),
            csp_resource_id: group.iid.system_id,
            csp_resource_name: group.iid.name_id,
            cidr: None,
            parent_id: None,
            associated: Vec::new(),
        };
        self.kv.put_json(
            &keys::resource_key(ns, ResourceKind::SecurityGroup, id),
            &record,
        )?;
        Ok(true)
    }

    /// Make sure the default vNet carries at least `required` subnets,
    /// returning their ids in order. Extra subnets get `-NN` suffixes.
    pub async fn ensure_subnet_count(
        &self,
        ns: &str,
        connection: &str,
        required: usize,
    ) -> ResourceResult<Vec<String>> {
        let base = shared_resource_id(ns, connection);
        let vnet = self.get(ns, ResourceKind::VNet, &base)?;

        let mut subnet_ids = vec![base.clone()];
        for index in 1..required {
            let subnet_id = format!("{base}-{index:02}");
            if !self.exists(ns, ResourceKind::Subnet, &subnet_id)? {
                let uid = names::gen_uid();
                let csp_name = csp_resource_name(connection, &uid);
                let req = SubnetAddReq {
                    connection_name: connection.to_string(),
                    req_info: SubnetAddReqInfo {
                        name: csp_name,
                        vpc_name: vnet.csp_resource_name.clone(),
                        ipv4_cidr: format!("10.0.{}.0/24", index + 1),
                    },
                };
                let info = self.csp.create_subnet(&req).await?;
                let record = SharedResourceRecord {
                    kind: ResourceKind::Subnet,
                    id: subnet_id.clone(),
                    uid,
                    connection: connection.to_string(),
                    csp_resource_id: info.iid.system_id,
                    csp_resource_name: info.iid.name_id,
                    cidr: Some(info.ipv4_cidr),
                    parent_id: Some(base.clone()),
                    associated: Vec::new(),
                };
                self.kv.put_json(
                    &keys::resource_key(ns, ResourceKind::Subnet, &subnet_id),
                    &record,
                )?;
                info!(%subnet_id, "created extra shared subnet");
            }
            subnet_ids.push(subnet_id);
        }
        Ok(subnet_ids)
    }

    // ── Associations ───────────────────────────────────────────────

    /// Add or remove a back-reference on a resource record. The update
    /// is a read-modify-write over the record's `associated` set, so it
    /// is idempotent and safe to repeat. The record is patched as raw
    /// JSON, which lets catalog records (images, custom images) carry
    /// back-references without modelling them.
    pub fn update_association(
        &self,
        ns: &str,
        kind: ResourceKind,
        id: &str,
        op: AssocOp,
        referent_key: &str,
    ) -> ResourceResult<()> {
        let key = keys::resource_key(ns, kind, id);
        let Some(raw) = self.kv.get(&key)? else {
            debug!(%key, "association update on missing resource, skipped");
            return Ok(());
        };
        let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            debug!(%key, "association update on undecodable resource, skipped");
            return Ok(());
        };
        let Some(object) = value.as_object_mut() else {
            return Ok(());
        };

        let entry = object
            .entry("associated")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        let Some(set) = entry.as_array_mut() else {
            return Ok(());
        };
        let referent = serde_json::Value::String(referent_key.to_string());
        let had = set.contains(&referent);
        match op {
            AssocOp::Add if !had => set.push(referent),
            AssocOp::Remove if had => set.retain(|r| r != &referent),
            _ => return Ok(()),
        }

        let updated = serde_json::to_string(&value)
            .map_err(|e| skymesh_state::StateError::Serialize(e.to_string()))?;
        self.kv.put(&key, &updated)?;
        Ok(())
    }

    // ── Deletion / rollback ────────────────────────────────────────

    /// Delete a shared resource on the CSP side and from the store.
    /// Refused while back-references remain, unless `force`.
    pub async fn delete_resource(
        &self,
        ns: &str,
        kind: ResourceKind,
        id: &str,
        force: bool,
    ) -> ResourceResult<()> {
        let record = self.get(ns, kind, id)?;
        if !force && !record.is_unreferenced() {
            return Err(ResourceError::StillAssociated {
                id: id.to_string(),
                count: record.associated.len(),
            });
        }

        match kind {
            ResourceKind::VNet => {
                self.csp
                    .delete_vpc(&record.connection, &record.csp_resource_name)
                    .await?;
                // Subnets live inside the vNet on the CSP side; their
                // records go with it.
                let prefix = format!("/ns/{ns}/resources/subnet/");
                for (key, value) in self.kv.list(&prefix)? {
                    if let Ok(subnet) =
                        serde_json::from_str::<SharedResourceRecord>(&value)
                    {
                        if subnet.parent_id.as_deref() == Some(id) {
                            self.kv.delete(&key)?;
                        }
                    }
                }
            }
            ResourceKind::SshKey => {
                self.csp
                    .delete_keypair(&record.connection, &record.csp_resource_name)
                    .await?;
            }
            ResourceKind::SecurityGroup => {
                self.csp
                    .delete_security_group(&record.connection, &record.csp_resource_name)
                    .await?;
            }
            other => {
                debug!(kind = %other, %id, "no CSP-side delete for this kind");
            }
        }

        self.kv.delete(&keys::resource_key(ns, kind, id))?;
        info!(kind = %kind, %id, "shared resource deleted");
        Ok(())
    }

    /// Roll back the resources created during one provisioning request.
    ///
    /// Deletion order is SSH keys, then security groups, then (after a
    /// settling gap) vNets. Each phase runs in parallel under the
    /// global concurrency cap. Failures do not stop the remaining
    /// phases; they are aggregated into a CRITICAL error asking for
    /// manual cleanup.
    pub async fn rollback(
        &self,
        ns: &str,
        created: &[CreatedResource],
    ) -> ResourceResult<()> {
        let by_kind = |kind: ResourceKind| -> Vec<String> {
            created
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.id.clone())
                .collect()
        };
        let ssh_keys = by_kind(ResourceKind::SshKey);
        let security_groups = by_kind(ResourceKind::SecurityGroup);
        let vnets = by_kind(ResourceKind::VNet);

        info!(
            ssh_keys = ssh_keys.len(),
            security_groups = security_groups.len(),
            vnets = vnets.len(),
            "rolling back created resources"
        );

        let mut failures = Vec::new();
        failures.extend(self.rollback_phase(ns, ResourceKind::SshKey, ssh_keys).await);
        failures.extend(
            self.rollback_phase(ns, ResourceKind::SecurityGroup, security_groups)
                .await,
        );
        if !vnets.is_empty() {
            sleep(ROLLBACK_SETTLE).await;
        }
        failures.extend(self.rollback_phase(ns, ResourceKind::VNet, vnets).await);

        if failures.is_empty() {
            info!(count = created.len(), "rollback complete");
            Ok(())
        } else {
            error!(failed = failures.len(), "rollback left resources behind");
            Err(ResourceError::RollbackIncomplete(failures.join("; ")))
        }
    }

    async fn rollback_phase(
        &self,
        ns: &str,
        kind: ResourceKind,
        ids: Vec<String>,
    ) -> Vec<String> {
        let ns = ns.to_string();
        let results = for_each_bounded(ids, MAX_CONCURRENCY, |_, id| {
            let manager = self.clone();
            let ns = ns.clone();
            async move {
                match manager.delete_resource(&ns, kind, &id, false).await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(kind = %kind, %id, error = %err, "rollback delete failed");
                        Some(format!("{kind} '{id}': {err}"))
                    }
                }
            }
        })
        .await;
        results.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_spider::fake::{FakeOp, FakeSpider};

    fn manager() -> (SharedResourceManager, Arc<FakeSpider>, KvStore) {
        let kv = KvStore::open_in_memory().unwrap();
        let spider = Arc::new(FakeSpider::new());
        let manager = SharedResourceManager::new(kv.clone(), spider.clone());
        (manager, spider, kv)
    }

    const NS: &str = "demo";
    const CONN: &str = "aws-ap-northeast-2";

    async fn ensure(
        manager: &SharedResourceManager,
        on_demand: bool,
    ) -> (Vec<CreatedResource>, ResourceResult<()>) {
        let mut created = Vec::new();
        let result = manager
            .ensure_for_connection(NS, CONN, on_demand, &mut created)
            .await;
        (created, result)
    }

    #[tokio::test]
    async fn first_call_creates_all_four_records() {
        let (manager, _, _) = manager();
        let (created, result) = ensure(&manager, true).await;
        result.unwrap();

        assert_eq!(created.len(), 3); // vNet (with subnet), key, group
        let id = shared_resource_id(NS, CONN);
        for kind in [
            ResourceKind::VNet,
            ResourceKind::Subnet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            assert!(manager.get(NS, kind, &id).is_ok(), "{kind} missing");
        }
    }

    #[tokio::test]
    async fn second_call_reuses_everything() {
        let (manager, spider, _) = manager();
        ensure(&manager, true).await.1.unwrap();
        let calls_before = spider.calls().len();

        let (created, result) = ensure(&manager, true).await;
        result.unwrap();
        assert!(created.is_empty());
        assert_eq!(spider.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn missing_resource_is_fatal_without_on_demand() {
        let (manager, _, _) = manager();
        let (created, result) = ensure(&manager, false).await;
        assert!(created.is_empty());
        assert!(matches!(
            result.unwrap_err(),
            ResourceError::MissingRequired(_)
        ));
    }

    #[tokio::test]
    async fn partial_failure_reports_what_was_created() {
        let (manager, spider, _) = manager();
        spider.fail_op(FakeOp::CreateKeyPair, "", 403, "quota");

        let (created, result) = ensure(&manager, true).await;
        assert!(result.is_err());
        // The vNet made it before the key failed; rollback needs it.
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, ResourceKind::VNet);
    }

    #[tokio::test]
    async fn csp_names_carry_the_connection_prefix() {
        let (manager, _, _) = manager();
        ensure(&manager, true).await.1.unwrap();
        let id = shared_resource_id(NS, CONN);
        let vnet = manager.get(NS, ResourceKind::VNet, &id).unwrap();
        assert!(vnet.csp_resource_name.starts_with(CONN));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_removes_exactly_what_was_created() {
        let (manager, spider, _) = manager();
        let (created, result) = ensure(&manager, true).await;
        result.unwrap();

        manager.rollback(NS, &created).await.unwrap();

        let id = shared_resource_id(NS, CONN);
        for kind in [
            ResourceKind::VNet,
            ResourceKind::Subnet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            assert!(manager.get(NS, kind, &id).is_err(), "{kind} survived");
        }
        assert!(spider.resource_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_deletes_keys_then_groups_then_vnets() {
        let (manager, spider, _) = manager();
        let (created, result) = ensure(&manager, true).await;
        result.unwrap();
        manager.rollback(NS, &created).await.unwrap();

        let deletes: Vec<String> = spider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        assert_eq!(deletes.len(), 3);
        assert!(deletes[0].starts_with("deleteKeyPair"));
        assert!(deletes[1].starts_with("deleteSecurityGroup"));
        assert!(deletes[2].starts_with("deleteVpc"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_rollback_failure_is_critical() {
        let (manager, spider, _) = manager();
        let (created, result) = ensure(&manager, true).await;
        result.unwrap();
        spider.fail_op(FakeOp::DeleteVpc, "", 500, "in use");

        let err = manager.rollback(NS, &created).await.unwrap_err();
        assert!(err.to_string().contains("CRITICAL"));
        // The failed vNet stays; the rest are gone.
        let id = shared_resource_id(NS, CONN);
        assert!(manager.get(NS, ResourceKind::VNet, &id).is_ok());
        assert!(manager.get(NS, ResourceKind::SshKey, &id).is_err());
    }

    #[tokio::test]
    async fn association_add_remove_is_idempotent() {
        let (manager, _, _) = manager();
        ensure(&manager, true).await.1.unwrap();
        let id = shared_resource_id(NS, CONN);
        let vm_key = "/ns/demo/mci/m1/vm/v";

        for _ in 0..2 {
            manager
                .update_association(NS, ResourceKind::VNet, &id, AssocOp::Add, vm_key)
                .unwrap();
        }
        let record = manager.get(NS, ResourceKind::VNet, &id).unwrap();
        assert_eq!(record.associated, vec![vm_key.to_string()]);

        for _ in 0..2 {
            manager
                .update_association(NS, ResourceKind::VNet, &id, AssocOp::Remove, vm_key)
                .unwrap();
        }
        let record = manager.get(NS, ResourceKind::VNet, &id).unwrap();
        assert!(record.associated.is_empty());
    }

    #[tokio::test]
    async fn delete_refuses_while_associated() {
        let (manager, _, _) = manager();
        ensure(&manager, true).await.1.unwrap();
        let id = shared_resource_id(NS, CONN);
        manager
            .update_association(
                NS,
                ResourceKind::SshKey,
                &id,
                AssocOp::Add,
                "/ns/demo/mci/m1/vm/v",
            )
            .unwrap();

        let err = manager
            .delete_resource(NS, ResourceKind::SshKey, &id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::StillAssociated { .. }));

        // Force overrides the guard.
        manager
            .delete_resource(NS, ResourceKind::SshKey, &id, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extra_subnets_for_k8s() {
        let (manager, _, _) = manager();
        ensure(&manager, true).await.1.unwrap();

        let subnets = manager.ensure_subnet_count(NS, CONN, 2).await.unwrap();
        let base = shared_resource_id(NS, CONN);
        assert_eq!(subnets, vec![base.clone(), format!("{base}-01")]);

        // Idempotent.
        let again = manager.ensure_subnet_count(NS, CONN, 2).await.unwrap();
        assert_eq!(again, subnets);
    }
}
