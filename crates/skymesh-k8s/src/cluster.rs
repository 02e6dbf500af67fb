//! K8sOrchestrator — cluster and node-group provisioning.

use std::sync::Arc;

use tracing::{info, warn};

use skymesh_core::names;
use skymesh_resource::{shared_resource_id, AssocOp, SharedResourceManager};
use skymesh_spider::types::{
    ChangeAutoscaleSizeReq, ChangeAutoscaleSizeReqInfo, ClusterCreateReq,
    ClusterInfo, ClusterReqInfo, ClusterUpgradeReq, ClusterUpgradeReqInfo,
    NodeGroupAddReq, NodeGroupReqInfo, SetAutoscalingReq, SetAutoscalingReqInfo,
};
use skymesh_spider::{csp_resource_name, CspApi};
use skymesh_state::requests::{K8sClusterDynamicReq, K8sNodeGroupDynamicReq};
use skymesh_state::{
    keys, Catalog, K8sClusterRecord, K8sClusterStatus, K8sNodeGroupRecord,
    K8sNodeGroupStatus, KvStore, NodeScaling, ResourceKind, SpecRecord,
};

use crate::capability::K8sCapabilities;
use crate::error::{K8sError, K8sResult};
use crate::version::recommend_version;

/// Orchestrator for managed K8s clusters.
pub struct K8sOrchestrator {
    kv: KvStore,
    catalog: Catalog,
    csp: Arc<dyn CspApi>,
    resources: SharedResourceManager,
    capabilities: K8sCapabilities,
}

impl K8sOrchestrator {
    pub fn new(
        kv: KvStore,
        catalog: Catalog,
        csp: Arc<dyn CspApi>,
        capabilities: K8sCapabilities,
    ) -> Self {
        let resources = SharedResourceManager::new(kv.clone(), csp.clone());
        Self {
            kv,
            catalog,
            csp,
            resources,
            capabilities,
        }
    }

    pub fn get_cluster(&self, ns: &str, cluster_id: &str) -> K8sResult<K8sClusterRecord> {
        self.kv
            .get_json::<K8sClusterRecord>(&keys::k8s_cluster_key(ns, cluster_id))?
            .ok_or_else(|| {
                K8sError::Precondition(format!("k8s cluster '{cluster_id}' not found"))
            })
    }

    /// Create a cluster from a dynamic request: version recommendation,
    /// shared resources with the provider's subnet requirement, and the
    /// node group either bundled or added right after creation, per
    /// capability.
    pub async fn create_cluster_dynamic(
        &self,
        ns: &str,
        req: &K8sClusterDynamicReq,
    ) -> K8sResult<K8sClusterRecord> {
        names::check_name(ns).map_err(K8sError::Validation)?;
        let cluster_id = names::to_lower(&req.name);
        names::check_name(&cluster_id).map_err(K8sError::Validation)?;
        if self
            .kv
            .get(&keys::k8s_cluster_key(ns, &cluster_id))?
            .is_some()
        {
            return Err(K8sError::Precondition(format!(
                "k8s cluster '{cluster_id}' already exists"
            )));
        }

        let (spec, connection) = self.resolve_spec(ns, &req.common_spec, &req.connection)?;
        let capability = self.capabilities.provider(&spec.provider)?;

        self.check_image_rule(&connection, &spec.provider, &req.common_image)
            .await?;

        let available = self
            .capabilities
            .available_versions(&spec.provider, &spec.region)?;
        let version = recommend_version(&available, &req.version)?;

        // Shared resources. The cluster may need more than one subnet.
        let mut created = Vec::new();
        self.resources
            .ensure_for_connection(ns, &connection, true, &mut created)
            .await?;
        let subnet_ids = self
            .resources
            .ensure_subnet_count(ns, &connection, capability.required_subnet_count)
            .await?;
        let shared = shared_resource_id(ns, &connection);

        let uid = names::gen_uid();
        let node_group = self.node_group_from_req(
            &spec,
            &shared,
            &req.node_group_name,
            &req.common_image,
            &req.root_disk_type,
            &req.root_disk_size,
            req.on_auto_scaling,
            req.desired_node_size,
            req.min_node_size,
            req.max_node_size,
        );

        let vnet = self.resources.get(ns, ResourceKind::VNet, &shared)?;
        let ssh_key = self.resources.get(ns, ResourceKind::SshKey, &shared)?;
        let security_group = self
            .resources
            .get(ns, ResourceKind::SecurityGroup, &shared)?;
        let mut subnet_csp_names = Vec::new();
        for subnet_id in &subnet_ids {
            let subnet = self.resources.get(ns, ResourceKind::Subnet, subnet_id)?;
            subnet_csp_names.push(subnet.csp_resource_name);
        }

        let mut node_group_list = Vec::new();
        if capability.node_groups_on_creation {
            node_group_list.push(self.node_group_wire(
                &node_group,
                &spec,
                &ssh_key.csp_resource_name,
                capability.node_image_designation,
            ));
        } else {
            info!(cluster = %cluster_id, "node groups are added after cluster creation");
        }

        let create_req = ClusterCreateReq {
            name_space: String::new(),
            connection_name: connection.clone(),
            req_info: ClusterReqInfo {
                name: csp_resource_name(&connection, &uid),
                version: version.clone(),
                vpc_name: vnet.csp_resource_name.clone(),
                subnet_names: subnet_csp_names,
                security_group_names: vec![security_group.csp_resource_name.clone()],
                node_group_list,
            },
        };
        info!(cluster = %cluster_id, %version, "creating k8s cluster");
        let mut cluster_info = self.csp.create_cluster(&create_req).await?;

        if !capability.node_groups_on_creation {
            let add_req = NodeGroupAddReq {
                name_space: String::new(),
                connection_name: connection.clone(),
                req_info: self.node_group_wire(
                    &node_group,
                    &spec,
                    &ssh_key.csp_resource_name,
                    capability.node_image_designation,
                ),
            };
            cluster_info = self
                .csp
                .add_node_group(&create_req.req_info.name, &add_req)
                .await?;
        }

        let record = K8sClusterRecord {
            id: cluster_id.clone(),
            uid,
            name: cluster_id.clone(),
            connection: connection.clone(),
            version: cluster_info.version.clone(),
            v_net_id: shared.clone(),
            subnet_ids,
            security_group_ids: vec![shared.clone()],
            node_groups: merge_node_groups(&[node_group], &cluster_info),
            status: map_cluster_status(&cluster_info.status),
            csp_resource_id: cluster_info.iid.system_id.clone(),
            csp_resource_name: cluster_info.iid.name_id.clone(),
            description: req.description.clone(),
            label: req.label.clone(),
        };
        let cluster_key = keys::k8s_cluster_key(ns, &cluster_id);
        self.kv.put_json(&cluster_key, &record)?;

        for kind in [
            ResourceKind::VNet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            self.resources
                .update_association(ns, kind, &shared, AssocOp::Add, &cluster_key)?;
        }

        info!(cluster = %cluster_id, status = ?record.status, "k8s cluster created");
        Ok(record)
    }

    /// Add a node group to an Active cluster on the same connection.
    pub async fn add_node_group_dynamic(
        &self,
        ns: &str,
        cluster_id: &str,
        req: &K8sNodeGroupDynamicReq,
    ) -> K8sResult<K8sClusterRecord> {
        let mut record = self.get_cluster(ns, cluster_id)?;
        if record.status != K8sClusterStatus::Active {
            return Err(K8sError::Precondition(format!(
                "k8s cluster '{cluster_id}' is not in Active status"
            )));
        }
        if record.node_groups.iter().any(|ng| ng.name == req.name) {
            return Err(K8sError::Precondition(format!(
                "node group '{}' already exists",
                req.name
            )));
        }

        let (spec, connection) = self.resolve_spec(ns, &req.common_spec, &None)?;
        if connection != record.connection {
            return Err(K8sError::Validation(format!(
                "node group connection '{connection}' must match the cluster's \
                 connection '{}'",
                record.connection
            )));
        }
        let capability = self.capabilities.provider(&spec.provider)?;
        self.check_image_rule(&connection, &spec.provider, &req.common_image)
            .await?;

        let shared = shared_resource_id(ns, &connection);
        let ssh_key = self.resources.get(ns, ResourceKind::SshKey, &shared)?;

        let node_group = self.node_group_from_req(
            &spec,
            &shared,
            &req.name,
            &req.common_image,
            &req.root_disk_type,
            &req.root_disk_size,
            req.on_auto_scaling,
            req.desired_node_size,
            req.min_node_size,
            req.max_node_size,
        );
        let add_req = NodeGroupAddReq {
            name_space: String::new(),
            connection_name: connection.clone(),
            req_info: self.node_group_wire(
                &node_group,
                &spec,
                &ssh_key.csp_resource_name,
                capability.node_image_designation,
            ),
        };
        let cluster_info = self
            .csp
            .add_node_group(&record.csp_resource_name, &add_req)
            .await?;

        record.node_groups.push(node_group);
        record.status = map_cluster_status(&cluster_info.status);
        self.kv
            .put_json(&keys::k8s_cluster_key(ns, cluster_id), &record)?;
        info!(cluster = %cluster_id, node_group = %req.name, "node group added");
        Ok(record)
    }

    /// Switch a node group's autoscaling on or off.
    pub async fn set_node_group_autoscaling(
        &self,
        ns: &str,
        cluster_id: &str,
        node_group: &str,
        on: bool,
    ) -> K8sResult<bool> {
        let mut record = self.get_cluster(ns, cluster_id)?;
        let index = record
            .node_groups
            .iter()
            .position(|ng| ng.name == node_group)
            .ok_or_else(|| {
                K8sError::Precondition(format!("node group '{node_group}' not found"))
            })?;

        let req = SetAutoscalingReq {
            connection_name: record.connection.clone(),
            req_info: SetAutoscalingReqInfo {
                on_auto_scaling: on.to_string(),
            },
        };
        let changed = self
            .csp
            .set_node_group_autoscaling(&record.csp_resource_name, node_group, &req)
            .await?;
        if changed {
            record.node_groups[index].scaling.on_auto = on;
            self.kv
                .put_json(&keys::k8s_cluster_key(ns, cluster_id), &record)?;
        }
        Ok(changed)
    }

    /// Change a node group's desired/min/max sizes.
    pub async fn change_node_group_autoscale_size(
        &self,
        ns: &str,
        cluster_id: &str,
        node_group: &str,
        desired: u32,
        min: u32,
        max: u32,
    ) -> K8sResult<K8sClusterRecord> {
        if !(min <= desired && desired <= max) {
            return Err(K8sError::Validation(format!(
                "node sizes must satisfy min <= desired <= max (got {min}/{desired}/{max})"
            )));
        }
        let mut record = self.get_cluster(ns, cluster_id)?;
        let index = record
            .node_groups
            .iter()
            .position(|ng| ng.name == node_group)
            .ok_or_else(|| {
                K8sError::Precondition(format!("node group '{node_group}' not found"))
            })?;

        let req = ChangeAutoscaleSizeReq {
            connection_name: record.connection.clone(),
            req_info: ChangeAutoscaleSizeReqInfo {
                desired_node_size: desired.to_string(),
                min_node_size: min.to_string(),
                max_node_size: max.to_string(),
            },
        };
        self.csp
            .change_node_group_autoscale_size(&record.csp_resource_name, node_group, &req)
            .await?;

        let scaling = &mut record.node_groups[index].scaling;
        scaling.desired = desired;
        scaling.min = min;
        scaling.max = max;
        self.kv
            .put_json(&keys::k8s_cluster_key(ns, cluster_id), &record)?;
        Ok(record)
    }

    /// Upgrade the cluster to the recommended version for the request.
    pub async fn upgrade_cluster(
        &self,
        ns: &str,
        cluster_id: &str,
        requested_version: &str,
    ) -> K8sResult<K8sClusterRecord> {
        let mut record = self.get_cluster(ns, cluster_id)?;
        if record.status != K8sClusterStatus::Active {
            return Err(K8sError::Precondition(format!(
                "k8s cluster '{cluster_id}' is not in Active status"
            )));
        }

        let connection = self
            .catalog
            .get_connection(&record.connection)
            .map_err(|e| K8sError::Validation(e.to_string()))?;
        let available = self
            .capabilities
            .available_versions(&connection.provider, &connection.region)?;
        let version = recommend_version(&available, requested_version)?;

        let req = ClusterUpgradeReq {
            name_space: String::new(),
            connection_name: record.connection.clone(),
            req_info: ClusterUpgradeReqInfo {
                version: version.clone(),
            },
        };
        let cluster_info = self
            .csp
            .upgrade_cluster(&record.csp_resource_name, &req)
            .await?;

        record.version = cluster_info.version.clone();
        record.status = map_cluster_status(&cluster_info.status);
        self.kv
            .put_json(&keys::k8s_cluster_key(ns, cluster_id), &record)?;
        info!(cluster = %cluster_id, %version, "cluster upgraded");
        Ok(record)
    }

    /// Delete a cluster and drop its shared-resource back-references.
    pub async fn delete_cluster(&self, ns: &str, cluster_id: &str) -> K8sResult<()> {
        let record = self.get_cluster(ns, cluster_id)?;
        self.csp
            .delete_cluster(&record.connection, &record.csp_resource_name)
            .await?;

        let cluster_key = keys::k8s_cluster_key(ns, cluster_id);
        let shared = shared_resource_id(ns, &record.connection);
        for kind in [
            ResourceKind::VNet,
            ResourceKind::SshKey,
            ResourceKind::SecurityGroup,
        ] {
            if let Err(err) = self.resources.update_association(
                ns,
                kind,
                &shared,
                AssocOp::Remove,
                &cluster_key,
            ) {
                warn!(%cluster_id, error = %err, "association remove failed");
            }
        }
        self.kv.delete(&cluster_key)?;
        info!(%cluster_id, "k8s cluster deleted");
        Ok(())
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn resolve_spec(
        &self,
        ns: &str,
        common_spec: &str,
        connection_override: &Option<String>,
    ) -> K8sResult<(SpecRecord, String)> {
        let spec = self
            .catalog
            .get_spec(ns, common_spec)
            .map_err(|e| K8sError::Validation(format!("failed to get spec '{common_spec}': {e}")))?;
        let connection = connection_override
            .clone()
            .unwrap_or_else(|| spec.connection.clone());
        self.catalog.get_connection(&connection).map_err(|e| {
            K8sError::Validation(format!(
                "cannot retrieve connection config '{connection}': {e}"
            ))
        })?;
        Ok((spec, connection))
    }

    /// Non-designating providers only accept `default`/empty images;
    /// designated images must exist on the CSP.
    async fn check_image_rule(
        &self,
        connection: &str,
        provider: &str,
        common_image: &str,
    ) -> K8sResult<()> {
        let capability = self.capabilities.provider(provider)?;
        let is_default =
            common_image.is_empty() || common_image.eq_ignore_ascii_case("default");
        if !capability.node_image_designation && !is_default {
            return Err(K8sError::Validation(format!(
                "provider '{provider}' does not support node image designation; the \
                 image must be \"default\" or empty"
            )));
        }
        if !is_default {
            let csp_image_name = self
                .catalog
                .get_image(self.catalog.system_ns(), common_image)
                .map(|image| image.csp_image_name)
                .unwrap_or_else(|_| common_image.to_string());
            self.csp.lookup_image(connection, &csp_image_name).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn node_group_from_req(
        &self,
        spec: &SpecRecord,
        shared: &str,
        name: &str,
        common_image: &str,
        root_disk_type: &str,
        root_disk_size: &str,
        on_auto: Option<bool>,
        desired: Option<u32>,
        min: Option<u32>,
        max: Option<u32>,
    ) -> K8sNodeGroupRecord {
        let defaults = NodeScaling::default();
        let is_default =
            common_image.is_empty() || common_image.eq_ignore_ascii_case("default");
        K8sNodeGroupRecord {
            name: if name.is_empty() {
                names::gen_uid()
            } else {
                names::to_lower(name)
            },
            spec_id: spec.id.clone(),
            csp_image_name: if is_default {
                None
            } else {
                Some(
                    self.catalog
                        .get_image(self.catalog.system_ns(), common_image)
                        .map(|image| image.csp_image_name)
                        .unwrap_or_else(|_| common_image.to_string()),
                )
            },
            ssh_key_id: shared.to_string(),
            root_disk_type: root_disk_type.to_string(),
            root_disk_size: root_disk_size.to_string(),
            scaling: NodeScaling {
                on_auto: on_auto.unwrap_or(defaults.on_auto),
                desired: desired.unwrap_or(defaults.desired),
                min: min.unwrap_or(defaults.min),
                max: max.unwrap_or(defaults.max),
            },
            status: K8sNodeGroupStatus::Creating,
        }
    }

    fn node_group_wire(
        &self,
        node_group: &K8sNodeGroupRecord,
        spec: &SpecRecord,
        key_pair_csp_name: &str,
        image_designation: bool,
    ) -> NodeGroupReqInfo {
        let image_name = if image_designation {
            node_group
                .csp_image_name
                .clone()
                .unwrap_or_else(|| "default".to_string())
        } else {
            "default".to_string()
        };
        NodeGroupReqInfo {
            name: node_group.name.clone(),
            image_name,
            vm_spec_name: spec.csp_spec_name.clone(),
            root_disk_type: node_group.root_disk_type.clone(),
            root_disk_size: node_group.root_disk_size.clone(),
            key_pair_name: key_pair_csp_name.to_string(),
            on_auto_scaling: node_group.scaling.on_auto.to_string(),
            desired_node_size: node_group.scaling.desired.to_string(),
            min_node_size: node_group.scaling.min.to_string(),
            max_node_size: node_group.scaling.max.to_string(),
        }
    }
}

/// Carry CSP-reported node-group statuses onto the stored records.
fn merge_node_groups(
    planned: &[K8sNodeGroupRecord],
    cluster_info: &ClusterInfo,
) -> Vec<K8sNodeGroupRecord> {
    planned
        .iter()
        .cloned()
        .map(|mut ng| {
            if let Some(reported) = cluster_info
                .node_group_list
                .iter()
                .find(|info| info.iid.name_id == ng.name)
            {
                ng.status = map_node_group_status(&reported.status);
            }
            ng
        })
        .collect()
}

fn map_cluster_status(native: &str) -> K8sClusterStatus {
    match native {
        "Creating" => K8sClusterStatus::Creating,
        "Active" => K8sClusterStatus::Active,
        "Inactive" => K8sClusterStatus::Inactive,
        "Updating" => K8sClusterStatus::Updating,
        "Deleting" => K8sClusterStatus::Deleting,
        _ => K8sClusterStatus::Undefined,
    }
}

fn map_node_group_status(native: &str) -> K8sNodeGroupStatus {
    match native {
        "Creating" => K8sNodeGroupStatus::Creating,
        "Active" => K8sNodeGroupStatus::Active,
        "Inactive" => K8sNodeGroupStatus::Inactive,
        "Updating" => K8sNodeGroupStatus::Updating,
        "Deleting" => K8sNodeGroupStatus::Deleting,
        _ => K8sNodeGroupStatus::Undefined,
    }
}
