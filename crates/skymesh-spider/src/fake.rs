//! FakeSpider — in-memory [`CspApi`] implementation (for testing).
//!
//! Tracks created resources in maps keyed by CSP-side name and lets a
//! test program failures per operation, either by call index (e.g.
//! "fail the second VM create") or by name substring.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{CspApi, VmControlAction};
use crate::error::{SpiderError, SpiderResult};
use crate::types::*;

/// Operation selector for programmed failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CreateVpc,
    CreateSubnet,
    CreateKeyPair,
    CreateSecurityGroup,
    CreateVm,
    ControlVm,
    TerminateVm,
    DeleteVpc,
    DeleteKeyPair,
    DeleteSecurityGroup,
    CreateCluster,
    AddNodeGroup,
}

#[derive(Debug, Clone)]
struct FailRule {
    op: FakeOp,
    /// Matches when the CSP-side name contains this substring; empty
    /// matches everything.
    name_contains: String,
    status: u16,
    message: String,
}

#[derive(Default)]
struct FakeState {
    csp_specs: HashSet<(String, String)>,
    csp_images: HashSet<(String, String)>,
    vpcs: HashMap<String, VpcInfo>,
    keypairs: HashMap<String, KeyPairInfo>,
    security_groups: HashMap<String, SecurityGroupInfo>,
    disks: HashMap<String, DiskInfo>,
    vms: HashMap<String, SpiderVmInfo>,
    vm_statuses: HashMap<String, String>,
    clusters: HashMap<String, ClusterInfo>,
    fail_rules: Vec<FailRule>,
    fail_vm_create_calls: HashSet<usize>,
    vm_create_calls: usize,
    counter: usize,
    calls: Vec<String>,
}

/// In-memory Spider stand-in.
#[derive(Default)]
pub struct FakeSpider {
    state: Mutex<FakeState>,
}

impl FakeSpider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `lookup_spec` succeed for this (connection, name) pair.
    pub fn register_csp_spec(&self, connection: &str, csp_spec_name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .csp_specs
            .insert((connection.to_string(), csp_spec_name.to_string()));
    }

    /// Make `lookup_image` succeed for this (connection, name) pair.
    pub fn register_csp_image(&self, connection: &str, csp_image_name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .csp_images
            .insert((connection.to_string(), csp_image_name.to_string()));
    }

    /// Fail the n-th VM create call (1-based) with `500 {message}`.
    pub fn fail_vm_create_call(&self, nth: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_vm_create_calls.insert(nth);
    }

    /// Fail `op` whenever the CSP-side name contains `name_contains`.
    pub fn fail_op(&self, op: FakeOp, name_contains: &str, status: u16, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_rules.push(FailRule {
            op,
            name_contains: name_contains.to_string(),
            status,
            message: message.to_string(),
        });
    }

    /// Operations performed so far, as `"op:name"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of VM create calls seen so far.
    pub fn vm_create_call_count(&self) -> usize {
        self.state.lock().unwrap().vm_create_calls
    }

    /// Override the native status reported for a VM.
    pub fn set_vm_status(&self, csp_name: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .vm_statuses
            .insert(csp_name.to_string(), status.to_string());
    }

    /// Remaining CSP-side resource names, for leak assertions.
    pub fn resource_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .vpcs
            .keys()
            .chain(state.keypairs.keys())
            .chain(state.security_groups.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn check_rules(state: &FakeState, op: FakeOp, name: &str) -> SpiderResult<()> {
    for rule in &state.fail_rules {
        if rule.op == op && name.contains(&rule.name_contains) {
            return Err(SpiderError::Api {
                status: rule.status,
                message: rule.message.clone(),
            });
        }
    }
    Ok(())
}

fn not_found(what: &str, name: &str) -> SpiderError {
    SpiderError::Api {
        status: 404,
        message: format!("{what} '{name}' not found"),
    }
}

#[async_trait]
impl CspApi for FakeSpider {
    async fn lookup_spec(
        &self,
        connection: &str,
        csp_spec_name: &str,
    ) -> SpiderResult<VmSpecLookup> {
        let state = self.state.lock().unwrap();
        let key = (connection.to_string(), csp_spec_name.to_string());
        if state.csp_specs.contains(&key) {
            Ok(VmSpecLookup {
                name: csp_spec_name.to_string(),
                ..VmSpecLookup::default()
            })
        } else {
            Err(not_found("spec", csp_spec_name))
        }
    }

    async fn lookup_image(
        &self,
        connection: &str,
        csp_image_name: &str,
    ) -> SpiderResult<VmImageLookup> {
        let state = self.state.lock().unwrap();
        let key = (connection.to_string(), csp_image_name.to_string());
        if state.csp_images.contains(&key) {
            Ok(VmImageLookup {
                iid: IId {
                    name_id: csp_image_name.to_string(),
                    system_id: format!("csp-image-{csp_image_name}"),
                },
                status: "Available".to_string(),
                ..VmImageLookup::default()
            })
        } else {
            Err(not_found("image", csp_image_name))
        }
    }

    async fn create_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        check_rules(&state, FakeOp::CreateVpc, &name)?;
        state.calls.push(format!("createVpc:{name}"));
        let info = VpcInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-vpc-{name}"),
            },
            ipv4_cidr: req.req_info.ipv4_cidr.clone(),
            subnet_info_list: req
                .req_info
                .subnet_info_list
                .iter()
                .map(|s| SubnetInfo {
                    iid: IId {
                        name_id: s.name.clone(),
                        system_id: format!("csp-subnet-{}", s.name),
                    },
                    ipv4_cidr: s.ipv4_cidr.clone(),
                })
                .collect(),
            key_value_list: Vec::new(),
        };
        state.vpcs.insert(name, info.clone());
        Ok(info)
    }

    async fn get_vpc(&self, _connection: &str, name: &str) -> SpiderResult<VpcInfo> {
        let state = self.state.lock().unwrap();
        state
            .vpcs
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("vpc", name))
    }

    async fn register_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo> {
        self.create_vpc(req).await
    }

    async fn create_subnet(&self, req: &SubnetAddReq) -> SpiderResult<SubnetInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        check_rules(&state, FakeOp::CreateSubnet, &name)?;
        state.calls.push(format!("createSubnet:{name}"));
        let subnet = SubnetInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-subnet-{name}"),
            },
            ipv4_cidr: req.req_info.ipv4_cidr.clone(),
        };
        let vpc_name = req.req_info.vpc_name.clone();
        match state.vpcs.get_mut(&vpc_name) {
            Some(vpc) => vpc.subnet_info_list.push(subnet.clone()),
            None => return Err(not_found("vpc", &vpc_name)),
        }
        Ok(subnet)
    }

    async fn delete_vpc(&self, _connection: &str, name: &str) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::DeleteVpc, name)?;
        state.calls.push(format!("deleteVpc:{name}"));
        state
            .vpcs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("vpc", name))
    }

    async fn create_keypair(
        &self,
        req: &KeyPairCreateReq,
    ) -> SpiderResult<KeyPairInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        check_rules(&state, FakeOp::CreateKeyPair, &name)?;
        state.calls.push(format!("createKeyPair:{name}"));
        let info = KeyPairInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-key-{name}"),
            },
            fingerprint: "SHA256:fake".to_string(),
            public_key: "ssh-rsa AAAA fake".to_string(),
            private_key: "-----BEGIN FAKE KEY-----".to_string(),
            vm_user_id: "cb-user".to_string(),
        };
        state.keypairs.insert(name, info.clone());
        Ok(info)
    }

    async fn delete_keypair(&self, _connection: &str, name: &str) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::DeleteKeyPair, name)?;
        state.calls.push(format!("deleteKeyPair:{name}"));
        state
            .keypairs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("keypair", name))
    }

    async fn create_security_group(
        &self,
        req: &SecurityGroupCreateReq,
    ) -> SpiderResult<SecurityGroupInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        check_rules(&state, FakeOp::CreateSecurityGroup, &name)?;
        state.calls.push(format!("createSecurityGroup:{name}"));
        let info = SecurityGroupInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-sg-{name}"),
            },
            security_rules: req.req_info.security_rules.clone(),
        };
        state.security_groups.insert(name, info.clone());
        Ok(info)
    }

    async fn add_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<SecurityGroupInfo> {
        let mut state = self.state.lock().unwrap();
        match state.security_groups.get_mut(name) {
            Some(sg) => {
                sg.security_rules
                    .extend(req.req_info.rule_info_list.iter().cloned());
                Ok(sg.clone())
            }
            None => Err(not_found("security group", name)),
        }
    }

    async fn remove_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.security_groups.get_mut(name) {
            Some(sg) => {
                sg.security_rules
                    .retain(|r| !req.req_info.rule_info_list.contains(r));
                Ok(true)
            }
            None => Err(not_found("security group", name)),
        }
    }

    async fn delete_security_group(
        &self,
        _connection: &str,
        name: &str,
    ) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::DeleteSecurityGroup, name)?;
        state.calls.push(format!("deleteSecurityGroup:{name}"));
        state
            .security_groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("security group", name))
    }

    async fn create_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        state.vm_create_calls += 1;
        let call_no = state.vm_create_calls;
        state.calls.push(format!("createVm:{name}"));
        if state.fail_vm_create_calls.contains(&call_no) {
            return Err(SpiderError::Api {
                status: 500,
                message: "capacity".to_string(),
            });
        }
        check_rules(&state, FakeOp::CreateVm, &name)?;

        state.counter += 1;
        let n = state.counter;
        let info = SpiderVmInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("i-{n:08x}"),
            },
            image_iid: IId {
                name_id: req.req_info.image_name.clone(),
                system_id: format!("csp-image-{}", req.req_info.image_name),
            },
            vpc_iid: IId {
                name_id: req.req_info.vpc_name.clone(),
                system_id: format!("csp-vpc-{}", req.req_info.vpc_name),
            },
            subnet_iid: IId {
                name_id: req.req_info.subnet_name.clone(),
                system_id: format!("csp-subnet-{}", req.req_info.subnet_name),
            },
            key_pair_iid: IId {
                name_id: req.req_info.key_pair_name.clone(),
                system_id: format!("csp-key-{}", req.req_info.key_pair_name),
            },
            vm_spec_name: req.req_info.vm_spec_name.clone(),
            vm_user_id: if req.req_info.vm_user_id.is_empty() {
                "cb-user".to_string()
            } else {
                req.req_info.vm_user_id.clone()
            },
            vm_user_passwd: req.req_info.vm_user_passwd.clone(),
            public_ip: format!("52.0.0.{n}"),
            private_ip: format!("10.0.0.{n}"),
            ssh_access_point: format!("52.0.0.{n}:22"),
            root_disk_type: req.req_info.root_disk_type.clone(),
            root_disk_size: req.req_info.root_disk_size.clone(),
            ..SpiderVmInfo::default()
        };
        state.vms.insert(name.clone(), info.clone());
        state.vm_statuses.insert(name, "Running".to_string());
        Ok(info)
    }

    async fn register_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo> {
        self.create_vm(req).await
    }

    async fn get_vm(&self, _connection: &str, name: &str) -> SpiderResult<SpiderVmInfo> {
        let state = self.state.lock().unwrap();
        state
            .vms
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("vm", name))
    }

    async fn get_vm_status(
        &self,
        _connection: &str,
        name: &str,
    ) -> SpiderResult<VmStatusInfo> {
        let state = self.state.lock().unwrap();
        match state.vm_statuses.get(name) {
            Some(status) => Ok(VmStatusInfo {
                status: status.clone(),
            }),
            None => Err(not_found("vm", name)),
        }
    }

    async fn control_vm(
        &self,
        _connection: &str,
        name: &str,
        action: VmControlAction,
    ) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::ControlVm, name)?;
        state.calls.push(format!("controlVm:{name}:{}", action.as_query()));
        if !state.vm_statuses.contains_key(name) {
            return Err(not_found("vm", name));
        }
        let settled = match action {
            VmControlAction::Suspend => "Suspended",
            VmControlAction::Resume | VmControlAction::Reboot => "Running",
        };
        state
            .vm_statuses
            .insert(name.to_string(), settled.to_string());
        Ok(())
    }

    async fn terminate_vm(&self, _connection: &str, name: &str) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::TerminateVm, name)?;
        state.calls.push(format!("terminateVm:{name}"));
        if state.vms.remove(name).is_none() {
            return Err(not_found("vm", name));
        }
        state
            .vm_statuses
            .insert(name.to_string(), "Terminated".to_string());
        Ok(())
    }

    async fn create_disk(&self, req: &DiskCreateReq) -> SpiderResult<DiskInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        state.calls.push(format!("createDisk:{name}"));
        let info = DiskInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-disk-{name}"),
            },
            disk_type: req.req_info.disk_type.clone(),
            disk_size: req.req_info.disk_size.clone(),
            status: "Available".to_string(),
        };
        state.disks.insert(name, info.clone());
        Ok(info)
    }

    async fn attach_disk(
        &self,
        name: &str,
        _req: &DiskAttachDetachReq,
    ) -> SpiderResult<DiskInfo> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("attachDisk:{name}"));
        match state.disks.get_mut(name) {
            Some(disk) => {
                disk.status = "Attached".to_string();
                Ok(disk.clone())
            }
            None => Err(not_found("disk", name)),
        }
    }

    async fn detach_disk(
        &self,
        name: &str,
        _req: &DiskAttachDetachReq,
    ) -> SpiderResult<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("detachDisk:{name}"));
        match state.disks.get_mut(name) {
            Some(disk) => {
                disk.status = "Available".to_string();
                Ok(true)
            }
            None => Err(not_found("disk", name)),
        }
    }

    async fn create_cluster(
        &self,
        req: &ClusterCreateReq,
    ) -> SpiderResult<ClusterInfo> {
        let mut state = self.state.lock().unwrap();
        let name = req.req_info.name.clone();
        check_rules(&state, FakeOp::CreateCluster, &name)?;
        state.calls.push(format!("createCluster:{name}"));
        let info = ClusterInfo {
            iid: IId {
                name_id: name.clone(),
                system_id: format!("csp-cluster-{name}"),
            },
            version: req.req_info.version.clone(),
            status: "Active".to_string(),
            node_group_list: req
                .req_info
                .node_group_list
                .iter()
                .map(|ng| NodeGroupInfo {
                    iid: IId {
                        name_id: ng.name.clone(),
                        system_id: format!("csp-ng-{}", ng.name),
                    },
                    status: "Active".to_string(),
                    on_auto_scaling: ng.on_auto_scaling == "true",
                    desired_node_size: ng.desired_node_size.parse().unwrap_or(1),
                    min_node_size: ng.min_node_size.parse().unwrap_or(1),
                    max_node_size: ng.max_node_size.parse().unwrap_or(2),
                })
                .collect(),
            key_value_list: Vec::new(),
        };
        state.clusters.insert(name, info.clone());
        Ok(info)
    }

    async fn add_node_group(
        &self,
        cluster: &str,
        req: &NodeGroupAddReq,
    ) -> SpiderResult<ClusterInfo> {
        let mut state = self.state.lock().unwrap();
        check_rules(&state, FakeOp::AddNodeGroup, &req.req_info.name)?;
        state
            .calls
            .push(format!("addNodeGroup:{cluster}:{}", req.req_info.name));
        match state.clusters.get_mut(cluster) {
            Some(info) => {
                info.node_group_list.push(NodeGroupInfo {
                    iid: IId {
                        name_id: req.req_info.name.clone(),
                        system_id: format!("csp-ng-{}", req.req_info.name),
                    },
                    status: "Active".to_string(),
                    on_auto_scaling: req.req_info.on_auto_scaling == "true",
                    desired_node_size: req.req_info.desired_node_size.parse().unwrap_or(1),
                    min_node_size: req.req_info.min_node_size.parse().unwrap_or(1),
                    max_node_size: req.req_info.max_node_size.parse().unwrap_or(2),
                });
                Ok(info.clone())
            }
            None => Err(not_found("cluster", cluster)),
        }
    }

    async fn set_node_group_autoscaling(
        &self,
        cluster: &str,
        node_group: &str,
        req: &SetAutoscalingReq,
    ) -> SpiderResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(info) = state.clusters.get_mut(cluster) else {
            return Err(not_found("cluster", cluster));
        };
        let Some(ng) = info
            .node_group_list
            .iter_mut()
            .find(|ng| ng.iid.name_id == node_group)
        else {
            return Err(not_found("node group", node_group));
        };
        ng.on_auto_scaling = req.req_info.on_auto_scaling == "true";
        Ok(true)
    }

    async fn change_node_group_autoscale_size(
        &self,
        cluster: &str,
        node_group: &str,
        req: &ChangeAutoscaleSizeReq,
    ) -> SpiderResult<ClusterInfo> {
        let mut state = self.state.lock().unwrap();
        let Some(info) = state.clusters.get_mut(cluster) else {
            return Err(not_found("cluster", cluster));
        };
        let Some(ng) = info
            .node_group_list
            .iter_mut()
            .find(|ng| ng.iid.name_id == node_group)
        else {
            return Err(not_found("node group", node_group));
        };
        ng.desired_node_size = req.req_info.desired_node_size.parse().unwrap_or(1);
        ng.min_node_size = req.req_info.min_node_size.parse().unwrap_or(1);
        ng.max_node_size = req.req_info.max_node_size.parse().unwrap_or(2);
        Ok(info.clone())
    }

    async fn upgrade_cluster(
        &self,
        cluster: &str,
        req: &ClusterUpgradeReq,
    ) -> SpiderResult<ClusterInfo> {
        let mut state = self.state.lock().unwrap();
        match state.clusters.get_mut(cluster) {
            Some(info) => {
                info.version = req.req_info.version.clone();
                Ok(info.clone())
            }
            None => Err(not_found("cluster", cluster)),
        }
    }

    async fn delete_cluster(&self, _connection: &str, name: &str) -> SpiderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("deleteCluster:{name}"));
        state
            .clusters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("cluster", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_req(name: &str) -> VmCreateReq {
        VmCreateReq {
            connection_name: "aws-ap-northeast-2".to_string(),
            req_info: VmReqInfo {
                name: name.to_string(),
                image_name: "ami-1".to_string(),
                vm_spec_name: "t2.small".to_string(),
                ..VmReqInfo::default()
            },
        }
    }

    #[tokio::test]
    async fn vm_create_and_status() {
        let spider = FakeSpider::new();
        let info = spider.create_vm(&vm_req("conn-vm1")).await.unwrap();
        assert_eq!(info.iid.name_id, "conn-vm1");
        assert!(!info.public_ip.is_empty());

        let status = spider.get_vm_status("c", "conn-vm1").await.unwrap();
        assert_eq!(status.status, "Running");
    }

    #[tokio::test]
    async fn nth_call_failure_fires_once() {
        let spider = FakeSpider::new();
        spider.fail_vm_create_call(2);

        assert!(spider.create_vm(&vm_req("a")).await.is_ok());
        let err = spider.create_vm(&vm_req("b")).await.unwrap_err();
        match err {
            SpiderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "capacity");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(spider.create_vm(&vm_req("c")).await.is_ok());
    }

    #[tokio::test]
    async fn terminate_moves_status_to_terminated() {
        let spider = FakeSpider::new();
        spider.create_vm(&vm_req("conn-vm1")).await.unwrap();
        spider.terminate_vm("c", "conn-vm1").await.unwrap();
        let status = spider.get_vm_status("c", "conn-vm1").await.unwrap();
        assert_eq!(status.status, "Terminated");
    }

    #[tokio::test]
    async fn name_rule_failures_match_substring() {
        let spider = FakeSpider::new();
        spider.fail_op(FakeOp::CreateKeyPair, "gcp", 403, "quota");

        let ok = KeyPairCreateReq {
            connection_name: "aws".to_string(),
            req_info: KeyPairReqInfo {
                name: "aws-key".to_string(),
            },
        };
        let bad = KeyPairCreateReq {
            connection_name: "gcp".to_string(),
            req_info: KeyPairReqInfo {
                name: "gcp-key".to_string(),
            },
        };
        assert!(spider.create_keypair(&ok).await.is_ok());
        assert!(spider.create_keypair(&bad).await.is_err());
    }
}
