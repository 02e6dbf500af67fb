//! Wire types for the Spider REST API.
//!
//! Field spellings mirror the service's JSON exactly (Go-exported
//! names, including its inconsistent `IId`/`IID` casing). Unknown
//! response fields are ignored; absent ones default.

use serde::{Deserialize, Serialize};

/// CSP-side identifier pair: the name Spider assigned and the id the
/// CSP assigned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IId {
    #[serde(rename = "NameId", default)]
    pub name_id: String,
    #[serde(rename = "SystemId", default)]
    pub system_id: String,
}

/// Free-form key/value detail list attached to most responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// Region/zone pair reported back by Spider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionInfo {
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "Zone", default)]
    pub zone: String,
}

// ── vNet / subnet ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList", default)]
    pub subnet_info_list: Vec<SubnetReqInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcCreateReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: VpcReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetAddReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetAddReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: SubnetAddReqInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubnetInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VpcInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList", default)]
    pub subnet_info_list: Vec<SubnetInfo>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

// ── SSH keys ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPairReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPairCreateReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: KeyPairReqInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyPairInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Fingerprint", default)]
    pub fingerprint: String,
    #[serde(rename = "PublicKey", default)]
    pub public_key: String,
    #[serde(rename = "PrivateKey", default)]
    pub private_key: String,
    #[serde(rename = "VMUserID", default)]
    pub vm_user_id: String,
}

// ── Security groups ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRuleInfo {
    #[serde(rename = "FromPort")]
    pub from_port: String,
    #[serde(rename = "ToPort")]
    pub to_port: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "CIDR")]
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SecurityRules", default)]
    pub security_rules: Vec<SecurityRuleInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupCreateReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: SecurityGroupReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRulesReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: SecurityRulesReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRulesReqInfo {
    #[serde(rename = "RuleInfoList", default)]
    pub rule_info_list: Vec<SecurityRuleInfo>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "SecurityRules", default)]
    pub security_rules: Vec<SecurityRuleInfo>,
}

// ── VMs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName", default)]
    pub image_name: String,
    /// `"MyImage"` when booting from a snapshot-derived custom image.
    #[serde(rename = "ImageType", default, skip_serializing_if = "String::is_empty")]
    pub image_type: String,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "VPCName", default)]
    pub vpc_name: String,
    #[serde(rename = "SubnetName", default)]
    pub subnet_name: String,
    #[serde(rename = "SecurityGroupNames", default)]
    pub security_group_names: Vec<String>,
    #[serde(rename = "KeyPairName", default)]
    pub key_pair_name: String,
    #[serde(rename = "VMUserId", default)]
    pub vm_user_id: String,
    #[serde(rename = "VMUserPasswd", default)]
    pub vm_user_passwd: String,
    #[serde(rename = "RootDiskType", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", default)]
    pub root_disk_size: String,
    #[serde(rename = "DataDiskNames", default)]
    pub data_disk_names: Vec<String>,
    /// Pre-existing CSP VM id; only set when registering.
    #[serde(rename = "CSPid", default, skip_serializing_if = "String::is_empty")]
    pub csp_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmCreateReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: VmReqInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpiderVmInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "ImageIId", default)]
    pub image_iid: IId,
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: IId,
    #[serde(rename = "SubnetIID", default)]
    pub subnet_iid: IId,
    #[serde(rename = "KeyPairIId", default)]
    pub key_pair_iid: IId,
    #[serde(rename = "DataDiskIIDs", default)]
    pub data_disk_iids: Vec<IId>,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "VMUserId", default)]
    pub vm_user_id: String,
    #[serde(rename = "VMUserPasswd", default)]
    pub vm_user_passwd: String,
    #[serde(rename = "PublicIP", default)]
    pub public_ip: String,
    #[serde(rename = "PublicDNS", default)]
    pub public_dns: String,
    #[serde(rename = "PrivateIP", default)]
    pub private_ip: String,
    #[serde(rename = "PrivateDNS", default)]
    pub private_dns: String,
    #[serde(rename = "SSHAccessPoint", default)]
    pub ssh_access_point: String,
    #[serde(rename = "RootDiskType", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", default)]
    pub root_disk_size: String,
    #[serde(rename = "RootDeviceName", default)]
    pub root_device_name: String,
    #[serde(rename = "Region", default)]
    pub region: RegionInfo,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmStatusInfo {
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Lookup result for a CSP spec (`GET /vmspec/{name}`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmSpecLookup {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "VCpu", default)]
    pub vcpu: Option<VCpuInfo>,
    #[serde(rename = "Mem", default)]
    pub mem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VCpuInfo {
    #[serde(rename = "Count", default)]
    pub count: String,
    #[serde(rename = "Clock", default)]
    pub clock: String,
}

/// Lookup result for a CSP image (`GET /vmimage/{name}`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmImageLookup {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "GuestOS", default)]
    pub guest_os: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

// ── Disks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DiskType", default)]
    pub disk_type: String,
    #[serde(rename = "DiskSize", default)]
    pub disk_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCreateReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: DiskReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskAttachDetachReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: DiskVmReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskVmReqInfo {
    #[serde(rename = "VMName")]
    pub vm_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "DiskType", default)]
    pub disk_type: String,
    #[serde(rename = "DiskSize", default)]
    pub disk_size: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

// ── Clusters / node groups ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName", default)]
    pub image_name: String,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "RootDiskType", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", default)]
    pub root_disk_size: String,
    #[serde(rename = "KeyPairName", default)]
    pub key_pair_name: String,
    #[serde(rename = "OnAutoScaling", default)]
    pub on_auto_scaling: String,
    #[serde(rename = "DesiredNodeSize", default)]
    pub desired_node_size: String,
    #[serde(rename = "MinNodeSize", default)]
    pub min_node_size: String,
    #[serde(rename = "MaxNodeSize", default)]
    pub max_node_size: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "VPCName", default)]
    pub vpc_name: String,
    #[serde(rename = "SubnetNames", default)]
    pub subnet_names: Vec<String>,
    #[serde(rename = "SecurityGroupNames", default)]
    pub security_group_names: Vec<String>,
    #[serde(rename = "NodeGroupList", default)]
    pub node_group_list: Vec<NodeGroupReqInfo>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterCreateReq {
    /// Always empty; present for wire compatibility.
    #[serde(rename = "NameSpace", default)]
    pub name_space: String,
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: ClusterReqInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeGroupAddReq {
    #[serde(rename = "NameSpace", default)]
    pub name_space: String,
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: NodeGroupReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAutoscalingReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: SetAutoscalingReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAutoscalingReqInfo {
    #[serde(rename = "OnAutoScaling")]
    pub on_auto_scaling: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetAutoscalingRes {
    #[serde(rename = "Result", default)]
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAutoscaleSizeReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: ChangeAutoscaleSizeReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAutoscaleSizeReqInfo {
    #[serde(rename = "DesiredNodeSize")]
    pub desired_node_size: String,
    #[serde(rename = "MinNodeSize")]
    pub min_node_size: String,
    #[serde(rename = "MaxNodeSize")]
    pub max_node_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpgradeReq {
    #[serde(rename = "NameSpace", default)]
    pub name_space: String,
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: ClusterUpgradeReqInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpgradeReqInfo {
    #[serde(rename = "Version")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "OnAutoScaling", default)]
    pub on_auto_scaling: bool,
    #[serde(rename = "DesiredNodeSize", default)]
    pub desired_node_size: i32,
    #[serde(rename = "MinNodeSize", default)]
    pub min_node_size: i32,
    #[serde(rename = "MaxNodeSize", default)]
    pub max_node_size: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "NodeGroupList", default)]
    pub node_group_list: Vec<NodeGroupInfo>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

/// Bare connection wrapper used by GET/DELETE calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReq {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_request_uses_wire_field_names() {
        let req = VmCreateReq {
            connection_name: "aws-ap-northeast-2".to_string(),
            req_info: VmReqInfo {
                name: "aws-ap-northeast-2-c0a1b2c3d4e5f".to_string(),
                image_name: "ami-0c9c9".to_string(),
                vm_spec_name: "t2.small".to_string(),
                security_group_names: vec!["sg-1".to_string()],
                ..VmReqInfo::default()
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"ConnectionName\""));
        assert!(json.contains("\"VMSpecName\""));
        assert!(json.contains("\"SecurityGroupNames\""));
        // Empty register/custom-image markers stay off the wire.
        assert!(!json.contains("CSPid"));
        assert!(!json.contains("ImageType"));
    }

    #[test]
    fn vm_info_tolerates_unknown_and_missing_fields() {
        let json = r#"{
            "IId": {"NameId": "vm-1", "SystemId": "i-0abc"},
            "PublicIP": "3.35.0.1",
            "SSHAccessPoint": "3.35.0.1:22",
            "SomeNewField": {"x": 1}
        }"#;
        let info: SpiderVmInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.iid.system_id, "i-0abc");
        assert_eq!(info.ssh_access_point, "3.35.0.1:22");
        assert_eq!(info.private_ip, "");
    }
}
