//! VM field filtering.
//!
//! A fixed accessor table maps filterable field names to VM record
//! fields; field names match case-insensitively.

use skymesh_state::VmRecord;

type Accessor = fn(&VmRecord) -> String;

/// Filterable fields, by canonical name.
const FIELDS: &[(&str, Accessor)] = &[
    ("id", |vm| vm.id.clone()),
    ("name", |vm| vm.name.clone()),
    ("subgroupid", |vm| vm.sub_group_id.clone().unwrap_or_default()),
    ("connection", |vm| vm.connection.clone()),
    ("specid", |vm| vm.spec_id.clone()),
    ("imageid", |vm| vm.image_id.clone()),
    ("vnetid", |vm| vm.v_net_id.clone()),
    ("subnetid", |vm| vm.subnet_id.clone()),
    ("sshkeyid", |vm| vm.ssh_key_id.clone()),
    ("status", |vm| vm.status.to_string()),
    ("publicip", |vm| vm.public_ip.clone()),
    ("privateip", |vm| vm.private_ip.clone()),
    ("cspresourceid", |vm| vm.csp_resource_id.clone()),
    ("cspresourcename", |vm| vm.csp_resource_name.clone()),
];

/// Look up the accessor for a field name (case-insensitive).
pub fn accessor(field: &str) -> Option<Accessor> {
    FIELDS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(field))
        .map(|(_, accessor)| *accessor)
}

/// Whether the VM's field equals the value (both case-insensitive).
/// Unknown fields never match.
pub fn matches(vm: &VmRecord, field: &str, value: &str) -> bool {
    match accessor(field) {
        Some(get) => get(vm).eq_ignore_ascii_case(value),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_state::VmStatus;

    fn vm() -> VmRecord {
        VmRecord {
            id: "v-1".to_string(),
            name: "v-1".to_string(),
            sub_group_id: Some("v".to_string()),
            connection: "aws-ap-northeast-2".to_string(),
            spec_id: "aws-t2-small".to_string(),
            status: VmStatus::Running,
            ..VmRecord::default()
        }
    }

    #[test]
    fn field_names_are_case_insensitive() {
        let vm = vm();
        assert!(matches(&vm, "SubGroupId", "v"));
        assert!(matches(&vm, "subgroupid", "V"));
        assert!(matches(&vm, "Status", "running"));
    }

    #[test]
    fn unknown_fields_never_match() {
        assert!(!matches(&vm(), "notAField", "v"));
        assert!(accessor("notAField").is_none());
    }

    #[test]
    fn values_must_match() {
        let vm = vm();
        assert!(!matches(&vm, "subgroupid", "other"));
        assert!(matches(&vm, "connection", "aws-ap-northeast-2"));
    }
}
