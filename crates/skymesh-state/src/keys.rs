//! Key layout.
//!
//! ```text
//! /ns/<ns>/mci/<mciId>                     → MCI record
//! /ns/<ns>/mci/<mciId>/vm/<vmId>           → VM record
//! /ns/<ns>/mci/<mciId>/subgroup/<sgId>     → SubGroup record
//! /ns/<ns>/resources/<kind>/<id>           → shared resource / spec / image
//! /ns/<ns>/k8scluster/<id>                 → K8s cluster record
//! /connection/<name>                       → connection config
//! /log/provision/<encoded specId>          → provisioning log
//! ```
//!
//! A key belongs to "vm" iff it matches the MCI prefix + `vm/` + a
//! segment with no further `/`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::types::ResourceKind;

/// Characters escaped in provisioning-log spec ids (everything outside
/// the URL-unreserved set, so ids like `gcp+europe-north1+f1-micro` are
/// key-safe).
const SPEC_ID_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Key of an MCI record.
pub fn mci_key(ns: &str, mci_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}")
}

/// Prefix under which all of an MCI's descendants live.
pub fn mci_descendants_prefix(ns: &str, mci_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/")
}

/// Key of a VM record.
pub fn vm_key(ns: &str, mci_id: &str, vm_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/vm/{vm_id}")
}

/// Key of a sub-group record.
pub fn sub_group_key(ns: &str, mci_id: &str, sub_group_id: &str) -> String {
    format!("/ns/{ns}/mci/{mci_id}/subgroup/{sub_group_id}")
}

/// Key of a shared resource, spec, or image record.
pub fn resource_key(ns: &str, kind: ResourceKind, id: &str) -> String {
    format!("/ns/{ns}/resources/{}/{id}", kind.as_str())
}

/// Key of a K8s cluster record.
pub fn k8s_cluster_key(ns: &str, cluster_id: &str) -> String {
    format!("/ns/{ns}/k8scluster/{cluster_id}")
}

/// Key of a connection config.
pub fn connection_key(name: &str) -> String {
    format!("/connection/{name}")
}

/// Prefix of all provisioning logs.
pub const PROVISION_LOG_PREFIX: &str = "/log/provision/";

/// Key of the provisioning log for a spec id.
pub fn provision_log_key(spec_id: &str) -> String {
    let encoded = utf8_percent_encode(spec_id, SPEC_ID_ESCAPES);
    format!("{PROVISION_LOG_PREFIX}{encoded}")
}

/// Extract the MCI id from a top-level MCI key under a namespace.
/// Keys with further segments (VM, sub-group) are rejected.
pub fn mci_id_from_key<'a>(ns: &str, key: &'a str) -> Option<&'a str> {
    let prefix = format!("/ns/{ns}/mci/");
    let rest = key.strip_prefix(&prefix)?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// Extract the VM id from a key under an MCI. Only direct `vm/<id>`
/// children qualify.
pub fn vm_id_from_key<'a>(ns: &str, mci_id: &str, key: &'a str) -> Option<&'a str> {
    let prefix = format!("/ns/{ns}/mci/{mci_id}/vm/");
    let rest = key.strip_prefix(&prefix)?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// Extract the sub-group id from a key under an MCI.
pub fn sub_group_id_from_key<'a>(
    ns: &str,
    mci_id: &str,
    key: &'a str,
) -> Option<&'a str> {
    let prefix = format!("/ns/{ns}/mci/{mci_id}/subgroup/");
    let rest = key.strip_prefix(&prefix)?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}
