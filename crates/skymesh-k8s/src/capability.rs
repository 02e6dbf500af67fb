//! Per-provider capability table, loaded from `k8sclusterinfo.yaml`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{K8sError, K8sResult};

/// One selectable cluster version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionEntry {
    pub name: String,
    pub id: String,
}

/// Versions offered in a set of regions. The region list may contain
/// `all` as a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionVersions {
    pub region: Vec<String>,
    #[serde(default)]
    pub available: Vec<VersionEntry>,
}

/// Root-disk constraints for node groups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RootDiskConstraint {
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub min_size_gb: Option<u32>,
    #[serde(default)]
    pub max_size_gb: Option<u32>,
}

/// What one provider's managed-K8s service supports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderCapability {
    /// Whether node groups must be bundled into cluster creation.
    #[serde(rename = "nodeGroupsOnCreation", default)]
    pub node_groups_on_creation: bool,
    /// Whether node groups may designate an OS image.
    #[serde(rename = "nodeImageDesignation", default)]
    pub node_image_designation: bool,
    /// How many subnets a cluster's vNet must carry.
    #[serde(rename = "requiredSubnetCount", default = "default_subnet_count")]
    pub required_subnet_count: usize,
    #[serde(rename = "rootDisk", default)]
    pub root_disk: RootDiskConstraint,
    #[serde(default)]
    pub version: Vec<RegionVersions>,
}

fn default_subnet_count() -> usize {
    1
}

/// The full capability table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct K8sCapabilities {
    #[serde(rename = "k8scluster")]
    providers: HashMap<String, ProviderCapability>,
}

impl K8sCapabilities {
    pub fn from_yaml(yaml: &str) -> K8sResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| K8sError::Capability(format!("invalid capability table: {e}")))
    }

    pub fn from_file(path: &Path) -> K8sResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| K8sError::Capability(format!("cannot read {path:?}: {e}")))?;
        Self::from_yaml(&content)
    }

    /// Capability entry for a provider (case-insensitive).
    pub fn provider(&self, provider: &str) -> K8sResult<&ProviderCapability> {
        self.providers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(provider))
            .map(|(_, capability)| capability)
            .ok_or_else(|| {
                K8sError::Capability(format!(
                    "provider '{provider}' has no managed K8s capability entry"
                ))
            })
    }

    /// Versions offered by a provider in a region (honoring the `all`
    /// wildcard).
    pub fn available_versions(
        &self,
        provider: &str,
        region: &str,
    ) -> K8sResult<Vec<VersionEntry>> {
        let capability = self.provider(provider)?;
        let mut versions = Vec::new();
        for entry in &capability.version {
            let matches = entry
                .region
                .iter()
                .any(|r| r.eq_ignore_ascii_case(region) || r.eq_ignore_ascii_case("all"));
            if matches {
                versions.extend(entry.available.iter().cloned());
            }
        }
        if versions.is_empty() {
            return Err(K8sError::Capability(format!(
                "no available K8s version for provider/region {provider}/{region}"
            )));
        }
        Ok(versions)
    }
}

#[cfg(test)]
pub(crate) const TEST_TABLE: &str = r#"
k8scluster:
  aws:
    nodeGroupsOnCreation: false
    nodeImageDesignation: true
    requiredSubnetCount: 2
    rootDisk:
      type: ["gp2", "gp3"]
      min_size_gb: 20
    version:
      - region: ["ap-northeast-2", "us-east-1"]
        available:
          - name: "1.29"
            id: "1.29.6"
          - name: "1.30"
            id: "1.30.2"
  azure:
    nodeGroupsOnCreation: true
    nodeImageDesignation: false
    version:
      - region: ["all"]
        available:
          - name: "1.29.2"
            id: "1.29.2"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_parses() {
        let table = K8sCapabilities::from_yaml(TEST_TABLE).unwrap();
        let aws = table.provider("aws").unwrap();
        assert!(!aws.node_groups_on_creation);
        assert!(aws.node_image_designation);
        assert_eq!(aws.required_subnet_count, 2);
        assert_eq!(aws.root_disk.types, vec!["gp2", "gp3"]);

        let azure = table.provider("AZURE").unwrap();
        assert!(azure.node_groups_on_creation);
        assert_eq!(azure.required_subnet_count, 1);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let table = K8sCapabilities::from_yaml(TEST_TABLE).unwrap();
        assert!(matches!(
            table.provider("gcp"),
            Err(K8sError::Capability(_))
        ));
    }

    #[test]
    fn versions_resolve_per_region() {
        let table = K8sCapabilities::from_yaml(TEST_TABLE).unwrap();
        let versions = table.available_versions("aws", "ap-northeast-2").unwrap();
        assert_eq!(versions.len(), 2);

        assert!(matches!(
            table.available_versions("aws", "eu-west-3"),
            Err(K8sError::Capability(_))
        ));
    }

    #[test]
    fn all_wildcard_matches_any_region() {
        let table = K8sCapabilities::from_yaml(TEST_TABLE).unwrap();
        let versions = table.available_versions("azure", "koreacentral").unwrap();
        assert_eq!(versions[0].id, "1.29.2");
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(K8sCapabilities::from_yaml("k8scluster: [not-a-map").is_err());
    }
}
