//! Read-only spec/image catalog and the connection registry.
//!
//! Specs and images are produced externally and only looked up here;
//! connection configs are registered by the embedding process. Lookups
//! fall back from the caller's namespace to the system-common namespace
//! the way system-owned catalog entries are shared.

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::kv::KvStore;
use crate::types::{ConnConfig, ImageRecord, ResourceKind, SpecRecord};

/// Catalog view over the shared KV store.
#[derive(Clone)]
pub struct Catalog {
    kv: KvStore,
    system_ns: String,
}

impl Catalog {
    pub fn new(kv: KvStore, system_ns: impl Into<String>) -> Self {
        Self {
            kv,
            system_ns: system_ns.into(),
        }
    }

    /// Namespace holding system-owned catalog entries.
    pub fn system_ns(&self) -> &str {
        &self.system_ns
    }

    // ── Specs ──────────────────────────────────────────────────────

    pub fn put_spec(&self, ns: &str, spec: &SpecRecord) -> StateResult<()> {
        let key = keys::resource_key(ns, ResourceKind::Spec, &spec.id);
        self.kv.put_json(&key, spec)
    }

    /// Look up a spec in `ns`, falling back to the system namespace.
    pub fn get_spec(&self, ns: &str, spec_id: &str) -> StateResult<SpecRecord> {
        let key = keys::resource_key(ns, ResourceKind::Spec, spec_id);
        if let Some(spec) = self.kv.get_json::<SpecRecord>(&key)? {
            return Ok(spec);
        }
        if ns != self.system_ns {
            let fallback =
                keys::resource_key(&self.system_ns, ResourceKind::Spec, spec_id);
            if let Some(spec) = self.kv.get_json::<SpecRecord>(&fallback)? {
                debug!(%spec_id, "spec resolved from system namespace");
                return Ok(spec);
            }
        }
        Err(StateError::NotFound(format!("spec '{spec_id}'")))
    }

    // ── Images ─────────────────────────────────────────────────────

    pub fn put_image(&self, ns: &str, image: &ImageRecord) -> StateResult<()> {
        let key = keys::resource_key(ns, ResourceKind::Image, &image.id);
        self.kv.put_json(&key, image)
    }

    /// Look up an image in `ns`, falling back to the system namespace.
    pub fn get_image(&self, ns: &str, image_id: &str) -> StateResult<ImageRecord> {
        let key = keys::resource_key(ns, ResourceKind::Image, image_id);
        if let Some(image) = self.kv.get_json::<ImageRecord>(&key)? {
            return Ok(image);
        }
        if ns != self.system_ns {
            let fallback =
                keys::resource_key(&self.system_ns, ResourceKind::Image, image_id);
            if let Some(image) = self.kv.get_json::<ImageRecord>(&fallback)? {
                return Ok(image);
            }
        }
        Err(StateError::NotFound(format!("image '{image_id}'")))
    }

    // ── Connections ────────────────────────────────────────────────

    pub fn put_connection(&self, conn: &ConnConfig) -> StateResult<()> {
        self.kv.put_json(&keys::connection_key(&conn.name), conn)
    }

    pub fn get_connection(&self, name: &str) -> StateResult<ConnConfig> {
        self.kv
            .get_json::<ConnConfig>(&keys::connection_key(name))?
            .ok_or_else(|| StateError::NotFound(format!("connection '{name}'")))
    }

    pub fn list_connections(&self) -> StateResult<Vec<ConnConfig>> {
        let mut connections = Vec::new();
        for (_, value) in self.kv.list("/connection/")? {
            let conn: ConnConfig = serde_json::from_str(&value)
                .map_err(|e| StateError::Deserialize(e.to_string()))?;
            connections.push(conn);
        }
        Ok(connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::new(KvStore::open_in_memory().unwrap(), "system-ns")
    }

    fn spec(id: &str) -> SpecRecord {
        SpecRecord {
            id: id.to_string(),
            connection: "aws-ap-northeast-2".to_string(),
            csp_spec_name: "t2.small".to_string(),
            provider: "aws".to_string(),
            region: "ap-northeast-2".to_string(),
            root_disk_type: None,
            root_disk_size: None,
            cost_per_hour: Some(0.026),
            infra_type: None,
        }
    }

    #[test]
    fn spec_lookup_falls_back_to_system_ns() {
        let catalog = catalog();
        catalog.put_spec("system-ns", &spec("aws-t2-small")).unwrap();

        let found = catalog.get_spec("demo", "aws-t2-small").unwrap();
        assert_eq!(found.csp_spec_name, "t2.small");
    }

    #[test]
    fn namespace_local_spec_wins_over_system() {
        let catalog = catalog();
        let mut local = spec("aws-t2-small");
        local.csp_spec_name = "t2.small-local".to_string();
        catalog.put_spec("system-ns", &spec("aws-t2-small")).unwrap();
        catalog.put_spec("demo", &local).unwrap();

        let found = catalog.get_spec("demo", "aws-t2-small").unwrap();
        assert_eq!(found.csp_spec_name, "t2.small-local");
    }

    #[test]
    fn unknown_spec_is_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get_spec("demo", "nope"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn connection_round_trip() {
        let catalog = catalog();
        let conn = ConnConfig {
            name: "aws-ap-northeast-2".to_string(),
            provider: "aws".to_string(),
            region: "ap-northeast-2".to_string(),
            zone: None,
        };
        catalog.put_connection(&conn).unwrap();
        assert_eq!(catalog.get_connection("aws-ap-northeast-2").unwrap(), conn);
        assert_eq!(catalog.list_connections().unwrap().len(), 1);
    }
}
