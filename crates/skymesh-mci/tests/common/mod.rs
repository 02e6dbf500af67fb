//! Shared harness for the orchestrator flow tests: in-memory store,
//! fake Spider, and a seeded catalog.
#![allow(dead_code)]

use std::sync::Arc;

use skymesh_mci::MciOrchestrator;
use skymesh_spider::fake::FakeSpider;
use skymesh_state::requests::{MciDynamicReq, VmDynamicReq};
use skymesh_state::{Catalog, ConnConfig, ImageRecord, KvStore, SpecRecord};

pub const NS: &str = "demo";
pub const SYSTEM_NS: &str = "system-ns";
pub const AWS_CONN: &str = "aws-ap-northeast-2";
pub const AWS_SPEC: &str = "aws-ap-northeast-2-t2-small";
pub const GCP_CONN: &str = "gcp-europe-north1";
pub const GCP_SPEC: &str = "gcp+europe-north1+f1-micro";
pub const IMAGE: &str = "ubuntu22.04";

pub struct Harness {
    pub orchestrator: MciOrchestrator,
    pub spider: Arc<FakeSpider>,
    pub kv: KvStore,
    pub catalog: Catalog,
}

pub fn harness() -> Harness {
    let kv = KvStore::open_in_memory().unwrap();
    let catalog = Catalog::new(kv.clone(), SYSTEM_NS);
    let spider = Arc::new(FakeSpider::new());
    let orchestrator =
        MciOrchestrator::new(kv.clone(), catalog.clone(), spider.clone());

    for (spec_id, conn, provider, region, csp_spec, cost) in [
        (AWS_SPEC, AWS_CONN, "aws", "ap-northeast-2", "t2.small", 0.026),
        (GCP_SPEC, GCP_CONN, "gcp", "europe-north1", "f1-micro", 0.0076),
    ] {
        catalog
            .put_connection(&ConnConfig {
                name: conn.to_string(),
                provider: provider.to_string(),
                region: region.to_string(),
                zone: None,
            })
            .unwrap();
        catalog
            .put_spec(
                SYSTEM_NS,
                &SpecRecord {
                    id: spec_id.to_string(),
                    connection: conn.to_string(),
                    csp_spec_name: csp_spec.to_string(),
                    provider: provider.to_string(),
                    region: region.to_string(),
                    root_disk_type: None,
                    root_disk_size: None,
                    cost_per_hour: Some(cost),
                    infra_type: None,
                },
            )
            .unwrap();
        spider.register_csp_spec(conn, csp_spec);
        spider.register_csp_image(conn, IMAGE);
    }

    catalog
        .put_image(
            SYSTEM_NS,
            &ImageRecord {
                id: IMAGE.to_string(),
                connection: AWS_CONN.to_string(),
                csp_image_name: IMAGE.to_string(),
                os_family: Some("ubuntu".to_string()),
                infra_type: None,
            },
        )
        .unwrap();

    Harness {
        orchestrator,
        spider,
        kv,
        catalog,
    }
}

pub fn single_vm_req(mci_name: &str, vm_name: &str, size: u32) -> MciDynamicReq {
    MciDynamicReq {
        name: mci_name.to_string(),
        vm: vec![VmDynamicReq {
            name: vm_name.to_string(),
            common_spec: AWS_SPEC.to_string(),
            common_image: IMAGE.to_string(),
            connection: None,
            sub_group_size: size,
            root_disk_type: String::new(),
            root_disk_size: String::new(),
            vm_user_password: String::new(),
            description: String::new(),
            label: Default::default(),
        }],
        description: String::new(),
        install_mon_agent: "no".to_string(),
        label: Default::default(),
        system_label: String::new(),
        post_command: None,
        policy_on_partial_failure: Default::default(),
        risk_gating: true,
    }
}
