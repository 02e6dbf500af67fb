//! End-to-end creation flows against the in-memory store and the fake
//! Spider: the single-VM happy path, partial failures under each
//! policy, risk gating, and the store-level invariants they imply.

mod common;

use common::*;

use skymesh_history::ProvisioningEvent;
use skymesh_mci::{DeleteOption, DeployOption, MciError};
use skymesh_resource::shared_resource_id;
use skymesh_state::requests::VmDynamicReq;
use skymesh_state::{
    keys, CreationPhase, MciRecord, PartialFailurePolicy, ResourceKind,
    SharedResourceRecord, VmStatus,
};

#[tokio::test(start_paused = true)]
async fn single_vm_happy_path() {
    let h = harness();
    let req = single_vm_req("m1", "v", 1);

    let view = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    assert!(
        view.mci.status.starts_with("Running:1 (R:1/1)"),
        "status was {}",
        view.mci.status
    );
    assert_eq!(view.vms.len(), 1);
    assert_eq!(view.vms[0].id, "v");
    assert_eq!(view.vms[0].status, VmStatus::Running);
    assert!(view.mci.creation_errors.is_none());

    // All four shared resources exist and back-reference the VM.
    let shared = shared_resource_id(NS, AWS_CONN);
    let vm_key = keys::vm_key(NS, "m1", "v");
    for kind in [
        ResourceKind::VNet,
        ResourceKind::Subnet,
        ResourceKind::SshKey,
        ResourceKind::SecurityGroup,
    ] {
        let record: SharedResourceRecord = h
            .kv
            .get_json(&keys::resource_key(NS, kind, &shared))
            .unwrap()
            .unwrap_or_else(|| panic!("{kind} record missing"));
        assert_eq!(record.associated, vec![vm_key.clone()], "{kind}");
    }
}

#[tokio::test(start_paused = true)]
async fn sub_group_expansion_names_vms_by_index() {
    let h = harness();
    let req = single_vm_req("m1", "v", 3);

    let view = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    let ids: Vec<&str> = view.vms.iter().map(|vm| vm.id.as_str()).collect();
    assert_eq!(ids, vec!["v-1", "v-2", "v-3"]);
    assert!(view.mci.status.starts_with("Running:3 (R:3/3)"));
    for vm in &view.vms {
        assert_eq!(vm.sub_group_id.as_deref(), Some("v"));
    }
}

#[tokio::test(start_paused = true)]
async fn partial_failure_continue_keeps_failed_vm() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 3);
    req.policy_on_partial_failure = PartialFailurePolicy::Continue;
    h.spider.fail_vm_create_call(2);

    let view = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    assert_eq!(view.vms.len(), 3);
    let failed: Vec<&str> = view
        .vms
        .iter()
        .filter(|vm| vm.status == VmStatus::Failed)
        .map(|vm| vm.id.as_str())
        .collect();
    let running = view
        .vms
        .iter()
        .filter(|vm| vm.status == VmStatus::Running)
        .count();
    assert_eq!(failed, vec!["v-2"]);
    assert_eq!(running, 2);
    assert!(
        view.mci.status.starts_with("Partial-Failed:1 (R:2/3)"),
        "status was {}",
        view.mci.status
    );

    let errors = view.mci.creation_errors.expect("creation errors recorded");
    assert_eq!(errors.failed_vm_count, 1);
    assert_eq!(errors.successful_vm_count, 2);
    assert_eq!(errors.total_vm_count, 3);
    assert_eq!(errors.vm_creation_errors.len(), 1);
    assert_eq!(errors.vm_creation_errors[0].vm_name, "v-2");
    assert_eq!(errors.vm_creation_errors[0].phase, CreationPhase::VmCreation);
    assert!(errors.vm_creation_errors[0].error.contains("capacity"));
    assert_eq!(
        errors.failure_handling_strategy,
        PartialFailurePolicy::Continue
    );
}

#[tokio::test(start_paused = true)]
async fn partial_failure_rollback_deletes_everything() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 3);
    req.policy_on_partial_failure = PartialFailurePolicy::Rollback;
    h.spider.fail_vm_create_call(2);

    let err = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap_err();
    assert!(matches!(err, MciError::RolledBack(_)));

    // Nothing is left under the MCI, including the record itself.
    assert!(h
        .kv
        .list(&keys::mci_descendants_prefix(NS, "m1"))
        .unwrap()
        .is_empty());
    assert!(h.kv.get(&keys::mci_key(NS, "m1")).unwrap().is_none());

    // Shared resources are reused across MCIs and may remain.
    let shared = shared_resource_id(NS, AWS_CONN);
    assert!(h
        .kv
        .get(&keys::resource_key(NS, ResourceKind::VNet, &shared))
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn partial_failure_refine_removes_failed_vms() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 3);
    req.policy_on_partial_failure = PartialFailurePolicy::Refine;
    h.spider.fail_vm_create_call(2);

    let view = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    assert_eq!(view.vms.len(), 2);
    assert!(view.vms.iter().all(|vm| vm.status == VmStatus::Running));

    // The failure stays on record even though the VM is gone.
    let errors = view.mci.creation_errors.expect("creation errors recorded");
    assert_eq!(errors.failed_vm_count, 1);

    // The sub-group shrank with the refined VM.
    let sub_group: skymesh_state::SubGroupRecord = h
        .kv
        .get_json(&keys::sub_group_key(NS, "m1", "v"))
        .unwrap()
        .unwrap();
    assert_eq!(sub_group.size, 2);
    assert!(!sub_group.vm_ids.contains(&"v-2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn high_risk_combination_is_refused() {
    let h = harness();

    // Seed the provisioning history: this spec+image pair has failed
    // and never succeeded.
    h.orchestrator
        .history()
        .record(&ProvisioningEvent {
            spec_id: GCP_SPEC.to_string(),
            csp_image_name: IMAGE.to_string(),
            is_success: false,
            error_message: "quota exceeded".to_string(),
            vm_name: "old-vm".to_string(),
            mci_id: "old-mci".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

    let mut req = single_vm_req("m1", "v", 1);
    req.vm[0].common_spec = GCP_SPEC.to_string();
    req.risk_gating = true;

    let err = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap_err();
    match err {
        MciError::Validation(message) => {
            assert!(message.contains("high provisioning failure risk"), "{message}");
        }
        other => panic!("expected validation error, got {other}"),
    }
    // Nothing was written.
    assert!(h.kv.get(&keys::mci_key(NS, "m1")).unwrap().is_none());

    // Opting out of the gate lets the request through.
    req.risk_gating = false;
    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn duplicate_mci_name_is_rejected() {
    let h = harness();
    let req = single_vm_req("m1", "v", 1);
    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap_err();
    assert!(matches!(err, MciError::Precondition(_)));
}

#[tokio::test(start_paused = true)]
async fn unknown_spec_is_rejected_before_any_write() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 1);
    req.vm[0].common_spec = "azure-nope".to_string();

    let err = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap_err();
    assert!(matches!(err, MciError::Validation(_)));
    assert!(h.kv.get(&keys::mci_key(NS, "m1")).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shared_resource_failure_rolls_back_created_resources() {
    let h = harness();
    use skymesh_spider::fake::FakeOp;
    h.spider.fail_op(FakeOp::CreateKeyPair, "", 403, "quota");

    let req = single_vm_req("m1", "v", 1);
    let err = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap_err();
    match err {
        MciError::SharedResource(message) => {
            assert!(message.contains("rolled back"), "{message}");
        }
        other => panic!("expected shared-resource error, got {other}"),
    }

    // Everything the call created was rolled back: no resource records,
    // no CSP-side leftovers.
    assert!(h.kv.list(&format!("/ns/{NS}/resources/")).unwrap().is_empty());
    assert!(h.spider.resource_names().is_empty());

    // The MCI shell survives in Failed state for inspection.
    let mci: MciRecord = h.kv.get_json(&keys::mci_key(NS, "m1")).unwrap().unwrap();
    assert_eq!(mci.status, "Failed");
}

#[tokio::test(start_paused = true)]
async fn multi_connection_mci_prepares_resources_per_connection() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 1);
    req.vm.push(VmDynamicReq {
        name: "w".to_string(),
        common_spec: GCP_SPEC.to_string(),
        common_image: IMAGE.to_string(),
        connection: None,
        sub_group_size: 2,
        root_disk_type: String::new(),
        root_disk_size: String::new(),
        vm_user_password: String::new(),
        description: String::new(),
        label: Default::default(),
    });

    let view = h
        .orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();
    assert_eq!(view.vms.len(), 3);
    assert!(view.mci.status.starts_with("Running:3 (R:3/3)"));

    // Referential integrity: every VM's spec resolves and every
    // back-reference names this VM's key.
    for vm in &view.vms {
        h.catalog.get_spec(NS, &vm.spec_id).unwrap();
        let vm_key = keys::vm_key(NS, "m1", &vm.id);
        for (kind, id) in [
            (ResourceKind::VNet, &vm.v_net_id),
            (ResourceKind::SshKey, &vm.ssh_key_id),
            (ResourceKind::SecurityGroup, &vm.security_group_ids[0]),
        ] {
            let record: SharedResourceRecord = h
                .kv
                .get_json(&keys::resource_key(NS, kind, id))
                .unwrap()
                .unwrap();
            assert!(record.associated.contains(&vm_key), "{kind} for {}", vm.id);
        }
    }

    // Both connections got their own shared resources.
    for conn in [AWS_CONN, GCP_CONN] {
        let shared = shared_resource_id(NS, conn);
        assert!(h
            .kv
            .get(&keys::resource_key(NS, ResourceKind::VNet, &shared))
            .unwrap()
            .is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn mci_record_encoding_is_stable() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 1);
    req.description = "demo deployment".to_string();
    req.label.insert("env".to_string(), "test".to_string());
    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    let raw = h.kv.get(&keys::mci_key(NS, "m1")).unwrap().unwrap();
    let decoded: MciRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(serde_json::to_string(&decoded).unwrap(), raw);
    assert_eq!(decoded.description, "demo deployment");
    assert_eq!(decoded.label.get("env").map(String::as_str), Some("test"));
}

#[tokio::test(start_paused = true)]
async fn failures_are_recorded_in_history() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 3);
    req.policy_on_partial_failure = PartialFailurePolicy::Continue;
    h.spider.fail_vm_create_call(2);

    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    let log = h
        .orchestrator
        .history()
        .get_log(AWS_SPEC)
        .unwrap()
        .expect("provisioning log written");
    assert_eq!(log.failure_count, 1);
    assert!(log.failure_messages[0].contains("capacity"));
    assert_eq!(log.failure_images, vec![IMAGE.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn vm_listing_is_ordered_by_key() {
    let h = harness();
    let req = single_vm_req("m1", "v", 3);
    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    let ids = h.orchestrator.list_vm_ids(NS, "m1").unwrap();
    assert_eq!(ids, vec!["v-1", "v-2", "v-3"]);

    let by_group = h
        .orchestrator
        .list_vm_by_sub_group(NS, "m1", "v")
        .unwrap();
    assert_eq!(by_group.len(), 3);

    let by_status = h
        .orchestrator
        .list_vm_by_filter(NS, "m1", "status", "Running")
        .unwrap();
    assert_eq!(by_status.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn force_delete_is_an_option_for_unhealthy_mcis() {
    let h = harness();
    let mut req = single_vm_req("m1", "v", 2);
    req.policy_on_partial_failure = PartialFailurePolicy::Continue;
    h.spider.fail_vm_create_call(1);
    h.spider.fail_vm_create_call(2);

    h.orchestrator
        .create_mci_dynamic(NS, &req, DeployOption::Create)
        .await
        .unwrap();

    // Both VMs failed, so the standard guard permits deletion.
    h.orchestrator
        .del_mci(NS, "m1", DeleteOption::Standard)
        .await
        .unwrap();
    assert!(h.kv.get(&keys::mci_key(NS, "m1")).unwrap().is_none());
}
