//! The reviewer itself.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use skymesh_core::{for_each_bounded, names, MAX_CONCURRENCY};
use skymesh_history::{HistoryStore, RiskLevel};
use skymesh_spider::CspApi;
use skymesh_state::requests::{MciDynamicReq, VmDynamicReq};
use skymesh_state::{keys, Catalog, KvStore, PartialFailurePolicy, StateResult};

use crate::report::{
    ResourceSummary, ResourceValidation, ReviewReport, ReviewStatus, VmReview,
};

/// Cost above which the report suggests smaller instance types.
const HIGH_COST_PER_HOUR: f64 = 10.0;
/// Provider count above which consolidation is suggested.
const MANY_PROVIDERS: usize = 3;
/// Region count above which latency is flagged.
const MANY_REGIONS: usize = 5;

/// Pre-flight reviewer. Never mutates state.
#[derive(Clone)]
pub struct Reviewer {
    kv: KvStore,
    catalog: Catalog,
    csp: Arc<dyn CspApi>,
    history: HistoryStore,
}

impl Reviewer {
    pub fn new(kv: KvStore, catalog: Catalog, csp: Arc<dyn CspApi>) -> Self {
        let history = HistoryStore::new(kv.clone(), catalog.clone());
        Self {
            kv,
            catalog,
            csp,
            history,
        }
    }

    /// Review a dynamic MCI request. `hold` marks that the deployment
    /// will park for review before provisioning.
    pub async fn review(
        &self,
        ns: &str,
        req: &MciDynamicReq,
        hold: bool,
    ) -> StateResult<ReviewReport> {
        debug!(mci = %req.name, "reviewing dynamic request");

        let total_vm_count: u32 =
            req.vm.iter().map(|vm| vm.sub_group_size.max(1)).sum();
        let mut report = ReviewReport {
            mci_name: req.name.clone(),
            total_vm_count,
            creation_viable: true,
            overall_status: ReviewStatus::Ready,
            overall_message: String::new(),
            estimated_cost: String::new(),
            vm_reviews: Vec::new(),
            resource_summary: ResourceSummary::default(),
            recommendations: Vec::new(),
            policy_on_partial_failure: req.policy_on_partial_failure,
            policy_description: String::new(),
            policy_recommendation: String::new(),
        };

        if let Err(err) = names::check_name(ns) {
            report.overall_status = ReviewStatus::Error;
            report.overall_message = format!("invalid namespace: {err}");
            report.creation_viable = false;
            return Ok(report);
        }
        if self.kv.get(&keys::mci_key(ns, &req.name))?.is_some() {
            report.overall_status = ReviewStatus::Error;
            report.overall_message =
                format!("mci '{}' already exists in namespace '{ns}'", req.name);
            report.creation_viable = false;
            return Ok(report);
        }
        if req.vm.is_empty() {
            report.overall_status = ReviewStatus::Error;
            report.overall_message = "No VM requests provided".to_string();
            report.creation_viable = false;
            return Ok(report);
        }

        // Review each sub-group in parallel; `for_each_bounded` keeps
        // the input order.
        let ns_owned = ns.to_string();
        let reviews = for_each_bounded(req.vm.clone(), MAX_CONCURRENCY, |_, vm_req| {
            let reviewer = self.clone();
            let ns = ns_owned.clone();
            async move { reviewer.review_vm(&ns, &vm_req).await }
        })
        .await;

        // Aggregate.
        let mut specs = BTreeSet::new();
        let mut images = BTreeSet::new();
        let mut connections = BTreeSet::new();
        let mut providers = BTreeSet::new();
        let mut regions = BTreeSet::new();
        let mut total_cost = 0.0_f64;
        let mut unknown_cost_vms = 0u32;
        let mut has_warnings = false;

        for (review, vm_req) in reviews.iter().zip(&req.vm) {
            if !review.can_create {
                report.creation_viable = false;
            }
            if review.status == ReviewStatus::Warning {
                has_warnings = true;
            }
            if review.spec_validation.is_available {
                report.resource_summary.available_specs += 1;
                specs.insert(vm_req.common_spec.clone());
                connections.insert(review.connection.clone());
                providers.insert(review.provider.clone());
                regions.insert(review.region.clone());
            } else {
                report.resource_summary.unavailable_specs += 1;
            }
            if review.image_validation.is_available {
                report.resource_summary.available_images += 1;
            } else {
                report.resource_summary.unavailable_images += 1;
            }
            if !vm_req.common_image.is_empty() {
                images.insert(vm_req.common_image.clone());
            }

            let group_size = f64::from(vm_req.sub_group_size.max(1));
            match review.cost_per_vm() {
                Some(cost) => total_cost += cost * group_size,
                None => unknown_cost_vms += vm_req.sub_group_size.max(1),
            }

            // Risk guidance surfaces at the report level too.
            if let Some(risk) = &review.risk {
                if risk.overall_risk.level >= RiskLevel::Medium {
                    report
                        .recommendations
                        .extend(risk.recommendations.iter().cloned());
                }
            }
        }
        report.vm_reviews = reviews;

        report.resource_summary.unique_specs = specs.into_iter().collect();
        report.resource_summary.unique_images = images.into_iter().collect();
        report.resource_summary.connection_names = connections.into_iter().collect();
        report.resource_summary.provider_names = providers.into_iter().collect();
        report.resource_summary.region_names = regions.into_iter().collect();
        report.resource_summary.total_providers =
            report.resource_summary.provider_names.len();
        report.resource_summary.total_regions =
            report.resource_summary.region_names.len();

        // Cost roll-up.
        report.estimated_cost = if total_cost > 0.0 {
            if unknown_cost_vms > 0 {
                format!(
                    "${total_cost:.4}/hour (partial - {unknown_cost_vms} VMs have \
                     unknown costs)"
                )
            } else {
                format!("${total_cost:.4}/hour")
            }
        } else if unknown_cost_vms > 0 {
            format!("Cost estimation unavailable for all {unknown_cost_vms} VMs")
        } else {
            String::new()
        };

        // Overall verdict.
        let footprint = format!(
            "(Providers: {:?}, Regions: {:?})",
            report.resource_summary.provider_names,
            report.resource_summary.region_names
        );
        if !report.creation_viable {
            report.overall_status = ReviewStatus::Error;
            report.overall_message = format!(
                "MCI cannot be created due to critical errors in VM configurations \
                 {footprint}"
            );
            report.recommendations.push(
                "Fix all VM configuration errors before attempting to create the MCI"
                    .to_string(),
            );
        } else if has_warnings {
            report.overall_status = ReviewStatus::Warning;
            report.overall_message = format!(
                "MCI can be created but has some configuration warnings {footprint}"
            );
            report.recommendations.push(
                "Review and address warnings for optimal configuration".to_string(),
            );
        } else {
            report.overall_status = ReviewStatus::Ready;
            report.overall_message =
                format!("All VMs can be created successfully {footprint}");
        }

        // Footprint/cost guidance.
        if report.resource_summary.total_providers > MANY_PROVIDERS {
            report.recommendations.push(
                "Consider consolidating to fewer cloud providers to simplify \
                 management"
                    .to_string(),
            );
        }
        if report.resource_summary.total_regions > MANY_REGIONS {
            report.recommendations.push(
                "Large number of regions may increase latency between VMs".to_string(),
            );
        }
        if total_cost > HIGH_COST_PER_HOUR {
            report.recommendations.push(
                "High estimated cost - consider smaller instance types if appropriate"
                    .to_string(),
            );
        }
        if unknown_cost_vms > 0 {
            report.recommendations.push(format!(
                "Cost estimation unavailable for {unknown_cost_vms} VMs - actual \
                 costs may be higher than shown"
            ));
        }

        self.critique_policy(&mut report);

        if hold {
            report.recommendations.push(format!(
                "Deployment hold requested: creation will pause for review; the \
                 '{}' policy applies once the deployment is continued",
                report.policy_on_partial_failure
            ));
        }

        Ok(report)
    }

    async fn review_vm(&self, ns: &str, vm_req: &VmDynamicReq) -> VmReview {
        let mut review = VmReview {
            vm_name: vm_req.name.clone(),
            sub_group_size: vm_req.sub_group_size.max(1),
            can_create: true,
            status: ReviewStatus::Ready,
            message: String::new(),
            info: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            connection: String::new(),
            provider: String::new(),
            region: String::new(),
            estimated_cost: String::new(),
            spec_validation: ResourceValidation {
                resource_id: vm_req.common_spec.clone(),
                ..ResourceValidation::default()
            },
            image_validation: ResourceValidation {
                resource_id: vm_req.common_image.clone(),
                ..ResourceValidation::default()
            },
            risk: None,
        };

        if vm_req.name.is_empty() {
            review.warnings.push(
                "VM sub-group name not specified, one will be generated".to_string(),
            );
        }
        if vm_req.sub_group_size == 0 {
            review
                .warnings
                .push("sub-group size 0 treated as 1".to_string());
        }

        // Spec: catalog first, then CSP availability.
        let spec = match self.catalog.get_spec(ns, &vm_req.common_spec) {
            Ok(spec) => spec,
            Err(err) => {
                review
                    .errors
                    .push(format!("failed to get spec '{}': {err}", vm_req.common_spec));
                review.spec_validation.message = err.to_string();
                review.can_create = false;
                return finish(review);
            }
        };
        review.connection = spec.connection.clone();
        review.provider = spec.provider.clone();
        review.region = spec.region.clone();

        match self
            .csp
            .lookup_spec(&spec.connection, &spec.csp_spec_name)
            .await
        {
            Ok(lookup) => {
                review.spec_validation.is_available = true;
                review.spec_validation.resource_name = spec.csp_spec_name.clone();
                review.spec_validation.csp_resource_id = lookup.name;
                match spec.cost_per_hour {
                    Some(cost) if cost > 0.0 => {
                        review.estimated_cost = format!("${cost:.4}/hour");
                    }
                    _ => {
                        review.estimated_cost =
                            "Cost estimation unavailable".to_string();
                    }
                }
            }
            Err(err) => {
                review.errors.push(format!(
                    "spec '{}' not available in CSP: {err}",
                    vm_req.common_spec
                ));
                review.spec_validation.resource_name = spec.csp_spec_name.clone();
                review.spec_validation.message = err.to_string();
                review.can_create = false;
            }
        }

        // Image.
        let csp_image_name = self
            .catalog
            .get_image(ns, &vm_req.common_image)
            .map(|image| image.csp_image_name)
            .unwrap_or_else(|_| vm_req.common_image.clone());
        match self.csp.lookup_image(&spec.connection, &csp_image_name).await {
            Ok(lookup) => {
                review.image_validation.is_available = true;
                review.image_validation.resource_name = csp_image_name.clone();
                review.image_validation.csp_resource_id = lookup.iid.system_id;
            }
            Err(err) => {
                review.errors.push(format!(
                    "image '{}' not available in CSP: {err}",
                    vm_req.common_image
                ));
                review.image_validation.message = err.to_string();
                review.can_create = false;
            }
        }

        // Explicit connection override.
        if let Some(connection) = &vm_req.connection {
            match self.catalog.get_connection(connection) {
                Ok(_) => review.connection = connection.clone(),
                Err(_) => review.warnings.push(format!(
                    "specified connection '{connection}' not found, the spec's \
                     default will be used"
                )),
            }
        }

        // Root disk notes.
        if !vm_req.root_disk_type.is_empty() && vm_req.root_disk_type != "default" {
            review.info.push(format!(
                "root disk type configured: {}, verify the provider supports it",
                vm_req.root_disk_type
            ));
        }
        if !vm_req.root_disk_size.is_empty() && vm_req.root_disk_size != "default" {
            review.info.push(format!(
                "root disk size configured: {} GB, verify it meets the image's \
                 minimum",
                vm_req.root_disk_size
            ));
        }

        // Provisioning history.
        match self.history.analyze(&vm_req.common_spec, &csp_image_name) {
            Ok(analysis) => {
                match analysis.overall_risk.level {
                    RiskLevel::High => {
                        review.errors.push(format!(
                            "High provisioning failure risk: {}",
                            analysis.overall_risk.message
                        ));
                        review.can_create = false;
                    }
                    RiskLevel::Medium => {
                        review.warnings.push(format!(
                            "Moderate provisioning failure risk: {}",
                            analysis.overall_risk.message
                        ));
                    }
                    RiskLevel::Low => {
                        if analysis.spec_risk.total_failures > 0 {
                            review.info.push(format!(
                                "Provisioning history: {}",
                                analysis.overall_risk.message
                            ));
                        }
                    }
                }
                review.risk = Some(analysis);
            }
            Err(err) => {
                review
                    .warnings
                    .push(format!("failed to analyze provisioning history: {err}"));
            }
        }

        finish(review)
    }

    fn critique_policy(&self, report: &mut ReviewReport) {
        let policy = report.policy_on_partial_failure;
        let many_vms = report.total_vm_count > 1;
        match policy {
            PartialFailurePolicy::Continue => {
                report.policy_description = "If some VMs fail during creation, the \
                    MCI keeps the successfully provisioned VMs; failed VMs stay in \
                    Failed state and can be cleaned up later with the refine action."
                    .to_string();
                report.recommendations.push(
                    "Failure policy 'continue': partial deployment allowed, failed \
                     VMs can be refined later"
                        .to_string(),
                );
                if many_vms {
                    report.policy_recommendation = "With multiple VMs, consider \
                        'rollback' for all-or-nothing deployment or 'refine' for \
                        automatic cleanup"
                        .to_string();
                }
            }
            PartialFailurePolicy::Rollback => {
                report.policy_description = "If any VM fails during creation the \
                    entire MCI is deleted automatically. All-or-nothing, but a \
                    single failure discards everything."
                    .to_string();
                report.recommendations.push(
                    "Failure policy 'rollback': all-or-nothing deployment, the \
                     entire MCI is deleted on any failure"
                        .to_string(),
                );
                if report.total_vm_count > 5 {
                    report.recommendations.push(
                        "With many VMs the rollback policy raises the odds of a \
                         complete deployment failure; consider 'continue' or 'refine'"
                            .to_string(),
                    );
                }
                if report.resource_summary.total_providers > 2 {
                    report.recommendations.push(
                        "Multiple cloud providers raise failure probability; a \
                         single provider issue would discard the whole deployment"
                            .to_string(),
                    );
                }
                if report.overall_status == ReviewStatus::Warning {
                    report.recommendations.push(
                        "Configuration warnings combined with the rollback policy \
                         can discard the deployment; address the warnings first"
                            .to_string(),
                    );
                }
            }
            PartialFailurePolicy::Refine => {
                report.policy_description = "If some VMs fail during creation the \
                    MCI keeps the successful ones and the failed VMs are cleaned \
                    up automatically."
                    .to_string();
                report.recommendations.push(
                    "Failure policy 'refine': failed VMs are cleaned up \
                     automatically"
                        .to_string(),
                );
                if report.total_vm_count > 10 {
                    report.policy_recommendation = "With many VMs, 'refine' \
                        balances reliability and resource efficiency"
                        .to_string();
                }
            }
        }
    }
}

fn finish(mut review: VmReview) -> VmReview {
    if !review.errors.is_empty() {
        review.status = ReviewStatus::Error;
        review.message = format!(
            "VM has {} error(s) that prevent creation",
            review.errors.len()
        );
    } else if !review.warnings.is_empty() {
        review.status = ReviewStatus::Warning;
        review.message =
            format!("VM can be created but has {} warning(s)", review.warnings.len());
    } else {
        review.status = ReviewStatus::Ready;
        review.message = "VM can be created successfully".to_string();
    }
    review
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skymesh_history::ProvisioningEvent;
    use skymesh_spider::fake::FakeSpider;
    use skymesh_state::{ConnConfig, ImageRecord, SpecRecord};

    const NS: &str = "demo";
    const SYSTEM_NS: &str = "system-ns";
    const AWS_CONN: &str = "aws-ap-northeast-2";
    const AWS_SPEC: &str = "aws-ap-northeast-2-t2-small";
    const GCP_CONN: &str = "gcp-europe-north1";
    const GCP_SPEC: &str = "gcp+europe-north1+f1-micro";
    const IMAGE: &str = "ubuntu22.04";

    struct Fixture {
        reviewer: Reviewer,
        spider: Arc<FakeSpider>,
        history: HistoryStore,
    }

    fn fixture() -> Fixture {
        let kv = KvStore::open_in_memory().unwrap();
        let catalog = Catalog::new(kv.clone(), SYSTEM_NS);
        let spider = Arc::new(FakeSpider::new());
        let history = HistoryStore::new(kv.clone(), catalog.clone());
        let reviewer = Reviewer::new(kv, catalog.clone(), spider.clone());

        for (spec_id, conn, provider, region, csp_spec, cost) in [
            (AWS_SPEC, AWS_CONN, "aws", "ap-northeast-2", "t2.small", Some(0.026)),
            (GCP_SPEC, GCP_CONN, "gcp", "europe-north1", "f1-micro", None),
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
                        cost_per_hour: cost,
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

        Fixture {
            reviewer,
            spider,
            history,
        }
    }

    fn request(spec: &str, size: u32) -> MciDynamicReq {
        MciDynamicReq {
            name: "m1".to_string(),
            vm: vec![VmDynamicReq {
                name: "v".to_string(),
                common_spec: spec.to_string(),
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
            policy_on_partial_failure: PartialFailurePolicy::Continue,
            risk_gating: true,
        }
    }

    #[tokio::test]
    async fn clean_request_is_ready() {
        let f = fixture();
        let report = f.reviewer.review(NS, &request(AWS_SPEC, 2), false).await.unwrap();

        assert_eq!(report.overall_status, ReviewStatus::Ready);
        assert!(report.creation_viable);
        assert_eq!(report.total_vm_count, 2);
        assert_eq!(report.vm_reviews.len(), 1);
        assert!(report.vm_reviews[0].spec_validation.is_available);
        assert!(report.vm_reviews[0].image_validation.is_available);
        // Two t2.small VMs.
        assert_eq!(report.estimated_cost, "$0.0520/hour");
        assert_eq!(report.resource_summary.provider_names, vec!["aws"]);
    }

    #[tokio::test]
    async fn unknown_spec_is_an_error() {
        let f = fixture();
        let report = f
            .reviewer
            .review(NS, &request("azure-nope", 1), false)
            .await
            .unwrap();

        assert_eq!(report.overall_status, ReviewStatus::Error);
        assert!(!report.creation_viable);
        assert!(!report.vm_reviews[0].spec_validation.is_available);
    }

    #[tokio::test]
    async fn unavailable_image_is_an_error() {
        let f = fixture();
        let mut req = request(AWS_SPEC, 1);
        req.vm[0].common_image = "windows2019".to_string();

        let report = f.reviewer.review(NS, &req, false).await.unwrap();
        assert!(!report.creation_viable);
        assert!(!report.vm_reviews[0].image_validation.is_available);
    }

    #[tokio::test]
    async fn failed_combination_reports_high_image_risk() {
        let f = fixture();
        // The gcp spec has failed once with this image and never
        // succeeded.
        f.history
            .record(&ProvisioningEvent {
                spec_id: GCP_SPEC.to_string(),
                csp_image_name: IMAGE.to_string(),
                is_success: false,
                error_message: "quota exceeded".to_string(),
                vm_name: "v".to_string(),
                mci_id: "old".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let report = f
            .reviewer
            .review(NS, &request(GCP_SPEC, 1), false)
            .await
            .unwrap();

        assert_eq!(report.overall_status, ReviewStatus::Error);
        assert!(!report.creation_viable);

        let risk = report.vm_reviews[0].risk.as_ref().expect("risk attached");
        assert_eq!(risk.overall_risk.level, RiskLevel::High);
        assert_eq!(
            risk.overall_risk.primary_risk_factor,
            skymesh_history::RiskFactor::Image
        );
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("different image")));
    }

    #[tokio::test]
    async fn cost_rolls_up_with_unknown_costs_called_out() {
        let f = fixture();
        let mut req = request(AWS_SPEC, 1);
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

        let report = f.reviewer.review(NS, &req, false).await.unwrap();
        assert!(report.estimated_cost.contains("partial"), "{}", report.estimated_cost);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("Cost estimation unavailable for 2 VMs")));
    }

    #[tokio::test]
    async fn rollback_policy_gets_a_critique() {
        let f = fixture();
        let mut req = request(AWS_SPEC, 6);
        req.policy_on_partial_failure = PartialFailurePolicy::Rollback;

        let report = f.reviewer.review(NS, &req, false).await.unwrap();
        assert!(report.policy_description.contains("entire MCI is deleted"));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("consider 'continue' or 'refine'")));
    }

    #[tokio::test]
    async fn review_never_mutates_state() {
        let f = fixture();
        let _ = f.reviewer.review(NS, &request(AWS_SPEC, 1), false).await.unwrap();

        // No MCI, VM, or resource records were created.
        assert!(f
            .reviewer
            .kv
            .list(&format!("/ns/{NS}/"))
            .unwrap()
            .is_empty());
        let _ = &f.spider;
    }

    #[tokio::test]
    async fn hold_note_is_added() {
        let f = fixture();
        let report = f.reviewer.review(NS, &request(AWS_SPEC, 1), true).await.unwrap();
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("Deployment hold requested")));
    }
}
