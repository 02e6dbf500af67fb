//! Review report types.

use serde::{Deserialize, Serialize};

use skymesh_history::RiskAnalysis;
use skymesh_state::PartialFailurePolicy;

/// Verdict for a single VM or the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Ready,
    Warning,
    Error,
}

/// Availability verdict for one referenced resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceValidation {
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: String,
    pub is_available: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub csp_resource_id: String,
}

/// Per-VM (per sub-group) review verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmReview {
    pub vm_name: String,
    pub sub_group_size: u32,
    pub can_create: bool,
    pub status: ReviewStatus,
    pub message: String,
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub connection: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub estimated_cost: String,
    pub spec_validation: ResourceValidation,
    pub image_validation: ResourceValidation,
    #[serde(default)]
    pub risk: Option<RiskAnalysis>,
}

impl VmReview {
    /// Parse the per-VM hourly cost out of the `$N.NNNN/hour` estimate.
    pub fn cost_per_vm(&self) -> Option<f64> {
        let rest = self.estimated_cost.strip_prefix('$')?;
        let (value, _) = rest.split_once('/')?;
        value.parse().ok()
    }
}

/// Aggregated resource footprint of the request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub unique_specs: Vec<String>,
    pub unique_images: Vec<String>,
    pub connection_names: Vec<String>,
    pub provider_names: Vec<String>,
    pub region_names: Vec<String>,
    pub total_providers: usize,
    pub total_regions: usize,
    pub available_specs: u32,
    pub unavailable_specs: u32,
    pub available_images: u32,
    pub unavailable_images: u32,
}

/// Full pre-flight report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub mci_name: String,
    pub total_vm_count: u32,
    pub creation_viable: bool,
    pub overall_status: ReviewStatus,
    pub overall_message: String,
    #[serde(default)]
    pub estimated_cost: String,
    pub vm_reviews: Vec<VmReview>,
    pub resource_summary: ResourceSummary,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub policy_on_partial_failure: PartialFailurePolicy,
    #[serde(default)]
    pub policy_description: String,
    #[serde(default)]
    pub policy_recommendation: String,
}
