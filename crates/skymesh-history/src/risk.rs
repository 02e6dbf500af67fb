//! Risk analysis over a provisioning log.
//!
//! [`analyze`] is a pure function of the stored log and the candidate
//! image: identical logs produce identical verdicts.

use serde::{Deserialize, Serialize};

use skymesh_state::ProvisioningLog;

/// Ordered risk level; `Ord` makes "overall = max(spec, image)" direct.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Which side of the (spec, image) pair dominates the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskFactor {
    Spec,
    Image,
    Combination,
    None,
}

/// Spec-level verdict with the numbers it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecRisk {
    pub level: RiskLevel,
    pub message: String,
    pub failed_image_count: usize,
    pub succeeded_image_count: usize,
    pub total_failures: u32,
    pub total_successes: u32,
    pub failure_rate: f64,
}

/// Verdict for this exact spec+image combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRisk {
    pub level: RiskLevel,
    pub message: String,
    pub has_failed_with_spec: bool,
    pub has_succeeded_with_spec: bool,
    pub is_new_combination: bool,
}

/// Combined verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallRisk {
    pub level: RiskLevel,
    pub message: String,
    pub primary_risk_factor: RiskFactor,
}

/// Full analysis handed to the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub spec_risk: SpecRisk,
    pub image_risk: ImageRisk,
    pub overall_risk: OverallRisk,
    pub recommendations: Vec<String>,
}

/// Analyze the risk of provisioning `csp_image_name` on the spec the
/// log belongs to. `None` means no history, which reads as low risk.
pub fn analyze(log: Option<&ProvisioningLog>, csp_image_name: &str) -> RiskAnalysis {
    let Some(log) = log else {
        return no_history();
    };
    let total_attempts = log.failure_count + log.success_count;
    if total_attempts == 0 {
        return no_history();
    }

    let failure_rate = f64::from(log.failure_count) / f64::from(total_attempts);
    let has_failed = log.failure_images.iter().any(|i| i == csp_image_name);
    let has_succeeded = log.success_images.iter().any(|i| i == csp_image_name);
    let is_new = !has_failed && !has_succeeded;

    let spec_risk = spec_risk(
        log.failure_images.len(),
        log.success_images.len(),
        log.failure_count,
        log.success_count,
        failure_rate,
    );
    let image_risk = image_risk(has_failed, has_succeeded, is_new, csp_image_name);
    let overall = overall_risk(&spec_risk, &image_risk);
    let recommendations = recommendations(&spec_risk, &image_risk, &overall);

    RiskAnalysis {
        spec_risk,
        image_risk,
        overall_risk: overall,
        recommendations,
    }
}

fn no_history() -> RiskAnalysis {
    RiskAnalysis {
        spec_risk: SpecRisk {
            level: RiskLevel::Low,
            message: "No previous provisioning history available for this spec"
                .to_string(),
            failed_image_count: 0,
            succeeded_image_count: 0,
            total_failures: 0,
            total_successes: 0,
            failure_rate: 0.0,
        },
        image_risk: ImageRisk {
            level: RiskLevel::Low,
            message: "No previous history for this image with this spec".to_string(),
            has_failed_with_spec: false,
            has_succeeded_with_spec: false,
            is_new_combination: true,
        },
        overall_risk: OverallRisk {
            level: RiskLevel::Low,
            message: "No previous provisioning history available".to_string(),
            primary_risk_factor: RiskFactor::None,
        },
        recommendations: vec![
            "This is a new configuration, monitor the deployment closely".to_string(),
        ],
    }
}

fn spec_risk(
    failed_images: usize,
    succeeded_images: usize,
    failures: u32,
    successes: u32,
    failure_rate: f64,
) -> SpecRisk {
    let (level, message) = if failed_images >= 10 || failure_rate >= 0.8 {
        (
            RiskLevel::High,
            format!(
                "{failed_images} different image(s) have failed with this spec \
                 ({:.1}% failure rate), the spec itself may be problematic",
                failure_rate * 100.0
            ),
        )
    } else if failed_images >= 5
        || (failed_images >= 3 && succeeded_images == 0)
        || failure_rate >= 0.5
    {
        (
            RiskLevel::Medium,
            format!(
                "{failed_images} different image(s) have failed with this spec \
                 ({:.1}% failure rate), check spec compatibility",
                failure_rate * 100.0
            ),
        )
    } else if failures > 0 {
        (
            RiskLevel::Low,
            format!(
                "Low failure rate ({:.1}%) for this spec, mostly successful",
                failure_rate * 100.0
            ),
        )
    } else {
        (
            RiskLevel::Low,
            "No failures recorded for this spec, appears stable".to_string(),
        )
    };

    SpecRisk {
        level,
        message,
        failed_image_count: failed_images,
        succeeded_image_count: succeeded_images,
        total_failures: failures,
        total_successes: successes,
        failure_rate,
    }
}

fn image_risk(
    has_failed: bool,
    has_succeeded: bool,
    is_new: bool,
    csp_image_name: &str,
) -> ImageRisk {
    let (level, message) = if has_failed && !has_succeeded {
        (
            RiskLevel::High,
            format!(
                "This exact spec+image combination ({csp_image_name}) has failed \
                 before and never succeeded"
            ),
        )
    } else if has_failed {
        (
            RiskLevel::High,
            format!(
                "This exact spec+image combination ({csp_image_name}) has failed \
                 at least once before, despite some successes"
            ),
        )
    } else if has_succeeded {
        (
            RiskLevel::Low,
            format!(
                "This exact spec+image combination ({csp_image_name}) has \
                 previously succeeded and never failed"
            ),
        )
    } else {
        (
            RiskLevel::Low,
            format!(
                "This exact spec+image combination ({csp_image_name}) has never \
                 been tried before"
            ),
        )
    };

    ImageRisk {
        level,
        message,
        has_failed_with_spec: has_failed,
        has_succeeded_with_spec: has_succeeded,
        is_new_combination: is_new,
    }
}

fn overall_risk(spec: &SpecRisk, image: &ImageRisk) -> OverallRisk {
    let level = spec.level.max(image.level);

    // Primary factor: whichever side dominates. A direct failure of this
    // exact combination outweighs equally-ranked spec statistics; a new
    // image on a troubled spec is a combination concern.
    let (primary, message) = if spec.level == RiskLevel::Low
        && image.level == RiskLevel::Low
    {
        (
            RiskFactor::None,
            "Both spec and image appear safe based on historical data".to_string(),
        )
    } else if image.is_new_combination && spec.level > RiskLevel::Low {
        (
            RiskFactor::Combination,
            format!(
                "New image combination with a spec that has shown issues: {}",
                spec.message
            ),
        )
    } else if image.has_failed_with_spec && image.level >= spec.level {
        (
            RiskFactor::Image,
            format!("Primary risk is image-related: {}", image.message),
        )
    } else if spec.level >= image.level {
        (
            RiskFactor::Spec,
            format!("Primary risk is spec-related: {}", spec.message),
        )
    } else {
        (
            RiskFactor::Image,
            format!("Primary risk is image-related: {}", image.message),
        )
    };

    OverallRisk {
        level,
        message,
        primary_risk_factor: primary,
    }
}

fn recommendations(
    spec: &SpecRisk,
    image: &ImageRisk,
    overall: &OverallRisk,
) -> Vec<String> {
    let mut out = Vec::new();

    match overall.primary_risk_factor {
        RiskFactor::Spec => {
            if spec.level == RiskLevel::High {
                out.push("Consider changing to a different VM specification".to_string());
                out.push(
                    "Check that this spec is available and properly configured in the \
                     target region"
                        .to_string(),
                );
            } else if spec.level == RiskLevel::Medium {
                out.push(
                    "Monitor the deployment closely, this spec has shown some issues"
                        .to_string(),
                );
                out.push("Consider having a backup spec ready".to_string());
            }
        }
        RiskFactor::Image => {
            if image.level == RiskLevel::High {
                if !image.has_succeeded_with_spec {
                    out.push(
                        "This exact spec+image combination has failed before and \
                         never succeeded"
                            .to_string(),
                    );
                }
                out.push("Strongly recommend using a different image".to_string());
                out.push(
                    "Find alternative images with the same OS and application \
                     requirements"
                        .to_string(),
                );
            }
        }
        RiskFactor::Combination => {
            out.push("This is a new spec+image combination".to_string());
            out.push(
                "Monitor closely, there is no historical data for this combination"
                    .to_string(),
            );
            if spec.level > RiskLevel::Low {
                out.push(
                    "This spec has shown issues with other images".to_string(),
                );
            }
        }
        RiskFactor::None => {
            out.push(
                "Both spec and image appear safe based on historical data".to_string(),
            );
            out.push("Continue with standard monitoring".to_string());
        }
    }

    if image.has_failed_with_spec && overall.primary_risk_factor != RiskFactor::Image {
        out.push(
            "This exact spec+image combination has failure history, high caution \
             advised"
                .to_string(),
        );
    }

    match overall.level {
        RiskLevel::High => {
            out.push(
                "High-risk deployment, consider testing in a development environment \
                 first"
                    .to_string(),
            );
            out.push("Ensure rollback plans and monitoring are in place".to_string());
        }
        RiskLevel::Medium => {
            out.push(
                "Medium risk, ensure proper monitoring and rollback plans are in place"
                    .to_string(),
            );
        }
        RiskLevel::Low => {}
    }

    out
}
