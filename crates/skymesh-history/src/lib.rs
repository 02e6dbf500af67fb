//! Provisioning history and risk analysis.
//!
//! Every VM provisioning outcome is folded into a durable per-spec log;
//! the analyzer derives spec-level and spec+image-level risk verdicts
//! from that log alone, so identical logs always produce identical
//! verdicts.

pub mod log;
pub mod risk;

pub use log::{HistoryStore, ProvisioningEvent};
pub use risk::{
    analyze, ImageRisk, OverallRisk, RiskAnalysis, RiskFactor, RiskLevel, SpecRisk,
};
