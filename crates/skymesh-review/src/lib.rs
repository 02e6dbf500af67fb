//! Pre-flight review of dynamic MCI requests.
//!
//! [`Reviewer::review`] inspects a request without mutating anything:
//! spec/image/connection availability, estimated cost, provisioning
//! risk, and a critique of the chosen partial-failure policy. It is the
//! gate UIs call before creation; the orchestrator re-runs the cheap
//! parts itself.

pub mod report;
pub mod reviewer;

pub use report::{
    ResourceSummary, ResourceValidation, ReviewReport, ReviewStatus, VmReview,
};
pub use reviewer::Reviewer;
