//! MCI orchestrator.
//!
//! Top-level creation and lifecycle of multi-cloud infrastructures:
//! sub-group expansion, shared-resource preparation, parallel VM
//! fan-out with pacing, partial-failure policies
//! (continue/rollback/refine), hold/withdraw handoff, status
//! derivation, actions, and deletion.

pub mod actions;
pub mod error;
pub mod filter;
pub mod hold;
pub mod hooks;
pub mod orchestrator;
pub mod status;

pub use actions::{DeleteOption, MciAction};
pub use error::{MciError, MciResult};
pub use hold::{HoldRegistry, HoldSignal};
pub use hooks::{CommandRunner, MonitoringHooks, NoopCommandRunner, NoopMonitoring};
pub use orchestrator::{DeployOption, MciOrchestrator, MciStatusView, MciView};
