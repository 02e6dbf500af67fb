//! Post-create hook interfaces.
//!
//! Monitoring-agent installation and remote command execution are
//! external collaborators; the orchestrator only knows these
//! interfaces. The no-op implementations are the defaults and what the
//! tests run with.

use async_trait::async_trait;

use skymesh_state::PostCommand;

/// Monitoring-agent installer hook.
#[async_trait]
pub trait MonitoringHooks: Send + Sync {
    /// Whether the monitoring endpoint is reachable. When it is not,
    /// agent installation is skipped without waiting.
    async fn endpoint_healthy(&self) -> bool;

    /// Install agents on every VM of the MCI.
    async fn install_agents(&self, ns: &str, mci_id: &str) -> Result<String, String>;
}

/// Remote command runner hook.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the post-deployment commands on every VM, returning one
    /// output per VM.
    async fn run(
        &self,
        ns: &str,
        mci_id: &str,
        command: &PostCommand,
    ) -> Result<Vec<String>, String>;
}

/// Default monitoring hook: endpoint never healthy, installation
/// skipped.
pub struct NoopMonitoring;

#[async_trait]
impl MonitoringHooks for NoopMonitoring {
    async fn endpoint_healthy(&self) -> bool {
        false
    }

    async fn install_agents(&self, _ns: &str, _mci_id: &str) -> Result<String, String> {
        Ok("skipped".to_string())
    }
}

/// Default command runner: runs nothing.
pub struct NoopCommandRunner;

#[async_trait]
impl CommandRunner for NoopCommandRunner {
    async fn run(
        &self,
        _ns: &str,
        _mci_id: &str,
        _command: &PostCommand,
    ) -> Result<Vec<String>, String> {
        Ok(Vec::new())
    }
}
