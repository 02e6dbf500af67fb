//! Typed client for the Spider CSP-abstraction service.
//!
//! Spider is the only CSP touchpoint: every vNet, key, security group,
//! VM, disk, and cluster operation goes through its REST API. The
//! [`api::CspApi`] trait is the seam the orchestrators program against;
//! [`client::SpiderClient`] is the real HTTP implementation and
//! [`fake::FakeSpider`] the in-memory one used by tests.

pub mod api;
pub mod client;
pub mod error;
pub mod fake;
pub mod types;

pub use api::{CspApi, VmControlAction};
pub use client::SpiderClient;
pub use error::{SpiderError, SpiderResult};

/// Derive the CSP-side name for a logical resource. All names sent to a
/// CSP carry the connection as a prefix to avoid collisions between
/// connections sharing an account.
pub fn csp_resource_name(connection: &str, logical_name: &str) -> String {
    format!("{connection}-{logical_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csp_names_carry_the_connection_prefix() {
        assert_eq!(
            csp_resource_name("aws-ap-northeast-2", "c0a1b2c3d4e5f"),
            "aws-ap-northeast-2-c0a1b2c3d4e5f"
        );
    }
}
