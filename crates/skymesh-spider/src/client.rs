//! SpiderClient — the HTTP implementation of [`CspApi`].
//!
//! Every call carries a tier-appropriate timeout: short for status
//! reads, medium for resource creation, long for VM/cluster creation.
//! Non-2xx responses surface their body verbatim; only `GET /vmstatus`
//! retries, and only on empty-status bodies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{CspApi, VmControlAction};
use crate::error::{SpiderError, SpiderResult};
use crate::types::*;

/// Timeout tier for a Spider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Status reads: ≤60s.
    Short,
    /// Resource create/attach: ≤5m.
    Medium,
    /// VM/cluster create: ≤20m.
    Long,
}

impl Tier {
    fn duration(&self) -> Duration {
        match self {
            Tier::Short => Duration::from_secs(60),
            Tier::Medium => Duration::from_secs(5 * 60),
            Tier::Long => Duration::from_secs(20 * 60),
        }
    }
}

/// Empty-status retries for `GET /vmstatus`.
const STATUS_RETRIES: usize = 2;
/// Back-off between status retries.
const STATUS_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Typed client for the Spider REST API.
#[derive(Clone)]
pub struct SpiderClient {
    http: reqwest::Client,
    base_url: String,
}

impl SpiderClient {
    /// Build a client against the given base URL
    /// (e.g. `http://localhost:1024/spider`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        tier: Tier,
    ) -> SpiderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "spider call");

        let mut request = self
            .http
            .request(method, &url)
            .timeout(tier.duration());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), "spider call failed");
            return Err(SpiderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SpiderError::Decode(e.to_string()))
    }

    /// Fire-and-check variant for endpoints whose body we discard.
    async fn call_unit<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        tier: Tier,
    ) -> SpiderResult<()>
    where
        B: Serialize + ?Sized,
    {
        let _: serde_json::Value = self.call(method, path, body, tier).await?;
        Ok(())
    }
}

#[async_trait]
impl CspApi for SpiderClient {
    async fn lookup_spec(
        &self,
        connection: &str,
        csp_spec_name: &str,
    ) -> SpiderResult<VmSpecLookup> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call(
            Method::GET,
            &format!("/vmspec/{csp_spec_name}"),
            Some(&body),
            Tier::Short,
        )
        .await
    }

    async fn lookup_image(
        &self,
        connection: &str,
        csp_image_name: &str,
    ) -> SpiderResult<VmImageLookup> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call(
            Method::GET,
            &format!("/vmimage/{csp_image_name}"),
            Some(&body),
            Tier::Short,
        )
        .await
    }

    async fn create_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo> {
        self.call(Method::POST, "/vpc", Some(req), Tier::Medium).await
    }

    async fn get_vpc(&self, connection: &str, name: &str) -> SpiderResult<VpcInfo> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call(Method::GET, &format!("/vpc/{name}"), Some(&body), Tier::Short)
            .await
    }

    async fn register_vpc(&self, req: &VpcCreateReq) -> SpiderResult<VpcInfo> {
        self.call(Method::POST, "/regvpc", Some(req), Tier::Medium).await
    }

    async fn create_subnet(&self, req: &SubnetAddReq) -> SpiderResult<SubnetInfo> {
        self.call(Method::POST, "/subnet", Some(req), Tier::Medium).await
    }

    async fn delete_vpc(&self, connection: &str, name: &str) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(Method::DELETE, &format!("/vpc/{name}"), Some(&body), Tier::Medium)
            .await
    }

    async fn create_keypair(
        &self,
        req: &KeyPairCreateReq,
    ) -> SpiderResult<KeyPairInfo> {
        self.call(Method::POST, "/keypair", Some(req), Tier::Medium).await
    }

    async fn delete_keypair(&self, connection: &str, name: &str) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(
            Method::DELETE,
            &format!("/keypair/{name}"),
            Some(&body),
            Tier::Medium,
        )
        .await
    }

    async fn create_security_group(
        &self,
        req: &SecurityGroupCreateReq,
    ) -> SpiderResult<SecurityGroupInfo> {
        self.call(Method::POST, "/securitygroup", Some(req), Tier::Medium)
            .await
    }

    async fn add_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<SecurityGroupInfo> {
        self.call(
            Method::POST,
            &format!("/securitygroup/{name}/rules"),
            Some(req),
            Tier::Medium,
        )
        .await
    }

    async fn remove_security_group_rules(
        &self,
        name: &str,
        req: &SecurityRulesReq,
    ) -> SpiderResult<bool> {
        self.call(
            Method::DELETE,
            &format!("/securitygroup/{name}/rules"),
            Some(req),
            Tier::Medium,
        )
        .await
    }

    async fn delete_security_group(
        &self,
        connection: &str,
        name: &str,
    ) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(
            Method::DELETE,
            &format!("/securitygroup/{name}"),
            Some(&body),
            Tier::Medium,
        )
        .await
    }

    async fn create_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo> {
        self.call(Method::POST, "/vm", Some(req), Tier::Long).await
    }

    async fn register_vm(&self, req: &VmCreateReq) -> SpiderResult<SpiderVmInfo> {
        self.call(Method::POST, "/regvm", Some(req), Tier::Long).await
    }

    async fn get_vm(&self, connection: &str, name: &str) -> SpiderResult<SpiderVmInfo> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call(Method::GET, &format!("/vm/{name}"), Some(&body), Tier::Short)
            .await
    }

    async fn get_vm_status(
        &self,
        connection: &str,
        name: &str,
    ) -> SpiderResult<VmStatusInfo> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        // Spider occasionally answers with an empty status right after a
        // lifecycle transition; retry a bounded number of times.
        let mut last = VmStatusInfo::default();
        for attempt in 0..=STATUS_RETRIES {
            last = self
                .call(
                    Method::GET,
                    &format!("/vmstatus/{name}"),
                    Some(&body),
                    Tier::Short,
                )
                .await?;
            if !last.status.is_empty() {
                return Ok(last);
            }
            if attempt < STATUS_RETRIES {
                debug!(%name, attempt, "empty vm status, retrying");
                tokio::time::sleep(STATUS_RETRY_BACKOFF).await;
            }
        }
        Ok(last)
    }

    async fn control_vm(
        &self,
        connection: &str,
        name: &str,
        action: VmControlAction,
    ) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(
            Method::GET,
            &format!("/controlvm/{name}?action={}", action.as_query()),
            Some(&body),
            Tier::Medium,
        )
        .await
    }

    async fn terminate_vm(&self, connection: &str, name: &str) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(Method::DELETE, &format!("/vm/{name}"), Some(&body), Tier::Medium)
            .await
    }

    async fn create_disk(&self, req: &DiskCreateReq) -> SpiderResult<DiskInfo> {
        self.call(Method::POST, "/disk", Some(req), Tier::Medium).await
    }

    async fn attach_disk(
        &self,
        name: &str,
        req: &DiskAttachDetachReq,
    ) -> SpiderResult<DiskInfo> {
        self.call(
            Method::PUT,
            &format!("/disk/{name}/attach"),
            Some(req),
            Tier::Medium,
        )
        .await
    }

    async fn detach_disk(
        &self,
        name: &str,
        req: &DiskAttachDetachReq,
    ) -> SpiderResult<bool> {
        self.call(
            Method::PUT,
            &format!("/disk/{name}/detach"),
            Some(req),
            Tier::Medium,
        )
        .await
    }

    async fn create_cluster(
        &self,
        req: &ClusterCreateReq,
    ) -> SpiderResult<ClusterInfo> {
        self.call(Method::POST, "/cluster", Some(req), Tier::Long).await
    }

    async fn add_node_group(
        &self,
        cluster: &str,
        req: &NodeGroupAddReq,
    ) -> SpiderResult<ClusterInfo> {
        self.call(
            Method::POST,
            &format!("/cluster/{cluster}/nodegroup"),
            Some(req),
            Tier::Long,
        )
        .await
    }

    async fn set_node_group_autoscaling(
        &self,
        cluster: &str,
        node_group: &str,
        req: &SetAutoscalingReq,
    ) -> SpiderResult<bool> {
        let res: SetAutoscalingRes = self
            .call(
                Method::PUT,
                &format!("/cluster/{cluster}/nodegroup/{node_group}/onautoscaling"),
                Some(req),
                Tier::Medium,
            )
            .await?;
        Ok(res.result.eq_ignore_ascii_case("true"))
    }

    async fn change_node_group_autoscale_size(
        &self,
        cluster: &str,
        node_group: &str,
        req: &ChangeAutoscaleSizeReq,
    ) -> SpiderResult<ClusterInfo> {
        self.call(
            Method::PUT,
            &format!("/cluster/{cluster}/nodegroup/{node_group}/autoscalesize"),
            Some(req),
            Tier::Medium,
        )
        .await
    }

    async fn upgrade_cluster(
        &self,
        cluster: &str,
        req: &ClusterUpgradeReq,
    ) -> SpiderResult<ClusterInfo> {
        self.call(
            Method::PUT,
            &format!("/cluster/{cluster}/upgrade"),
            Some(req),
            Tier::Long,
        )
        .await
    }

    async fn delete_cluster(&self, connection: &str, name: &str) -> SpiderResult<()> {
        let body = ConnectionReq {
            connection_name: connection.to_string(),
        };
        self.call_unit(
            Method::DELETE,
            &format!("/cluster/{name}"),
            Some(&body),
            Tier::Medium,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = SpiderClient::new("http://localhost:1024/spider/");
        assert_eq!(client.base_url, "http://localhost:1024/spider");
    }

    #[test]
    fn tier_durations() {
        assert_eq!(Tier::Short.duration(), Duration::from_secs(60));
        assert_eq!(Tier::Medium.duration(), Duration::from_secs(300));
        assert_eq!(Tier::Long.duration(), Duration::from_secs(1200));
    }

    #[test]
    fn control_action_query_spellings() {
        assert_eq!(VmControlAction::Suspend.as_query(), "suspend");
        assert_eq!(VmControlAction::Resume.as_query(), "resume");
        assert_eq!(VmControlAction::Reboot.as_query(), "reboot");
    }
}
