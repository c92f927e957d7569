//! Gateway and notification sink that only pretend
//!
//! Used by `stackflow up` so a stack can be exercised end to end without
//! touching a real control plane. Physical IDs are fabricated per kind.

use async_trait::async_trait;
use stackflow_cloud::{
    NotificationSink, ProviderGateway, ProvisionRequest, Readiness, ResourceKind, Result,
};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DryRunGateway {
    counter: AtomicU64,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn fabricate_id(request: &ProvisionRequest, n: u64) -> String {
    match request.kind {
        ResourceKind::Bucket => request
            .param_str("bucket_name")
            .map(|bucket| format!("arn:aws:s3:::{bucket}"))
            .unwrap_or_else(|| format!("arn:aws:s3:::{}", request.name)),
        ResourceKind::Instance => format!("i-{n:017x}"),
        ResourceKind::LoadBalancer => {
            format!("arn:aws:elasticloadbalancing:dry-run:loadbalancer/app/{}/{n:016x}", request.name)
        }
        ResourceKind::TargetGroup => {
            format!("arn:aws:elasticloadbalancing:dry-run:targetgroup/{}/{n:016x}", request.name)
        }
        ResourceKind::Listener => {
            format!("arn:aws:elasticloadbalancing:dry-run:listener/app/{}/{n:016x}", request.name)
        }
        ResourceKind::LaunchTemplate => format!("lt-{n:017x}"),
        ResourceKind::ScalingGroup => request.name.clone(),
        ResourceKind::ScalingPolicy => format!("arn:aws:autoscaling:dry-run:scalingPolicy/{}", request.name),
        ResourceKind::Topic => request
            .param_str("topic_name")
            .map(|topic| format!("arn:aws:sns:dry-run:{topic}"))
            .unwrap_or_else(|| format!("arn:aws:sns:dry-run:{}", request.name)),
        ResourceKind::Subscription => format!("arn:aws:sns:dry-run:{}:{n}", request.name),
    }
}

#[async_trait]
impl ProviderGateway for DryRunGateway {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<String> {
        let id = fabricate_id(request, self.next_id());
        tracing::info!(resource = %request.name, kind = %request.kind, physical_id = %id, "dry-run: create");
        Ok(id)
    }

    async fn describe(&self, _kind: ResourceKind, _physical_id: &str) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn delete(&self, kind: ResourceKind, physical_id: &str) -> Result<()> {
        tracing::info!(%kind, physical_id, "dry-run: delete");
        Ok(())
    }
}

/// Logs events instead of delivering them
#[derive(Debug, Default)]
pub struct DryRunSink {
    counter: AtomicU64,
}

#[async_trait]
impl NotificationSink for DryRunSink {
    async fn publish(&self, topic_id: &str, message: &str) -> Result<()> {
        tracing::info!(topic = topic_id, message, "dry-run: publish");
        Ok(())
    }

    async fn subscribe(&self, topic_id: &str, protocol: &str, endpoint: &str) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(topic = topic_id, protocol, endpoint, "dry-run: subscribe");
        Ok(format!("{topic_id}:{n:08x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(kind: ResourceKind, name: &str, params: serde_json::Value) -> ProvisionRequest {
        let parameters = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        ProvisionRequest {
            kind,
            name: name.into(),
            parameters,
            dependencies: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_ids_follow_kind_conventions() {
        let gateway = DryRunGateway::new();

        let bucket = request(ResourceKind::Bucket, "assets", json!({"bucket_name": "my-assets"}));
        assert_eq!(gateway.create(&bucket).await.unwrap(), "arn:aws:s3:::my-assets");

        let instance = request(ResourceKind::Instance, "server", json!({}));
        let id = gateway.create(&instance).await.unwrap();
        assert!(id.starts_with("i-"));
        assert_eq!(id.len(), 19);

        let topic = request(ResourceKind::Topic, "health", json!({"topic_name": "HealthIssuesTopic"}));
        assert_eq!(
            gateway.create(&topic).await.unwrap(),
            "arn:aws:sns:dry-run:HealthIssuesTopic"
        );
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let gateway = DryRunGateway::new();
        let first = gateway
            .create(&request(ResourceKind::Instance, "a", json!({})))
            .await
            .unwrap();
        let second = gateway
            .create(&request(ResourceKind::Instance, "b", json!({})))
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_everything_is_ready_and_deletable() {
        let gateway = DryRunGateway::new();
        assert_eq!(
            gateway.describe(ResourceKind::LoadBalancer, "arn").await.unwrap(),
            Readiness::Ready
        );
        assert!(gateway.delete(ResourceKind::LoadBalancer, "arn").await.is_ok());
    }
}
