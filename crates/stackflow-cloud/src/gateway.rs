//! Provider gateway and notification sink capability traits
//!
//! The engine never talks to a concrete cloud API. It receives a
//! [`ProviderGateway`] at construction and calls the create/describe/delete
//! verbs for each resource kind through it.

use crate::descriptor::ResourceKind;
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Control-plane abstraction used by the provisioning engine
///
/// Implementations classify failures with [`CloudError::TransientProvider`],
/// [`CloudError::PermanentProvider`] or [`CloudError::Timeout`]; the engine
/// retries only the transient ones.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Returns the gateway name (e.g., "aws", "dry-run")
    fn name(&self) -> &str;

    /// Create a resource and return its provider-assigned physical ID
    async fn create(&self, request: &ProvisionRequest) -> Result<String>;

    /// Report whether an asynchronously created resource is ready
    async fn describe(&self, _kind: ResourceKind, _physical_id: &str) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    /// Delete a resource; used only by the rollback policy
    async fn delete(&self, kind: ResourceKind, physical_id: &str) -> Result<()> {
        Err(CloudError::Unsupported(format!(
            "{} gateway cannot delete {kind} '{physical_id}'",
            self.name()
        )))
    }
}

/// Notification fan-out capability
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish a message to a topic
    async fn publish(&self, topic_id: &str, message: &str) -> Result<()>;

    /// Subscribe an opaque endpoint to a topic, returning the subscription ID
    async fn subscribe(&self, topic_id: &str, protocol: &str, endpoint: &str) -> Result<String>;
}

/// Readiness as reported by the provider's describe call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Pending,
    /// The provider gave up on the resource (e.g., instance terminated)
    Failed(String),
}

/// Everything a gateway needs to create one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub kind: ResourceKind,

    /// Logical name of the descriptor
    pub name: String,

    /// Parameters with every reference replaced by the dependency's physical ID
    pub parameters: Map<String, Value>,

    /// Physical IDs of all Ready dependencies, by logical name
    pub dependencies: BTreeMap<String, String>,
}

impl ProvisionRequest {
    /// Get a parameter as a specific type
    pub fn get_param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}
