//! Notification binder
//!
//! Topics and subscriptions are ordinary descriptors; nothing here changes
//! how they are scheduled. The binder only works out which resources each
//! topic observes and publishes their lifecycle events once a run is over.

use crate::descriptor::ResourceKind;
use crate::error::Result;
use crate::gateway::{NotificationSink, ProviderGateway, ProvisionRequest, Readiness};
use crate::graph::DependencyGraph;
use crate::ledger::{ResourceStatus, RunLedger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const DEFAULT_PROTOCOL: &str = "lambda";

/// Lifecycle event delivered to a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub resource: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of publishing a run's events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
}

/// Topic -> observed resources, derived from the graph
#[derive(Debug, Clone, Default)]
pub struct NotificationBinder {
    observers: BTreeMap<String, BTreeSet<String>>,
}

impl NotificationBinder {
    /// A topic observes its own explicit `depends_on` plus that of every
    /// subscription bound to it.
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let mut observers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for topic in graph.descriptors().by_kind(ResourceKind::Topic) {
            observers
                .entry(topic.name.clone())
                .or_default()
                .extend(topic.depends_on.iter().cloned());
        }
        for subscription in graph.descriptors().by_kind(ResourceKind::Subscription) {
            let Some(topic) = subscription.get_param::<String>("topic") else {
                continue;
            };
            let observed = observers.entry(topic.clone()).or_default();
            observed.extend(
                subscription
                    .depends_on
                    .iter()
                    .filter(|name| **name != topic)
                    .cloned(),
            );
        }
        Self { observers }
    }

    /// Topics observing `resource`
    pub fn topics_for(&self, resource: &str) -> Vec<&str> {
        self.observers
            .iter()
            .filter(|(_, observed)| observed.contains(resource))
            .map(|(topic, _)| topic.as_str())
            .collect()
    }

    pub fn observed_by(&self, topic: &str) -> impl Iterator<Item = &String> {
        self.observers.get(topic).into_iter().flatten()
    }

    /// Events produced by the current run, keyed by the topic's physical ID.
    ///
    /// Only resources that reached Ready or Failed during this run produce an
    /// event, and only topics that are Ready can receive one.
    pub fn pending_events(
        &self,
        graph: &DependencyGraph,
        ledger: &RunLedger,
    ) -> Vec<(String, LifecycleEvent)> {
        let mut events = Vec::new();
        for (topic, observed) in &self.observers {
            let Some(topic_id) = ledger
                .get(topic)
                .filter(|s| s.status == ResourceStatus::Ready)
                .and_then(|s| s.physical_id.clone())
            else {
                continue;
            };

            for resource in observed {
                let (Some(descriptor), Some(state)) = (graph.descriptor(resource), ledger.get(resource))
                else {
                    continue;
                };
                let settled_this_run = ledger.transitions(resource).iter().any(|t| {
                    t.run == ledger.run
                        && matches!(t.status, ResourceStatus::Ready | ResourceStatus::Failed)
                });
                if !settled_this_run {
                    continue;
                }
                events.push((
                    topic_id.clone(),
                    LifecycleEvent {
                        resource: resource.clone(),
                        kind: descriptor.kind,
                        status: state.status,
                        physical_id: state.physical_id.clone(),
                        error: state.last_error.clone(),
                    },
                ));
            }
        }
        events
    }

    /// Publish this run's events; failures are logged and counted, never raised
    pub async fn publish(
        &self,
        graph: &DependencyGraph,
        ledger: &RunLedger,
        sink: &dyn NotificationSink,
    ) -> PublishSummary {
        let mut summary = PublishSummary::default();
        for (topic_id, event) in self.pending_events(graph, ledger) {
            let message = match serde_json::to_string(&event) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(resource = %event.resource, error = %e, "Failed to encode event");
                    summary.failed += 1;
                    continue;
                }
            };
            match sink.publish(&topic_id, &message).await {
                Ok(()) => {
                    tracing::debug!(topic = %topic_id, resource = %event.resource, "Published lifecycle event");
                    summary.published += 1;
                }
                Err(e) => {
                    tracing::warn!(topic = %topic_id, resource = %event.resource, error = %e, "Failed to publish lifecycle event");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Gateway adapter that creates subscriptions through a [`NotificationSink`]
/// and forwards every other kind to the inner gateway.
pub struct SinkRoutedGateway {
    inner: Arc<dyn ProviderGateway>,
    sink: Arc<dyn NotificationSink>,
}

impl SinkRoutedGateway {
    pub fn new(inner: Arc<dyn ProviderGateway>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl ProviderGateway for SinkRoutedGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<String> {
        if request.kind != ResourceKind::Subscription {
            return self.inner.create(request).await;
        }
        // `topic` already carries the topic's physical ID at this point
        let topic_id = request.param_str("topic").unwrap_or_default();
        let endpoint = request.param_str("endpoint").unwrap_or_default();
        let protocol = request.param_str("protocol").unwrap_or(DEFAULT_PROTOCOL);
        self.sink.subscribe(topic_id, protocol, endpoint).await
    }

    async fn describe(&self, kind: ResourceKind, physical_id: &str) -> Result<Readiness> {
        self.inner.describe(kind, physical_id).await
    }

    async fn delete(&self, kind: ResourceKind, physical_id: &str) -> Result<()> {
        self.inner.delete(kind, physical_id).await
    }
}
