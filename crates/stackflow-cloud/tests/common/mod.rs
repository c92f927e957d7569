use async_trait::async_trait;
use serde_json::json;
use stackflow_cloud::{
    CancellationToken, CloudError, DependencyGraph, DescriptorSet, EngineConfig, NotificationSink,
    ProviderGateway, ProvisionRequest, Readiness, ResourceDescriptor, ResourceKind, Result,
    RetryConfig, WaitConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted result of one create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Describe(String),
    Delete(String),
}

/// In-memory gateway with per-resource scripted outcomes
///
/// Physical IDs are `<name>-id`. Unscripted creates succeed and unscripted
/// describes report Ready. The last scripted entry repeats forever.
#[derive(Default)]
pub struct MockGateway {
    creates: Mutex<HashMap<String, VecDeque<Step>>>,
    readiness: Mutex<HashMap<String, VecDeque<Readiness>>>,
    failing_deletes: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    requests: Mutex<Vec<ProvisionRequest>>,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
    create_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, steps: &[Step]) {
        self.creates
            .lock()
            .unwrap()
            .insert(name.to_string(), steps.iter().copied().collect());
    }

    pub fn script_readiness(&self, name: &str, answers: &[Readiness]) {
        self.readiness
            .lock()
            .unwrap()
            .insert(name.to_string(), answers.iter().cloned().collect());
    }

    pub fn fail_delete(&self, name: &str) {
        self.failing_deletes.lock().unwrap().push(name.to_string());
    }

    /// Cancel `token` when the create call for `name` is made
    pub fn cancel_on_create(&self, name: &str, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((name.to_string(), token));
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn create_count(&self, name: &str) -> usize {
        self.creates().iter().filter(|n| *n == name).count()
    }

    pub fn describe_count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::Describe(name.to_string()))
            .count()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn request(&self, name: &str) -> Option<ProvisionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
        let queue = queue?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn logical_name(physical_id: &str) -> String {
    physical_id.trim_end_matches("-id").to_string()
}

#[async_trait]
impl ProviderGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create(request.name.clone()));
        self.requests.lock().unwrap().push(request.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some((name, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *name == request.name {
                token.cancel();
            }
        }

        let step = Self::next(self.creates.lock().unwrap().get_mut(&request.name))
            .unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(format!("{}-id", request.name)),
            Step::Transient => Err(CloudError::TransientProvider(format!(
                "{}: Throttling",
                request.name
            ))),
            Step::Permanent => Err(CloudError::PermanentProvider(format!(
                "{}: InvalidParameterValue",
                request.name
            ))),
        }
    }

    async fn describe(&self, _kind: ResourceKind, physical_id: &str) -> Result<Readiness> {
        let name = logical_name(physical_id);
        self.calls.lock().unwrap().push(Call::Describe(name.clone()));
        Ok(Self::next(self.readiness.lock().unwrap().get_mut(&name)).unwrap_or(Readiness::Ready))
    }

    async fn delete(&self, _kind: ResourceKind, physical_id: &str) -> Result<()> {
        let name = logical_name(physical_id);
        self.calls.lock().unwrap().push(Call::Delete(name.clone()));
        if self.failing_deletes.lock().unwrap().contains(&name) {
            return Err(CloudError::PermanentProvider(format!("{name}: DependencyViolation")));
        }
        Ok(())
    }
}

/// Sink that records everything it is asked to deliver
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, topic_id: &str, message: &str) -> Result<()> {
        let value = serde_json::from_str(message)?;
        self.published
            .lock()
            .unwrap()
            .push((topic_id.to_string(), value));
        Ok(())
    }

    async fn subscribe(&self, topic_id: &str, _protocol: &str, _endpoint: &str) -> Result<String> {
        Ok(format!("{topic_id}-sub"))
    }
}

/// Engine settings with millisecond backoffs
#[allow(dead_code)]
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        readiness: WaitConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        },
        ..EngineConfig::default()
    }
}

#[allow(dead_code)]
pub fn bucket(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Bucket, name).with_param("bucket_name", json!(name))
}

/// Bucket, instance, target group, load balancer and listener
#[allow(dead_code)]
pub fn web_tier() -> Vec<ResourceDescriptor> {
    vec![
        bucket("bucket"),
        ResourceDescriptor::new(ResourceKind::Instance, "instance")
            .with_param("image_id", json!("ami-1"))
            .with_param("instance_type", json!("t2.micro")),
        ResourceDescriptor::new(ResourceKind::TargetGroup, "target-group")
            .with_param("protocol", json!("HTTP"))
            .with_param("port", json!(80))
            .with_param("vpc_id", json!("vpc-1"))
            .with_param("targets", json!(["instance"]))
            .depends_on("instance"),
        ResourceDescriptor::new(ResourceKind::LoadBalancer, "load-balancer")
            .with_param("subnets", json!(["subnet-1"]))
            .with_param("security_groups", json!(["sg-1"])),
        ResourceDescriptor::new(ResourceKind::Listener, "listener")
            .with_param("load_balancer", json!("load-balancer"))
            .with_param("target_group", json!("target-group"))
            .with_param("port", json!(80))
            .with_param("protocol", json!("HTTP"))
            .depends_on("load-balancer")
            .depends_on("target-group"),
    ]
}

#[allow(dead_code)]
pub fn graph(descriptors: Vec<ResourceDescriptor>) -> DependencyGraph {
    DependencyGraph::build(DescriptorSet::new(descriptors).unwrap()).unwrap()
}
