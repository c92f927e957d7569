//! Stack files and the built-in web application topology

use crate::config::EngineConfig;
use crate::descriptor::{DescriptorSet, ResourceDescriptor, ResourceKind};
use crate::error::Result;
use crate::graph::DependencyGraph;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

/// Contents of a `stack.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    pub name: String,

    #[serde(default)]
    pub settings: EngineConfig,

    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

impl StackFile {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the descriptors and build the dependency graph.
    ///
    /// Either the whole stack is accepted or nothing is.
    pub fn graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::build(DescriptorSet::new(self.resources.iter().cloned())?)
    }
}

/// Inputs of the web application stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAppParams {
    pub prefix: String,
    pub bucket_name: String,
    pub image_id: String,
    pub template_image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub vpc_id: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub cpu_target: f64,
    pub warmup_secs: u32,
    /// Opaque function endpoints for the three notification topics
    pub health_endpoint: String,
    pub scaling_endpoint: String,
    pub high_traffic_endpoint: String,
}

impl Default for WebAppParams {
    fn default() -> Self {
        Self {
            prefix: "web".into(),
            bucket_name: "your-unique-bucket-name".into(),
            image_id: "ami-00000000000000000".into(),
            template_image_id: "ami-00000000000000000".into(),
            instance_type: "t2.micro".into(),
            key_name: "web-key".into(),
            vpc_id: "your-vpc-id".into(),
            subnets: vec!["subnet-00000000000000000".into()],
            security_groups: vec!["sg-00000000000000000".into()],
            min_size: 1,
            max_size: 3,
            desired_capacity: 1,
            cpu_target: 70.0,
            warmup_secs: 300,
            health_endpoint: "your-health-lambda-function-arn".into(),
            scaling_endpoint: "your-scaling-lambda-function-arn".into(),
            high_traffic_endpoint: "your-high-traffic-lambda-function-arn".into(),
        }
    }
}

/// Descriptors of the multi-tier web application stack: storage bucket, web
/// instance behind an application load balancer, auto-scaling group with a
/// CPU target-tracking policy, and three notification topics each bound to a
/// function endpoint.
pub fn web_app(params: &WebAppParams) -> Vec<ResourceDescriptor> {
    let p = |suffix: &str| format!("{}-{}", params.prefix, suffix);

    let topic = |name: &str, topic_name: &str| {
        ResourceDescriptor::new(ResourceKind::Topic, p(name)).with_param("topic_name", json!(topic_name))
    };
    let subscription = |name: &str, topic: &str, endpoint: &str, observes: String| {
        ResourceDescriptor::new(ResourceKind::Subscription, p(name))
            .with_param("topic", json!(p(topic)))
            .with_param("protocol", json!("lambda"))
            .with_param("endpoint", json!(endpoint))
            .depends_on(observes)
    };

    vec![
        ResourceDescriptor::new(ResourceKind::Bucket, p("assets"))
            .with_param("bucket_name", json!(params.bucket_name)),
        ResourceDescriptor::new(ResourceKind::Instance, p("server"))
            .with_param("image_id", json!(params.image_id))
            .with_param("instance_type", json!(params.instance_type))
            .with_param("key_name", json!(params.key_name)),
        ResourceDescriptor::new(ResourceKind::LoadBalancer, p("alb"))
            .with_param("subnets", json!(params.subnets))
            .with_param("security_groups", json!(params.security_groups))
            .with_param("scheme", json!("internet-facing")),
        ResourceDescriptor::new(ResourceKind::TargetGroup, p("tg"))
            .with_param("protocol", json!("HTTP"))
            .with_param("port", json!(80))
            .with_param("vpc_id", json!(params.vpc_id))
            .with_param("targets", json!([p("server")])),
        ResourceDescriptor::new(ResourceKind::Listener, p("http"))
            .with_param("load_balancer", json!(p("alb")))
            .with_param("target_group", json!(p("tg")))
            .with_param("port", json!(80))
            .with_param("protocol", json!("HTTP")),
        ResourceDescriptor::new(ResourceKind::LaunchTemplate, p("template"))
            .with_param("image_id", json!(params.template_image_id))
            .with_param("instance_type", json!(params.instance_type))
            .with_param("key_name", json!(params.key_name)),
        ResourceDescriptor::new(ResourceKind::ScalingGroup, p("asg"))
            .with_param("launch_template", json!(p("template")))
            .with_param("min_size", json!(params.min_size))
            .with_param("max_size", json!(params.max_size))
            .with_param("desired_capacity", json!(params.desired_capacity))
            .with_param("subnets", json!(params.subnets))
            .depends_on(p("template")),
        ResourceDescriptor::new(ResourceKind::ScalingPolicy, p("cpu-policy"))
            .with_param("scaling_group", json!(p("asg")))
            .with_param("policy_type", json!("TargetTrackingScaling"))
            .with_param("estimated_instance_warmup", json!(params.warmup_secs))
            .with_param("metric", json!("ASGAverageCPUUtilization"))
            .with_param("target_value", json!(params.cpu_target)),
        topic("health-topic", "HealthIssuesTopic"),
        topic("scaling-topic", "ScalingEventsTopic"),
        topic("traffic-topic", "HighTrafficTopic"),
        subscription("health-sub", "health-topic", &params.health_endpoint, p("http")),
        subscription("scaling-sub", "scaling-topic", &params.scaling_endpoint, p("cpu-policy")),
        subscription("traffic-sub", "traffic-topic", &params.high_traffic_endpoint, p("alb")),
    ]
}

/// A ready-to-edit stack file containing the web application stack
pub fn web_app_stack(name: impl Into<String>, params: &WebAppParams) -> StackFile {
    StackFile {
        name: name.into(),
        settings: EngineConfig::default(),
        resources: web_app(params),
    }
}
