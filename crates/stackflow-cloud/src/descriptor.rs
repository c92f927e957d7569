//! Resource descriptor model
//!
//! A [`ResourceDescriptor`] is the immutable, declarative description of one
//! resource in the stack. Descriptors reference each other by logical name;
//! provider-assigned physical IDs are only substituted by the engine at
//! dispatch time.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Kind of a provisioned resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Instance,
    LoadBalancer,
    TargetGroup,
    Listener,
    LaunchTemplate,
    ScalingGroup,
    ScalingPolicy,
    Topic,
    Subscription,
}

/// A parameter whose value names another descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceField {
    /// Parameter key
    pub field: &'static str,
    /// Kind the referenced descriptor must have
    pub target: ResourceKind,
    /// Whether the value is a list of names rather than a single name
    pub many: bool,
    /// Whether the graph builder adds the edge even when `depends_on` omits it
    pub implicit: bool,
    /// Whether the parameter must be present
    pub required: bool,
}

const fn reference(
    field: &'static str,
    target: ResourceKind,
    many: bool,
    implicit: bool,
    required: bool,
) -> ReferenceField {
    ReferenceField {
        field,
        target,
        many,
        implicit,
        required,
    }
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Bucket,
        ResourceKind::Instance,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::LaunchTemplate,
        ResourceKind::ScalingGroup,
        ResourceKind::ScalingPolicy,
        ResourceKind::Topic,
        ResourceKind::Subscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::Instance => "instance",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::LaunchTemplate => "launch_template",
            ResourceKind::ScalingGroup => "scaling_group",
            ResourceKind::ScalingPolicy => "scaling_policy",
            ResourceKind::Topic => "topic",
            ResourceKind::Subscription => "subscription",
        }
    }

    /// Parameters that name other descriptors.
    ///
    /// Implicit edges: TargetGroup -> its instances, Listener -> load balancer
    /// and target group, ScalingPolicy -> scaling group, Subscription -> topic.
    /// A scaling group's launch template is a reference but must be declared
    /// in `depends_on`.
    pub fn reference_fields(&self) -> &'static [ReferenceField] {
        const TARGET_GROUP: &[ReferenceField] =
            &[reference("targets", ResourceKind::Instance, true, true, false)];
        const LISTENER: &[ReferenceField] = &[
            reference("load_balancer", ResourceKind::LoadBalancer, false, true, true),
            reference("target_group", ResourceKind::TargetGroup, false, true, false),
        ];
        const SCALING_GROUP: &[ReferenceField] = &[reference(
            "launch_template",
            ResourceKind::LaunchTemplate,
            false,
            false,
            true,
        )];
        const SCALING_POLICY: &[ReferenceField] = &[reference(
            "scaling_group",
            ResourceKind::ScalingGroup,
            false,
            true,
            true,
        )];
        const SUBSCRIPTION: &[ReferenceField] =
            &[reference("topic", ResourceKind::Topic, false, true, true)];

        match self {
            ResourceKind::TargetGroup => TARGET_GROUP,
            ResourceKind::Listener => LISTENER,
            ResourceKind::ScalingGroup => SCALING_GROUP,
            ResourceKind::ScalingPolicy => SCALING_POLICY,
            ResourceKind::Subscription => SUBSCRIPTION,
            ResourceKind::Bucket
            | ResourceKind::Instance
            | ResourceKind::LoadBalancer
            | ResourceKind::LaunchTemplate
            | ResourceKind::Topic => &[],
        }
    }

    /// Default readiness timeout for kinds the provider sets up asynchronously
    pub fn default_readiness_timeout(&self) -> Option<Duration> {
        match self {
            ResourceKind::Instance => Some(Duration::from_secs(300)),
            ResourceKind::LoadBalancer => Some(Duration::from_secs(600)),
            ResourceKind::ScalingGroup => Some(Duration::from_secs(300)),
            _ => None,
        }
    }

    fn validate_parameters(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let name = descriptor.name.as_str();
        let params = &descriptor.parameters;
        match self {
            ResourceKind::Bucket => {
                require_str(name, params, "bucket_name")?;
            }
            ResourceKind::Instance | ResourceKind::LaunchTemplate => {
                require_str(name, params, "image_id")?;
                require_str(name, params, "instance_type")?;
            }
            ResourceKind::LoadBalancer => {
                require_str_list(name, params, "subnets")?;
                require_str_list(name, params, "security_groups")?;
            }
            ResourceKind::TargetGroup => {
                require_str(name, params, "protocol")?;
                require_u64(name, params, "port")?;
                require_str(name, params, "vpc_id")?;
            }
            ResourceKind::Listener => {
                require_u64(name, params, "port")?;
                require_str(name, params, "protocol")?;
            }
            ResourceKind::ScalingGroup => {
                let min = require_u64(name, params, "min_size")?;
                let max = require_u64(name, params, "max_size")?;
                let desired = require_u64(name, params, "desired_capacity")?;
                if !(min <= desired && desired <= max) {
                    return Err(CloudError::validation(
                        name,
                        "desired_capacity",
                        format!(
                            "requires min_size <= desired_capacity <= max_size (got {min} <= {desired} <= {max})"
                        ),
                    ));
                }
            }
            ResourceKind::ScalingPolicy => {
                require_str(name, params, "policy_type")?;
            }
            ResourceKind::Topic => {
                require_str(name, params, "topic_name")?;
            }
            ResourceKind::Subscription => {
                require_str(name, params, "endpoint")?;
                if params.contains_key("protocol") {
                    require_str(name, params, "protocol")?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn require_str<'a>(name: &str, params: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match params.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(CloudError::validation(name, field, "must be a non-empty string")),
        None => Err(CloudError::validation(name, field, "is required")),
    }
}

fn require_u64(name: &str, params: &Map<String, Value>, field: &str) -> Result<u64> {
    match params.get(field) {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| CloudError::validation(name, field, "must be a non-negative integer")),
        None => Err(CloudError::validation(name, field, "is required")),
    }
}

fn require_str_list(name: &str, params: &Map<String, Value>, field: &str) -> Result<Vec<String>> {
    let items = match params.get(field) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(CloudError::validation(name, field, "must be a list of strings")),
        None => return Err(CloudError::validation(name, field, "is required")),
    };
    if items.is_empty() {
        return Err(CloudError::validation(name, field, "must not be empty"));
    }
    items
        .iter()
        .map(|v| {
            v.as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| CloudError::validation(name, field, "must be a list of strings"))
        })
        .collect()
}

/// Declarative description of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource kind
    pub kind: ResourceKind,

    /// Unique logical name, used for graph edges
    pub name: String,

    /// Kind-specific configuration
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Logical names that must be Ready before this resource is provisioned
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters: Map::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    /// Get a parameter as a specific type
    pub fn get_param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Every `(field, logical name)` reference carried in the parameters.
    ///
    /// Malformed values are skipped here; [`DescriptorSet::new`] rejects them.
    pub fn references(&self) -> Vec<(&'static str, &str)> {
        let mut refs = Vec::new();
        for reference in self.kind.reference_fields() {
            match self.parameters.get(reference.field) {
                Some(Value::String(target)) if !reference.many => {
                    refs.push((reference.field, target.as_str()));
                }
                Some(Value::Array(items)) if reference.many => {
                    refs.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|target| (reference.field, target)),
                    );
                }
                _ => {}
            }
        }
        refs
    }

    /// Dependencies the graph builder adds from the kind's reference rules
    pub fn implicit_dependencies(&self) -> BTreeSet<String> {
        let implicit: Vec<&str> = self
            .kind
            .reference_fields()
            .iter()
            .filter(|r| r.implicit)
            .map(|r| r.field)
            .collect();
        self.references()
            .into_iter()
            .filter(|(field, _)| implicit.contains(field))
            .map(|(_, target)| target.to_string())
            .collect()
    }
}

/// A validated, immutable set of descriptors keyed by logical name
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    descriptors: BTreeMap<String, ResourceDescriptor>,
}

impl DescriptorSet {
    /// Validate and build the set; any violation rejects the whole set.
    pub fn new(descriptors: impl IntoIterator<Item = ResourceDescriptor>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(CloudError::validation(
                    descriptor.kind.as_str(),
                    "name",
                    "must not be empty",
                ));
            }
            if map.contains_key(&descriptor.name) {
                return Err(CloudError::validation(
                    &descriptor.name,
                    "name",
                    "duplicate logical name",
                ));
            }
            map.insert(descriptor.name.clone(), descriptor);
        }

        let set = Self { descriptors: map };
        for descriptor in set.descriptors.values() {
            set.validate_descriptor(descriptor)?;
        }
        Ok(set)
    }

    fn validate_descriptor(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let name = descriptor.name.as_str();
        descriptor.kind.validate_parameters(descriptor)?;

        for dep in &descriptor.depends_on {
            if !self.descriptors.contains_key(dep) {
                return Err(CloudError::validation(
                    name,
                    "depends_on",
                    format!("references unknown resource '{dep}'"),
                ));
            }
        }

        for reference in descriptor.kind.reference_fields() {
            let targets: Vec<&str> = match descriptor.parameters.get(reference.field) {
                None if reference.required => {
                    return Err(CloudError::validation(name, reference.field, "is required"));
                }
                None => continue,
                Some(Value::String(target)) if !reference.many => vec![target.as_str()],
                Some(Value::Array(items)) if reference.many => {
                    let targets: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
                    targets.ok_or_else(|| {
                        CloudError::validation(name, reference.field, "must be a list of names")
                    })?
                }
                Some(_) => {
                    let expected = if reference.many { "a list of names" } else { "a name" };
                    return Err(CloudError::validation(
                        name,
                        reference.field,
                        format!("must be {expected}"),
                    ));
                }
            };

            for target in targets {
                let Some(referenced) = self.descriptors.get(target) else {
                    return Err(CloudError::validation(
                        name,
                        reference.field,
                        format!("references unknown resource '{target}'"),
                    ));
                };
                if referenced.kind != reference.target {
                    return Err(CloudError::validation(
                        name,
                        reference.field,
                        format!(
                            "'{target}' is a {}, expected a {}",
                            referenced.kind, reference.target
                        ),
                    ));
                }
                if !reference.implicit && !descriptor.depends_on.contains(target) {
                    return Err(CloudError::validation(
                        name,
                        reference.field,
                        format!("'{target}' must also be listed in depends_on"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in name order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.values()
    }

    pub fn by_kind(&self, kind: ResourceKind) -> Vec<&ResourceDescriptor> {
        self.descriptors.values().filter(|d| d.kind == kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Instance, name)
            .with_param("image_id", json!("ami-123"))
            .with_param("instance_type", json!("t2.micro"))
    }

    fn scaling_group(min: u64, desired: u64, max: u64) -> Vec<ResourceDescriptor> {
        vec![
            ResourceDescriptor::new(ResourceKind::LaunchTemplate, "lt")
                .with_param("image_id", json!("ami-123"))
                .with_param("instance_type", json!("t2.micro")),
            ResourceDescriptor::new(ResourceKind::ScalingGroup, "asg")
                .with_param("launch_template", json!("lt"))
                .with_param("min_size", json!(min))
                .with_param("max_size", json!(max))
                .with_param("desired_capacity", json!(desired))
                .depends_on("lt"),
        ]
    }

    fn expect_validation(result: Result<DescriptorSet>, descriptor: &str, field: &str) {
        match result {
            Err(CloudError::Validation {
                descriptor: d,
                field: f,
                ..
            }) => {
                assert_eq!(d, descriptor);
                assert_eq!(f, field);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = DescriptorSet::new(vec![instance("web"), instance("web")]);
        expect_validation(result, "web", "name");
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = DescriptorSet::new(vec![instance("web").depends_on("ghost")]);
        expect_validation(result, "web", "depends_on");
    }

    #[test]
    fn test_load_balancer_requires_subnets_and_security_groups() {
        let lb = ResourceDescriptor::new(ResourceKind::LoadBalancer, "alb")
            .with_param("subnets", json!(["subnet-1"]));
        expect_validation(DescriptorSet::new(vec![lb]), "alb", "security_groups");

        let lb = ResourceDescriptor::new(ResourceKind::LoadBalancer, "alb")
            .with_param("subnets", json!([]))
            .with_param("security_groups", json!(["sg-1"]));
        expect_validation(DescriptorSet::new(vec![lb]), "alb", "subnets");
    }

    #[test]
    fn test_scaling_group_capacity_bounds() {
        assert!(DescriptorSet::new(scaling_group(1, 1, 3)).is_ok());
        assert!(DescriptorSet::new(scaling_group(2, 2, 2)).is_ok());
        expect_validation(DescriptorSet::new(scaling_group(2, 1, 3)), "asg", "desired_capacity");
        expect_validation(DescriptorSet::new(scaling_group(1, 4, 3)), "asg", "desired_capacity");
    }

    #[test]
    fn test_launch_template_reference_must_be_declared() {
        let mut descriptors = scaling_group(1, 1, 3);
        descriptors[1].depends_on.clear();
        expect_validation(DescriptorSet::new(descriptors), "asg", "launch_template");
    }

    #[test]
    fn test_reference_kind_checked() {
        let listener = ResourceDescriptor::new(ResourceKind::Listener, "http")
            .with_param("load_balancer", json!("web"))
            .with_param("port", json!(80))
            .with_param("protocol", json!("HTTP"));
        let result = DescriptorSet::new(vec![instance("web"), listener]);
        expect_validation(result, "http", "load_balancer");
    }

    #[test]
    fn test_implicit_dependencies_from_references() {
        let tg = ResourceDescriptor::new(ResourceKind::TargetGroup, "tg")
            .with_param("protocol", json!("HTTP"))
            .with_param("port", json!(80))
            .with_param("vpc_id", json!("vpc-1"))
            .with_param("targets", json!(["web-1", "web-2"]));
        let deps: Vec<String> = tg.implicit_dependencies().into_iter().collect();
        assert_eq!(deps, vec!["web-1".to_string(), "web-2".to_string()]);

        let asg = &scaling_group(1, 1, 3)[1];
        assert!(asg.implicit_dependencies().is_empty());
    }

    #[test]
    fn test_descriptor_yaml_shape() {
        let yaml = r#"
kind: subscription
name: scaling-alerts
parameters:
  topic: scaling-events
  endpoint: arn:aws:lambda:scaling
depends_on: [scaling-policy]
"#;
        let descriptor: ResourceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(descriptor.kind, ResourceKind::Subscription);
        assert!(descriptor.depends_on.contains("scaling-policy"));
        assert_eq!(
            descriptor.get_param::<String>("endpoint").as_deref(),
            Some("arn:aws:lambda:scaling")
        );
    }
}
