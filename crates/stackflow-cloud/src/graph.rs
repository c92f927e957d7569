//! Dependency graph builder
//!
//! Combines the explicit `depends_on` edges with the implicit edges derived
//! from each kind's reference fields, rejects cycles, and computes a
//! deterministic topological order. Ties between simultaneously eligible
//! nodes are broken by logical name, so the same name set always yields the
//! same order regardless of input ordering.

use crate::descriptor::{DescriptorSet, ResourceDescriptor};
use crate::error::{CloudError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Directed acyclic graph over a validated descriptor set
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    descriptors: DescriptorSet,
    /// node -> everything it waits for (explicit + implicit)
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// node -> nodes that wait for it
    dependents: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn build(descriptors: DescriptorSet) -> Result<Self> {
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for descriptor in descriptors.iter() {
            let mut deps = descriptor.depends_on.clone();
            deps.extend(descriptor.implicit_dependencies());
            if deps.contains(&descriptor.name) {
                return Err(CloudError::Cycle {
                    member: descriptor.name.clone(),
                });
            }
            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(descriptor.name.clone());
            }
            dependents.entry(descriptor.name.clone()).or_default();
            dependencies.insert(descriptor.name.clone(), deps);
        }

        let order = topological_order(&dependencies, &dependents)?;
        tracing::debug!("Built dependency graph with {} nodes", order.len());

        Ok(Self {
            descriptors,
            dependencies,
            dependents,
            order,
        })
    }

    /// Deterministic provisioning order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    pub fn descriptor(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Full dependency set (explicit + implicit) of a node
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &String> {
        self.dependencies.get(name).into_iter().flatten()
    }

    /// Direct dependents of a node
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(name).into_iter().flatten()
    }

    /// Every node with `name` in its transitive dependency closure
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&String> = self.dependents(name).collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node.clone()) {
                queue.extend(self.dependents(node));
            }
        }
        seen
    }
}

/// Kahn's algorithm with a name-ordered ready set
fn topological_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    dependents: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>> {
    let mut remaining: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(name) = ready.pop_first() {
        remaining.remove(name);
        order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent.as_str());
                }
            }
        }
    }

    if remaining.is_empty() {
        return Ok(order);
    }

    // Every leftover node still waits on another leftover node, so following
    // those edges from any of them must revisit a node on a cycle.
    let mut visited = BTreeSet::new();
    let mut current = remaining.keys().next().copied().unwrap_or_default();
    while visited.insert(current) {
        current = dependencies
            .get(current)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|dep| remaining.contains_key(dep))
            .unwrap_or(current);
    }
    Err(CloudError::Cycle {
        member: current.to_string(),
    })
}
