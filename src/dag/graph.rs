// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use crate::dag::registry::UnitRegistry;
use crate::types::UnitName;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct in-job predecessors.
    deps: Vec<UnitName>,
    /// Direct in-job dependents.
    dependents: Vec<UnitName>,
}

/// Sub-DAG induced by a set of unit names.
///
/// Only edges whose two endpoints are both in the set are kept. Acyclicity
/// is inherited from the registry, so no validation happens here.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<UnitName, DagNode>,
    /// Members in registration order, which is a valid topological order.
    order: Vec<UnitName>,
}

impl DagGraph {
    /// Build the sub-DAG of `registry` restricted to `members`.
    ///
    /// Names not present in the registry are ignored; callers resolve
    /// selections before getting here.
    pub fn induced(registry: &UnitRegistry, members: &BTreeSet<UnitName>) -> Self {
        let order: Vec<UnitName> = registry
            .names()
            .filter(|n| members.contains(*n))
            .map(|n| n.to_string())
            .collect();

        let mut nodes: HashMap<UnitName, DagNode> = order
            .iter()
            .map(|n| (n.clone(), DagNode::default()))
            .collect();

        for name in &order {
            let Some(unit) = registry.get(name) else {
                continue;
            };
            let deps: Vec<UnitName> = unit
                .predecessors()
                .iter()
                .filter(|p| members.contains(p.as_str()))
                .cloned()
                .collect();

            for dep in &deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
            if let Some(node) = nodes.get_mut(name) {
                node.deps = deps;
            }
        }

        Self { nodes, order }
    }

    /// Member names in topological order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate in-job predecessors of a unit.
    pub fn dependencies_of(&self, name: &str) -> &[UnitName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate in-job dependents of a unit.
    pub fn dependents_of(&self, name: &str) -> &[UnitName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Number of in-job predecessors per unit.
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        self.order
            .iter()
            .map(|n| (n.as_str(), self.dependencies_of(n).len()))
            .collect()
    }

    /// Everything reachable from `name` through dependent edges, excluding
    /// `name` itself.
    pub fn descendants_of(&self, name: &str) -> BTreeSet<UnitName> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(name).iter().map(|s| s.as_str()).collect();

        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependents_of(next).iter().map(|s| s.as_str()));
            }
        }

        seen
    }
}
