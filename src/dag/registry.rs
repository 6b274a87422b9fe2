// src/dag/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::dag::unit::Unit;
use crate::errors::{PipelineError, Result};
use crate::types::{Group, UnitName};

/// Append-only set of units keyed by name.
///
/// Predecessors must be registered before their dependents, so the registry
/// can never hold a dangling reference or a cycle. Once built it is shared
/// read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: HashMap<UnitName, Arc<Unit>>,
    /// Names in registration order; this is always a valid topological order.
    order: Vec<UnitName>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit.
    ///
    /// Fails if the name is empty or already taken, if the unit lists itself
    /// as a predecessor, or if any predecessor is not registered yet.
    pub fn register(&mut self, unit: Unit) -> Result<()> {
        let name = unit.name().to_string();

        if name.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "unit name must not be empty".to_string(),
            ));
        }
        if self.units.contains_key(&name) {
            return Err(PipelineError::DuplicateUnit(name));
        }
        if unit.predecessors().contains(&name) {
            return Err(PipelineError::SelfDependency(name));
        }
        if let Some(missing) = unit
            .predecessors()
            .iter()
            .find(|p| !self.units.contains_key(p.as_str()))
        {
            return Err(PipelineError::UnknownDependency {
                unit: name,
                dependency: missing.clone(),
            });
        }

        debug!(
            unit = %name,
            group = %unit.group(),
            predecessors = ?unit.predecessors(),
            "registered unit"
        );

        self.order.push(name.clone());
        self.units.insert(name, Arc::new(unit));
        Ok(())
    }

    /// All units in registration order.
    pub fn all_units(&self) -> impl Iterator<Item = &Arc<Unit>> {
        self.order.iter().filter_map(|n| self.units.get(n))
    }

    /// Units carrying the given group tag, in registration order.
    pub fn units_in_group(&self, group: Group) -> impl Iterator<Item = &Arc<Unit>> {
        self.all_units().filter(move |u| u.group() == group)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Unit>> {
        self.units.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Unit names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Position of a unit in registration order.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
