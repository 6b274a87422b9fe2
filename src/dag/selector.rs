// src/dag/selector.rs

//! Resolving selection expressions into concrete jobs.
//!
//! Recognised forms:
//! - `all`: every registered unit
//! - `group:<name>`: every unit tagged with that group
//! - `unit:<name>`: exactly that unit
//!
//! Selections are evaluated against the registry each time they are
//! resolved, never cached.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::dag::graph::DagGraph;
use crate::dag::registry::UnitRegistry;
use crate::errors::{PipelineError, Result};
use crate::types::{Group, UnitName};

/// Parsed selection expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Group(Group),
    Unit(UnitName),
}

impl FromStr for Selection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "all" {
            return Ok(Selection::All);
        }

        match s.split_once(':') {
            Some(("group", name)) => Ok(Selection::Group(name.parse()?)),
            Some(("unit", name)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(PipelineError::UnknownUnit(String::new()));
                }
                Ok(Selection::Unit(name.to_string()))
            }
            _ => Err(PipelineError::InvalidSelection(format!(
                "'{s}' (expected \"all\", \"group:<name>\" or \"unit:<name>\")"
            ))),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str("all"),
            Selection::Group(g) => write!(f, "group:{g}"),
            Selection::Unit(u) => write!(f, "unit:{u}"),
        }
    }
}

/// Resolves selections against a registry.
#[derive(Debug, Clone, Copy)]
pub struct JobSelector<'a> {
    registry: &'a UnitRegistry,
}

impl<'a> JobSelector<'a> {
    pub fn new(registry: &'a UnitRegistry) -> Self {
        Self { registry }
    }

    /// Resolve a single selection expression to a set of unit names.
    pub fn resolve(&self, expression: &str) -> Result<BTreeSet<UnitName>> {
        let selection: Selection = expression.parse()?;
        self.resolve_selection(&selection)
    }

    /// Resolve a parsed selection.
    pub fn resolve_selection(&self, selection: &Selection) -> Result<BTreeSet<UnitName>> {
        match selection {
            Selection::All => Ok(self.registry.names().map(str::to_string).collect()),
            Selection::Group(group) => Ok(self
                .registry
                .units_in_group(*group)
                .map(|u| u.name().to_string())
                .collect()),
            Selection::Unit(name) => {
                if self.registry.contains(name) {
                    Ok(BTreeSet::from([name.clone()]))
                } else {
                    Err(PipelineError::UnknownUnit(name.clone()))
                }
            }
        }
    }

    /// Resolve the union of several expressions.
    pub fn resolve_all<S: AsRef<str>>(&self, expressions: &[S]) -> Result<BTreeSet<UnitName>> {
        let mut units = BTreeSet::new();
        for expr in expressions {
            units.extend(self.resolve(expr.as_ref())?);
        }
        Ok(units)
    }
}

/// A named subset of units plus its induced sub-DAG.
///
/// Jobs are built right before execution and discarded afterwards.
#[derive(Debug, Clone)]
pub struct Job {
    name: String,
    graph: DagGraph,
}

impl Job {
    /// Build a job from the union of `expressions`.
    pub fn from_selection<S: AsRef<str>>(
        registry: &UnitRegistry,
        name: impl Into<String>,
        expressions: &[S],
    ) -> Result<Self> {
        let members = JobSelector::new(registry).resolve_all(expressions)?;
        Ok(Self::from_units(registry, name, &members))
    }

    /// Build a job from an explicit set of names.
    pub fn from_units(
        registry: &UnitRegistry,
        name: impl Into<String>,
        members: &BTreeSet<UnitName>,
    ) -> Self {
        Self {
            name: name.into(),
            graph: DagGraph::induced(registry, members),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Member names in topological order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.graph.units()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

/// A job as declared in configuration: a name plus selection expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub selection: Vec<String>,
    pub description: Option<String>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, selection: Vec<String>) -> Self {
        Self {
            name: name.into(),
            selection,
            description: None,
        }
    }

    /// Resolve against the registry as it is right now.
    pub fn to_job(&self, registry: &UnitRegistry) -> Result<Job> {
        Job::from_selection(registry, self.name.clone(), &self.selection)
    }
}
