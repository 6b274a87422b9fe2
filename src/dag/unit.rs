// src/dag/unit.rs

//! Pipeline units and the action contract they carry.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{Group, Metadata, UnitName};

/// Timeout applied to units that do not declare their own.
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Boxed future returned by a [`UnitAction`].
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<Metadata>> + Send>>;

/// Zero-argument work performed by a unit.
///
/// An action either completes with a metadata map or fails with an error
/// whose message explains why. The runner enforces the unit's timeout by
/// dropping the future, so actions must not block the executor thread.
pub trait UnitAction: Send + Sync {
    fn run(&self) -> ActionFuture;
}

/// Adapter turning an async closure into a [`UnitAction`].
pub struct FnAction<F>(F);

impl<F, Fut> FnAction<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Metadata>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> UnitAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Metadata>> + Send + 'static,
{
    fn run(&self) -> ActionFuture {
        Box::pin((self.0)())
    }
}

/// Convenience wrapper: `action_fn(|| async { Ok(Metadata::new()) })`.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn UnitAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Metadata>> + Send + 'static,
{
    Arc::new(FnAction::new(f))
}

/// One named step of the pipeline.
///
/// Units are immutable once handed to the registry.
#[derive(Clone)]
pub struct Unit {
    name: UnitName,
    group: Group,
    predecessors: BTreeSet<UnitName>,
    timeout: Duration,
    description: Option<String>,
    action: Arc<dyn UnitAction>,
}

impl Unit {
    pub fn new(name: impl Into<UnitName>, group: Group, action: Arc<dyn UnitAction>) -> Self {
        Self {
            name: name.into(),
            group,
            predecessors: BTreeSet::new(),
            timeout: DEFAULT_UNIT_TIMEOUT,
            description: None,
            action,
        }
    }

    /// Add a predecessor that must succeed before this unit may start.
    pub fn after(mut self, predecessor: impl Into<UnitName>) -> Self {
        self.predecessors.insert(predecessor.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Group {
        self.group
    }

    pub fn predecessors(&self) -> &BTreeSet<UnitName> {
        &self.predecessors
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn action(&self) -> &Arc<dyn UnitAction> {
        &self.action
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("predecessors", &self.predecessors)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
