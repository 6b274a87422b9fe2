// src/dag/mod.rs

//! Unit registry, job selection and DAG scheduling.
//!
//! - [`unit`] defines units and the action contract they carry.
//! - [`registry`] holds the append-only set of registered units.
//! - [`graph`] builds the sub-DAG induced by a set of unit names.
//! - [`selector`] resolves selection expressions into jobs.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   units are ready and which must be skipped.

pub mod graph;
pub mod registry;
pub mod scheduler;
pub mod selector;
pub mod unit;

pub use graph::DagGraph;
pub use registry::UnitRegistry;
pub use scheduler::{Scheduler, SchedulerStep, SkipCause, SkippedUnit, UnitOutcome};
pub use selector::{Job, JobDefinition, JobSelector, Selection};
pub use unit::{action_fn, ActionFuture, FnAction, Unit, UnitAction, DEFAULT_UNIT_TIMEOUT};
