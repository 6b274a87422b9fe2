// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The pipeline talks to a `UnitExecutor` instead of calling the runner
//! directly. Production code uses [`UnitRunner`]; tests can wrap it to record
//! dispatch order or substitute outcomes without touching the scheduler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dag::Unit;
use crate::engine::RunResult;
use crate::exec::runner::UnitRunner;

/// Trait abstracting how a single unit is executed.
///
/// Implementations must always resolve to a terminal [`RunResult`]; failures
/// are values, never errors or panics.
pub trait UnitExecutor: Send + Sync {
    fn execute(&self, unit: Arc<Unit>) -> Pin<Box<dyn Future<Output = RunResult> + Send + '_>>;
}

impl UnitExecutor for UnitRunner {
    fn execute(&self, unit: Arc<Unit>) -> Pin<Box<dyn Future<Output = RunResult> + Send + '_>> {
        Box::pin(async move { self.run_unit(&unit).await })
    }
}
