use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use pipedag::dag::Unit;
use pipedag::engine::RunResult;
use pipedag::exec::{UnitExecutor, UnitRunner};

/// One unit execution as observed by [`RecordingExecutor`].
#[derive(Debug, Clone)]
pub struct Execution {
    pub unit: String,
    pub started: Instant,
    pub finished: Instant,
}

/// An executor that:
/// - delegates to the real [`UnitRunner`]
/// - records which units ran and when
/// - tracks the highest number of units running at once.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    runner: UnitRunner,
    executions: Arc<Mutex<Vec<Execution>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executions in completion order.
    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().clone()
    }

    /// Names of executed units in start order.
    pub fn started_order(&self) -> Vec<String> {
        let mut executions = self.executions();
        executions.sort_by_key(|e| e.started);
        executions.into_iter().map(|e| e.unit).collect()
    }

    pub fn execution_of(&self, unit: &str) -> Option<Execution> {
        self.executions().into_iter().find(|e| e.unit == unit)
    }

    pub fn ran(&self, unit: &str) -> bool {
        self.execution_of(unit).is_some()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl UnitExecutor for RecordingExecutor {
    fn execute(&self, unit: Arc<Unit>) -> Pin<Box<dyn Future<Output = RunResult> + Send + '_>> {
        Box::pin(async move {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let started = Instant::now();
            let result = self.runner.run_unit(&unit).await;
            let finished = Instant::now();

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.executions.lock().unwrap().push(Execution {
                unit: unit.name().to_string(),
                started,
                finished,
            });

            result
        })
    }
}
