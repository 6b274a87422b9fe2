//! Ready-made unit actions for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipedag::dag::{action_fn, Unit, UnitAction};
use pipedag::types::{Group, Metadata, MetadataValue};

/// Succeeds immediately with empty metadata.
pub fn ok() -> Arc<dyn UnitAction> {
    action_fn(|| async { anyhow::Ok(Metadata::new()) })
}

/// Succeeds immediately with a single metadata entry.
pub fn ok_with(key: &'static str, value: impl Into<MetadataValue>) -> Arc<dyn UnitAction> {
    let value = value.into();
    action_fn(move || {
        let value = value.clone();
        async move {
            let mut metadata = Metadata::new();
            metadata.insert(key.to_string(), value);
            anyhow::Ok(metadata)
        }
    })
}

/// Fails immediately with `message`.
pub fn failing(message: &'static str) -> Arc<dyn UnitAction> {
    action_fn(move || async move { Err::<Metadata, _>(anyhow::anyhow!(message)) })
}

/// Sleeps for `duration`, then succeeds.
pub fn sleeping(duration: Duration) -> Arc<dyn UnitAction> {
    action_fn(move || async move {
        tokio::time::sleep(duration).await;
        anyhow::Ok(Metadata::new())
    })
}

/// Panics when run.
pub fn panicking() -> Arc<dyn UnitAction> {
    action_fn(|| async {
        if true {
            panic!("action panicked on purpose");
        }
        anyhow::Ok(Metadata::new())
    })
}

/// Succeeds and counts how many times it ran.
pub fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn UnitAction> {
    action_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            let runs = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut metadata = Metadata::new();
            metadata.insert("runs".to_string(), MetadataValue::from(runs));
            anyhow::Ok(metadata)
        }
    })
}

/// Shorthand for a unit with the given predecessors.
pub fn unit(name: &str, group: Group, after: &[&str], action: Arc<dyn UnitAction>) -> Unit {
    after
        .iter()
        .fold(Unit::new(name, group, action), |u, dep| u.after(*dep))
}
