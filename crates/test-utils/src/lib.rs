//! Shared helpers for pipedag's integration tests.
//!
//! - [`actions`]: canned unit actions (ok, failing, sleeping, panicking).
//! - [`builders`]: fluent builders for validated configs.
//! - [`recording_executor`]: an executor that records start/finish instants.

pub mod actions;
pub mod builders;
pub mod recording_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any single awaited step in a test.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is captured and shown only for failing tests. Override the level
/// with `RUST_LOG`, e.g. `RUST_LOG=pipedag=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pipedag=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .init();
    });
}

/// Await `fut`, panicking if it takes longer than [`TEST_DEADLINE`].
pub async fn with_timeout<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_DEADLINE, fut).await {
        Ok(value) => value,
        Err(_) => panic!("test step did not finish within {TEST_DEADLINE:?}"),
    }
}
