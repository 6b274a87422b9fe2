// tests/pipeline_runs.rs

mod common;
use crate::common::{actions, diamond_registry, init_tracing, medical_registry};

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipedag::dag::{JobDefinition, UnitRegistry};
use pipedag::engine::{stop_channel, FailureReason, Pipeline};
use pipedag::errors::PipelineError;
use pipedag::types::{Group, MetadataValue, RunStatus, UnitStatus};
use pipedag_test_utils::recording_executor::RecordingExecutor;
use pipedag_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn pipeline_with(registry: UnitRegistry, executor: &RecordingExecutor) -> Pipeline {
    Pipeline::new(Arc::new(registry))
        .with_executor(Arc::new(executor.clone()))
        .with_max_parallelism(4)
}

#[tokio::test]
async fn root_failure_skips_everything_downstream() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "A" => actions::failing("A broke"),
        _ => actions::ok(),
    });
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);

    let summary = with_timeout(pipeline.submit("all")).await?;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status_of("A"), Some(UnitStatus::Failed));
    for unit in ["B", "C", "D"] {
        assert_eq!(summary.status_of(unit), Some(UnitStatus::Skipped), "{unit}");
        let result = summary.result_of(unit).ok_or("missing result")?;
        assert_eq!(
            result.reason,
            Some(FailureReason::DependencyFailed {
                upstream: "A".to_string()
            })
        );
        assert!(result.started_at.is_none());
    }
    assert_eq!(executor.started_order(), vec!["A".to_string()]);

    let reason = summary
        .result_of("A")
        .and_then(|r| r.reason.clone())
        .ok_or("A has no reason")?;
    assert!(reason.to_string().contains("A broke"), "{reason}");
    Ok(())
}

#[tokio::test]
async fn branch_failure_does_not_stop_independent_branch() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "B" => actions::failing("B broke"),
        _ => actions::ok(),
    });
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);

    let summary = with_timeout(pipeline.submit("all")).await?;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status_of("A"), Some(UnitStatus::Succeeded));
    assert_eq!(summary.status_of("B"), Some(UnitStatus::Failed));
    assert_eq!(summary.status_of("C"), Some(UnitStatus::Succeeded));
    assert_eq!(summary.status_of("D"), Some(UnitStatus::Skipped));
    assert!(!executor.ran("D"));
    Ok(())
}

#[tokio::test]
async fn dependents_start_after_predecessors_finish() -> TestResult {
    init_tracing();
    let registry = medical_registry(|_| actions::sleeping(Duration::from_millis(30)));
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);

    let summary = with_timeout(pipeline.submit("all")).await?;
    assert!(summary.is_success());

    for unit in pipeline.registry().all_units() {
        let this = executor.execution_of(unit.name()).ok_or("unit did not run")?;
        for dep in unit.predecessors() {
            let before = executor.execution_of(dep).ok_or("dependency did not run")?;
            assert!(
                this.started >= before.finished,
                "{} started before {dep} finished",
                unit.name()
            );

            let (Some(start), Some(end)) = (
                summary.result_of(unit.name()).and_then(|r| r.started_at),
                summary.result_of(dep).and_then(|r| r.finished_at),
            ) else {
                return Err("missing timestamps".into());
            };
            assert!(start >= end);
        }
    }
    Ok(())
}

#[tokio::test]
async fn independent_branches_run_concurrently() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "B" | "C" => actions::sleeping(Duration::from_millis(200)),
        _ => actions::ok(),
    });
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);

    let summary = with_timeout(pipeline.submit("all")).await?;

    assert!(summary.is_success());
    assert_eq!(executor.max_concurrency(), 2);
    Ok(())
}

#[tokio::test]
async fn parallelism_is_bounded() -> TestResult {
    init_tracing();
    let mut registry = UnitRegistry::new();
    for name in ["r1", "r2", "r3", "r4", "r5"] {
        registry.register(actions::unit(
            name,
            Group::Extract,
            &[],
            actions::sleeping(Duration::from_millis(50)),
        ))?;
    }
    let executor = RecordingExecutor::new();
    let pipeline = Pipeline::new(Arc::new(registry))
        .with_executor(Arc::new(executor.clone()))
        .with_max_parallelism(2);

    let summary = with_timeout(pipeline.submit("group:extract")).await?;

    assert!(summary.is_success());
    assert_eq!(summary.results.len(), 5);
    assert!(executor.max_concurrency() <= 2);
    assert_eq!(executor.executions().len(), 5);
    Ok(())
}

#[tokio::test]
async fn empty_selection_is_a_successful_no_op() -> TestResult {
    init_tracing();
    let mut registry = UnitRegistry::new();
    registry.register(actions::unit("only", Group::Extract, &[], actions::ok()))?;
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);

    let summary = with_timeout(pipeline.submit("group:enrich")).await?;

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert!(summary.results.is_empty());
    assert!(executor.executions().is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_runs_yield_the_same_statuses() -> TestResult {
    init_tracing();
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = medical_registry(|name| match name {
        "yolo_enrichment" => actions::failing("no images"),
        _ => actions::counting(Arc::clone(&counter)),
    });
    let pipeline = Pipeline::new(Arc::new(registry));

    let first = with_timeout(pipeline.submit("all")).await?;
    let second = with_timeout(pipeline.submit("all")).await?;

    assert_eq!(first.statuses(), second.statuses());
    assert_ne!(first.run_id, second.run_id);
    assert!(second.run_id > first.run_id);
    // scraper, loader and dbt ran twice; load_detections never ran.
    assert_eq!(counter.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test]
async fn metadata_from_actions_is_captured() -> TestResult {
    init_tracing();
    let mut registry = UnitRegistry::new();
    registry.register(actions::unit(
        "telegram_scraper",
        Group::Extract,
        &[],
        actions::ok_with("message_files", 42_i64),
    ))?;
    let pipeline = Pipeline::new(Arc::new(registry));

    let summary = with_timeout(pipeline.submit("unit:telegram_scraper")).await?;
    let result = summary
        .result_of("telegram_scraper")
        .ok_or("missing result")?;

    assert_eq!(
        result.metadata.get("message_files"),
        Some(&MetadataValue::Int(42))
    );
    assert!(result.duration.is_some());
    Ok(())
}

#[tokio::test]
async fn panicking_action_is_contained() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "C" => actions::panicking(),
        _ => actions::ok(),
    });
    let pipeline = Pipeline::new(Arc::new(registry));

    let summary = with_timeout(pipeline.submit("all")).await?;

    assert_eq!(summary.status_of("B"), Some(UnitStatus::Succeeded));
    assert_eq!(summary.status_of("C"), Some(UnitStatus::Failed));
    assert_eq!(summary.status_of("D"), Some(UnitStatus::Skipped));
    assert!(matches!(
        summary.result_of("C").and_then(|r| r.reason.clone()),
        Some(FailureReason::Execution { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn stop_before_start_skips_all_units() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|_| actions::ok());
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);
    let job = pipeline.resolve("all")?;

    let (stop, signal) = stop_channel();
    stop.stop();
    let summary = with_timeout(pipeline.run_with_stop(&job, signal)).await;

    assert!(summary.stopped);
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.units_with_status(UnitStatus::Skipped).len(), 4);
    assert!(executor.executions().is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_lets_in_flight_units_finish() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "A" => actions::sleeping(Duration::from_millis(300)),
        _ => actions::ok(),
    });
    let executor = RecordingExecutor::new();
    let pipeline = pipeline_with(registry, &executor);
    let job = pipeline.resolve("all")?;

    let (stop, signal) = stop_channel();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    });

    let summary = with_timeout(pipeline.run_with_stop(&job, signal)).await;
    stopper.await?;

    assert!(summary.stopped);
    assert_eq!(summary.status_of("A"), Some(UnitStatus::Succeeded));
    for unit in ["B", "C", "D"] {
        assert_eq!(summary.status_of(unit), Some(UnitStatus::Skipped));
        assert_eq!(
            summary.result_of(unit).and_then(|r| r.reason.clone()),
            Some(FailureReason::Stopped)
        );
    }
    assert_eq!(executor.started_order(), vec!["A".to_string()]);
    Ok(())
}

#[tokio::test]
async fn named_jobs_resolve_and_unknown_jobs_fail() -> TestResult {
    init_tracing();
    let registry = medical_registry(|_| actions::ok());
    let pipeline = Pipeline::new(Arc::new(registry)).with_job(JobDefinition::new(
        "transform_only",
        vec!["group:transform".to_string()],
    ))?;

    let summary = with_timeout(pipeline.run_job("transform_only")).await?;
    assert_eq!(summary.job, "transform_only");
    assert_eq!(summary.results.len(), 1);
    assert!(summary.is_success());

    let err = pipeline.run_job("nightly").await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownJob(ref j) if j == "nightly"));

    // A job name shadows nothing: selection expressions still resolve.
    let job = pipeline.resolve("group:enrich")?;
    assert_eq!(job.graph().len(), 2);
    Ok(())
}

#[tokio::test]
async fn bad_job_definition_fails_at_setup() {
    let registry = medical_registry(|_| actions::ok());
    let result = Pipeline::new(Arc::new(registry)).with_job(JobDefinition::new(
        "broken",
        vec!["unit:does_not_exist".to_string()],
    ));

    match result {
        Err(err) => assert!(err.is_configuration_error()),
        Ok(_) => panic!("job with unknown unit must be rejected"),
    }
}

#[tokio::test]
async fn summary_serializes_to_json() -> TestResult {
    init_tracing();
    let registry = diamond_registry(|name| match name {
        "D" => actions::failing("boom"),
        _ => actions::ok(),
    });
    let pipeline = Pipeline::new(Arc::new(registry));

    let summary = with_timeout(pipeline.submit("all")).await?;
    let json: serde_json::Value = serde_json::to_value(&summary)?;

    assert_eq!(json["status"], "failed");
    assert_eq!(json["results"]["D"]["status"], "failed");
    assert_eq!(json["results"]["D"]["reason"]["kind"], "execution");
    assert_eq!(json["results"]["A"]["status"], "succeeded");

    let table = summary.render();
    assert!(table.contains("boom"));
    Ok(())
}
