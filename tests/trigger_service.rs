// tests/trigger_service.rs

mod common;
use crate::common::{actions, init_tracing, medical_registry};

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use pipedag::dag::JobDefinition;
use pipedag::engine::Pipeline;
use pipedag::errors::PipelineError;
use pipedag::trigger::{CronSchedule, FireDecision, FiringQueue, TriggerService};
use pipedag::types::{Metadata, UnitStatus};
use pipedag_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Result<DateTime<Utc>, Box<dyn Error>> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .ok_or_else(|| "ambiguous timestamp".into())
}

fn medical_pipeline(transform_delay: Duration) -> Result<Arc<Pipeline>, Box<dyn Error>> {
    let registry = medical_registry(|name| match name {
        "dbt_transform" => actions::sleeping(transform_delay),
        _ => actions::ok(),
    });
    let pipeline = Pipeline::new(Arc::new(registry))
        .with_job(JobDefinition::new("full_pipeline", vec!["all".to_string()]))?
        .with_job(JobDefinition::new(
            "transform_only",
            vec!["group:transform".to_string()],
        ))?;
    Ok(Arc::new(pipeline))
}

#[test]
fn five_field_cron_fires_at_second_zero() -> TestResult {
    let daily = CronSchedule::parse("0 2 * * *")?;
    assert_eq!(daily.expression(), "0 2 * * *");

    let next = daily.next_after(at(2025, 3, 14, 13, 30)?).ok_or("never fires")?;
    assert_eq!(next, at(2025, 3, 15, 2, 0)?);

    // Strictly after: a fire time is not returned again.
    let following = daily.next_after(next).ok_or("never fires")?;
    assert_eq!(following, at(2025, 3, 16, 2, 0)?);
    Ok(())
}

#[test]
fn six_hourly_schedule_steps_through_the_day() -> TestResult {
    let schedule: CronSchedule = "0 */6 * * *".parse()?;
    let upcoming = schedule.upcoming_after(at(2025, 1, 1, 1, 0)?, 4);

    let hours: Vec<u32> = upcoming.iter().map(|t| t.hour()).collect();
    assert_eq!(hours, vec![6, 12, 18, 0]);
    assert!(upcoming.iter().all(|t| t.minute() == 0 && t.second() == 0));
    Ok(())
}

#[test]
fn seconds_field_is_accepted() -> TestResult {
    let schedule = CronSchedule::parse("30 15 4 * * *")?;
    let next = schedule.next_after(at(2025, 6, 1, 0, 0)?).ok_or("never fires")?;
    assert_eq!((next.hour(), next.minute(), next.second()), (4, 15, 30));
    Ok(())
}

#[test]
fn five_field_weekdays_use_crontab_numbering() -> TestResult {
    // Wednesday.
    let after = at(2026, 10, 14, 12, 0)?;
    let weekday_of = |expr: &str| -> Result<Weekday, Box<dyn Error>> {
        let next = CronSchedule::parse(expr)?
            .next_after(after)
            .ok_or("never fires")?;
        Ok(next.weekday())
    };

    assert_eq!(weekday_of("0 2 * * 1")?, Weekday::Mon);
    assert_eq!(weekday_of("0 2 * * 0")?, Weekday::Sun);
    assert_eq!(weekday_of("0 2 * * 7")?, Weekday::Sun);
    assert_eq!(weekday_of("0 2 * * 6")?, Weekday::Sat);
    assert_eq!(weekday_of("0 2 * * MON")?, Weekday::Mon);

    let monday = CronSchedule::parse("0 2 * * 1")?.next_after(after).ok_or("never fires")?;
    assert_eq!(monday, at(2026, 10, 19, 2, 0)?);

    let weekdays: Vec<Weekday> = CronSchedule::parse("0 2 * * 1-5")?
        .upcoming_after(after, 5)
        .iter()
        .map(|t| t.weekday())
        .collect();
    assert_eq!(
        weekdays,
        vec![Weekday::Thu, Weekday::Fri, Weekday::Mon, Weekday::Tue, Weekday::Wed]
    );

    let weekend: Vec<Weekday> = CronSchedule::parse("0 2 * * 6,0")?
        .upcoming_after(after, 2)
        .iter()
        .map(|t| t.weekday())
        .collect();
    assert_eq!(weekend, vec![Weekday::Sat, Weekday::Sun]);

    let every_other: Vec<Weekday> = CronSchedule::parse("0 2 * * */2")?
        .upcoming_after(after, 4)
        .iter()
        .map(|t| t.weekday())
        .collect();
    assert_eq!(
        every_other,
        vec![Weekday::Thu, Weekday::Sat, Weekday::Sun, Weekday::Tue]
    );
    Ok(())
}

#[test]
fn malformed_cron_is_rejected() {
    for bad in [
        "",
        "* * *",
        "0 2 * *",
        "61 2 * * *",
        "0 2 * * * * * *",
        "nightly",
        "0 2 * * 8",
        "0 2 * * 5-1",
        "0 2 * * */0",
    ] {
        assert!(
            matches!(CronSchedule::parse(bad), Err(PipelineError::InvalidCron { .. })),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn firing_queue_defers_then_drops() {
    let mut queue = FiringQueue::new(1);

    assert_eq!(queue.on_fire("full_pipeline"), FireDecision::Start);
    assert_eq!(queue.on_fire("full_pipeline"), FireDecision::Deferred);
    assert_eq!(queue.on_fire("full_pipeline"), FireDecision::Dropped);
    assert_eq!(queue.deferred("full_pipeline"), 1);

    // Other jobs are independent.
    assert_eq!(queue.on_fire("transform_only"), FireDecision::Start);

    assert!(queue.on_finished("full_pipeline"));
    assert!(queue.is_in_flight("full_pipeline"));
    assert_eq!(queue.deferred("full_pipeline"), 0);

    assert!(!queue.on_finished("full_pipeline"));
    assert!(!queue.is_in_flight("full_pipeline"));

    assert!(!queue.on_finished("transform_only"));
    assert!(queue.is_idle());
}

#[test]
fn firing_queue_length_is_at_least_one() {
    let mut queue = FiringQueue::new(0);
    assert_eq!(queue.queue_length(), 1);

    queue.on_fire("job");
    assert_eq!(queue.on_fire("job"), FireDecision::Deferred);
    assert_eq!(queue.clear_deferred(), 1);
    assert!(!queue.on_finished("job"));
}

#[test]
fn declare_validates_job_and_cron() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::ZERO)?, 1);

    let handle = service.declare("daily", "0 2 * * *", "full_pipeline")?;
    assert_eq!(handle.job(), "full_pipeline");
    assert_eq!(handle.to_string(), "daily (0 2 * * * -> full_pipeline)");

    assert!(matches!(
        service.declare("nightly", "0 3 * * *", "nonexistent"),
        Err(PipelineError::UnknownJob(_))
    ));
    assert!(matches!(
        service.declare("broken", "whenever", "full_pipeline"),
        Err(PipelineError::InvalidCron { .. })
    ));
    assert!(matches!(
        service.declare("daily", "0 4 * * *", "transform_only"),
        Err(PipelineError::ConfigError(_))
    ));
    assert_eq!(service.triggers().len(), 1);
    Ok(())
}

#[tokio::test]
async fn next_fire_times_are_sorted() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::ZERO)?, 1);
    service.declare("daily_full_pipeline", "0 2 * * *", "full_pipeline")?;
    service.declare("six_hourly_transform", "0 */6 * * *", "transform_only")?;
    let handle = service.spawn();

    let times = handle.next_fire_times(at(2025, 5, 1, 1, 0)?);
    assert_eq!(
        times,
        vec![
            ("daily_full_pipeline".to_string(), at(2025, 5, 1, 2, 0)?),
            ("six_hourly_transform".to_string(), at(2025, 5, 1, 6, 0)?),
        ]
    );

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn overlapping_firings_are_deferred_then_dropped() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::from_millis(300))?, 1);
    service.declare("transform", "0 0 1 1 *", "transform_only")?;
    let handle = service.spawn();
    let mut summaries = handle.subscribe();

    assert_eq!(handle.fire_now("transform").await?, FireDecision::Start);
    assert_eq!(handle.fire_now("transform").await?, FireDecision::Deferred);
    assert_eq!(handle.fire_now("transform").await?, FireDecision::Dropped);

    let first = with_timeout(summaries.recv()).await?;
    let second = with_timeout(summaries.recv()).await?;
    for summary in [&first, &second] {
        assert_eq!(summary.job, "transform_only");
        assert_eq!(summary.status_of("dbt_transform"), Some(UnitStatus::Succeeded));
    }
    assert!(second.run_id > first.run_id);

    // The deferred run started only after the first one finished.
    let (Some(first_end), Some(second_start)) = (
        first.result_of("dbt_transform").and_then(|r| r.finished_at),
        second.result_of("dbt_transform").and_then(|r| r.started_at),
    ) else {
        return Err("missing timestamps".into());
    };
    assert!(second_start >= first_end);

    // Nothing was queued behind the dropped firing. Give the service a
    // moment to observe the second run finishing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.fire_now("transform").await?, FireDecision::Start);
    let third = with_timeout(summaries.recv()).await?;
    assert!(third.is_success());

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn different_jobs_run_side_by_side() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::from_millis(200))?, 1);
    service.declare("full", "0 2 * * *", "full_pipeline")?;
    service.declare("transform", "0 */6 * * *", "transform_only")?;
    let handle = service.spawn();
    let mut summaries = handle.subscribe();

    assert_eq!(handle.fire_now("full").await?, FireDecision::Start);
    assert_eq!(handle.fire_now("transform").await?, FireDecision::Start);

    let mut jobs = vec![
        with_timeout(summaries.recv()).await?.job,
        with_timeout(summaries.recv()).await?.job,
    ];
    jobs.sort();
    assert_eq!(jobs, vec!["full_pipeline", "transform_only"]);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_trigger_cannot_be_fired() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::ZERO)?, 1);
    service.declare("daily", "0 2 * * *", "full_pipeline")?;
    let handle = service.spawn();

    assert!(matches!(
        handle.fire_now("hourly").await,
        Err(PipelineError::ConfigError(_))
    ));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_runs() -> TestResult {
    init_tracing();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    let registry = medical_registry(move |name| match name {
        "telegram_scraper" => {
            let counter = Arc::clone(&counter);
            pipedag::dag::action_fn(move || {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(Metadata::new())
                }
            })
        }
        _ => actions::ok(),
    });
    let pipeline = Pipeline::new(Arc::new(registry))
        .with_job(JobDefinition::new("full_pipeline", vec!["all".to_string()]))?;

    let mut service = TriggerService::new(Arc::new(pipeline), 1);
    service.declare("daily", "0 2 * * *", "full_pipeline")?;
    let handle = service.spawn();
    let mut summaries = handle.subscribe();

    assert_eq!(handle.fire_now("daily").await?, FireDecision::Start);
    assert_eq!(handle.fire_now("daily").await?, FireDecision::Deferred);
    // Let the scraper get dispatched before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;
    with_timeout(handle.shutdown()).await;

    // The in-flight scraper finished; the deferred firing never started and
    // everything after the scraper was skipped by the stop.
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    let summary = summaries.recv().await?;
    assert!(summary.stopped);
    assert_eq!(summary.status_of("telegram_scraper"), Some(UnitStatus::Succeeded));
    assert_eq!(summary.status_of("data_loader"), Some(UnitStatus::Skipped));
    assert!(summaries.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn cron_firings_submit_the_job_once_per_instant() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::ZERO)?, 1);
    service.declare("every_second", "* * * * * *", "transform_only")?;
    let handle = service.spawn();
    let mut summaries = handle.subscribe();

    let mut starts = Vec::new();
    for _ in 0..3 {
        let summary = with_timeout(summaries.recv()).await?;
        assert_eq!(summary.job, "transform_only");
        assert!(summary.is_success());
        let started = summary
            .result_of("dbt_transform")
            .and_then(|r| r.started_at)
            .ok_or("missing start time")?;
        starts.push(started);
    }
    handle.shutdown().await;

    // One run per firing instant, a second apart.
    for pair in starts.windows(2) {
        let gap = (pair[1] - pair[0]).num_milliseconds();
        assert!(gap >= 500, "runs {gap}ms apart");
    }
    Ok(())
}

#[tokio::test]
async fn cron_firings_during_a_run_are_deferred() -> TestResult {
    init_tracing();
    let mut service = TriggerService::new(medical_pipeline(Duration::from_millis(1500))?, 1);
    service.declare("every_second", "* * * * * *", "transform_only")?;
    let handle = service.spawn();
    let mut summaries = handle.subscribe();

    let first = with_timeout(summaries.recv()).await?;
    let second = with_timeout(summaries.recv()).await?;
    handle.shutdown().await;

    let (Some(first_end), Some(second_start)) = (
        first.result_of("dbt_transform").and_then(|r| r.finished_at),
        second.result_of("dbt_transform").and_then(|r| r.started_at),
    ) else {
        return Err("missing timestamps".into());
    };
    assert!(
        second_start >= first_end,
        "runs of the same job overlapped: {second_start} < {first_end}"
    );
    Ok(())
}
