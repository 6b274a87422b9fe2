// tests/scheduler_state_machine.rs

mod common;
use crate::common::{actions, diamond_registry, init_tracing, medical_registry};

use std::error::Error;

use pipedag::dag::{Job, Scheduler, SkipCause, UnitOutcome};
use pipedag::types::UnitStatus;

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler_for(selection: &str) -> Result<Scheduler, Box<dyn Error>> {
    let registry = diamond_registry(|_| actions::ok());
    let job = Job::from_selection(&registry, "test", &[selection])?;
    Ok(Scheduler::new(job.graph().clone()))
}

#[test]
fn start_readies_only_roots() -> TestResult {
    init_tracing();
    let mut scheduler = scheduler_for("all")?;

    let step = scheduler.start();
    assert_eq!(step.newly_ready, vec!["A".to_string()]);
    assert!(!step.run_just_finished);
    assert_eq!(scheduler.status_of("B"), Some(UnitStatus::Pending));
    assert!(scheduler.status_of("A").is_some_and(|s| !s.is_terminal()));
    assert_eq!(scheduler.deps_satisfied("B"), Some(false));
    assert_eq!(scheduler.deps_satisfied("nope"), None);
    Ok(())
}

#[test]
fn success_unblocks_dependents_in_order() -> TestResult {
    let mut scheduler = scheduler_for("all")?;
    scheduler.start();

    assert_eq!(scheduler.next_ready().as_deref(), Some("A"));
    assert_eq!(scheduler.status_of("A"), Some(UnitStatus::Running));
    assert_eq!(scheduler.next_ready(), None);

    let step = scheduler.handle_completion("A", UnitOutcome::Succeeded);
    assert_eq!(step.newly_ready, vec!["B".to_string(), "C".to_string()]);

    assert_eq!(scheduler.next_ready().as_deref(), Some("B"));
    assert_eq!(scheduler.next_ready().as_deref(), Some("C"));

    // D waits for both.
    let step = scheduler.handle_completion("B", UnitOutcome::Succeeded);
    assert!(step.newly_ready.is_empty());
    let step = scheduler.handle_completion("C", UnitOutcome::Succeeded);
    assert_eq!(step.newly_ready, vec!["D".to_string()]);

    assert_eq!(scheduler.next_ready().as_deref(), Some("D"));
    let step = scheduler.handle_completion("D", UnitOutcome::Succeeded);
    assert!(step.run_just_finished);
    assert!(scheduler.is_finished());
    Ok(())
}

#[test]
fn failure_skips_transitive_dependents() -> TestResult {
    let mut scheduler = scheduler_for("all")?;
    scheduler.start();
    scheduler.next_ready();

    let step = scheduler.handle_completion("A", UnitOutcome::Failed);
    let mut skipped: Vec<&str> = step.newly_skipped.iter().map(|s| s.unit.as_str()).collect();
    skipped.sort();
    assert_eq!(skipped, vec!["B", "C", "D"]);
    assert!(
        step.newly_skipped
            .iter()
            .all(|s| s.cause == SkipCause::UpstreamFailed("A".to_string()))
    );
    assert!(step.run_just_finished);
    assert_eq!(scheduler.status_of("A"), Some(UnitStatus::Failed));
    assert_eq!(scheduler.status_of("D"), Some(UnitStatus::Skipped));
    Ok(())
}

#[test]
fn failure_leaves_independent_branch_running() -> TestResult {
    let mut scheduler = scheduler_for("all")?;
    scheduler.start();
    scheduler.next_ready();
    scheduler.handle_completion("A", UnitOutcome::Succeeded);
    scheduler.next_ready();
    scheduler.next_ready();

    let step = scheduler.handle_completion("B", UnitOutcome::Failed);
    let skipped: Vec<&str> = step.newly_skipped.iter().map(|s| s.unit.as_str()).collect();
    assert_eq!(skipped, vec!["D"]);
    assert_eq!(scheduler.status_of("C"), Some(UnitStatus::Running));
    assert!(!step.run_just_finished);

    let step = scheduler.handle_completion("C", UnitOutcome::Succeeded);
    assert!(step.newly_ready.is_empty());
    assert!(step.run_just_finished);
    Ok(())
}

#[test]
fn stop_skips_everything_not_dispatched() -> TestResult {
    let mut scheduler = scheduler_for("all")?;
    scheduler.start();
    scheduler.next_ready();

    let step = scheduler.request_stop();
    assert_eq!(step.newly_skipped.len(), 3);
    assert!(step.newly_skipped.iter().all(|s| s.cause == SkipCause::StopRequested));
    assert!(scheduler.is_stopping());
    assert_eq!(scheduler.running_units(), vec!["A".to_string()]);

    // The running unit may still finish; nothing new becomes ready.
    let step = scheduler.handle_completion("A", UnitOutcome::Succeeded);
    assert!(step.newly_ready.is_empty());
    assert!(step.run_just_finished);
    Ok(())
}

#[test]
fn stray_completions_are_ignored() -> TestResult {
    let mut scheduler = scheduler_for("all")?;
    scheduler.start();

    // Not running yet, and not in the job at all.
    let step = scheduler.handle_completion("A", UnitOutcome::Succeeded);
    assert!(step.newly_ready.is_empty());
    let step = scheduler.handle_completion("Z", UnitOutcome::Failed);
    assert!(step.newly_skipped.is_empty());

    assert_eq!(scheduler.status_of("A"), Some(UnitStatus::Pending));
    Ok(())
}

#[test]
fn empty_job_is_finished_immediately() -> TestResult {
    let registry = medical_registry(|_| actions::ok());
    let job = Job::from_units(&registry, "empty", &Default::default());
    let mut scheduler = Scheduler::new(job.graph().clone());

    let step = scheduler.start();
    assert!(step.newly_ready.is_empty());
    assert!(step.run_just_finished);
    assert!(scheduler.is_finished());
    Ok(())
}

#[test]
fn roots_of_a_subset_ignore_outside_predecessors() -> TestResult {
    let mut scheduler = scheduler_for("unit:D")?;

    // B and C are outside the job, so D has no in-job predecessors.
    let step = scheduler.start();
    assert_eq!(step.newly_ready, vec!["D".to_string()]);
    Ok(())
}
