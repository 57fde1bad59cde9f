//! BDD step definitions for the `sortie run` workflow.

use std::mem;
use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use sortie::job::BindKind;
use sortie::{Job, JobStatus};
use tokio::runtime::Runtime;

use super::test_helpers::{RunContext, RunOutcome, enable_logs, orchestrator};

fn tokio_runtime() -> Runtime {
    Runtime::new().unwrap_or_else(|err| panic!("tokio runtime should start: {err}"))
}

fn outcome(run_context: &RunContext) -> RunOutcome {
    run_context
        .outcome
        .borrow()
        .clone()
        .unwrap_or_else(|| panic!("no run outcome recorded"))
}

#[given("a component with \"{count}\" jobs")]
fn component_with_jobs(run_context: &RunContext, count: usize) {
    let jobs = (0..count).map(|index| {
        let mut job = Job::new(index, "tasks");
        job.parameters
            .bind(BindKind::Input, "IN", "s3://bucket/present");
        job
    });
    run_context.component.borrow_mut().add_jobs(jobs);
}

#[given("a concurrency limit of \"{limit}\"")]
fn concurrency_limit(run_context: &RunContext, limit: usize) {
    run_context.component.borrow_mut().concurrency = limit;
}

#[given("machines that take a moment to provision")]
fn slow_machines(run_context: &RunContext) {
    let mut backend = run_context.backend.borrow_mut();
    *backend = mem::take(&mut *backend).with_delay(Duration::from_millis(20));
    let mut runtime = run_context.runtime.borrow_mut();
    *runtime = mem::take(&mut *runtime).with_delay(Duration::from_millis(5));
}

#[given("the input of job \"{index}\" cannot be fetched")]
fn unreachable_input(run_context: &RunContext, index: usize) {
    let mut component = run_context.component.borrow_mut();
    let job = component
        .jobs
        .get_mut(index)
        .unwrap_or_else(|| panic!("component has no job {index}"));
    job.parameters
        .bind(BindKind::Input, "MISSING", "s3://bucket/missing");
    let mut runtime = run_context.runtime.borrow_mut();
    *runtime = mem::take(&mut *runtime).failing_exec("s3://bucket/missing", 2);
}

#[given("machines are kept after their job")]
fn keep_machines(run_context: &RunContext) {
    *run_context.keep.borrow_mut() = true;
}

#[given("destroying machine \"{machine}\" fails")]
fn failing_teardown(run_context: &RunContext, machine: String) {
    let mut backend = run_context.backend.borrow_mut();
    *backend = mem::take(&mut *backend).failing_destroy(machine);
}

#[given("job logs are written to a directory")]
fn job_logs(run_context: &RunContext) {
    enable_logs(run_context);
}

#[when("I run the component")]
fn run_component(run_context: &RunContext) {
    let orchestrator = orchestrator(run_context);
    let result = {
        let mut component = run_context.component.borrow_mut();
        tokio_runtime().block_on(orchestrator.run(&mut component))
    };
    let recorded = match result {
        Ok(summary) => RunOutcome::Finished(summary),
        Err(err) => RunOutcome::Failed(err.to_string()),
    };
    *run_context.outcome.borrow_mut() = Some(recorded);
    *run_context.orchestrator.borrow_mut() = Some(orchestrator);
}

#[when("I destroy the remaining machines")]
fn destroy_remaining(run_context: &RunContext) {
    let guard = run_context.orchestrator.borrow();
    let orchestrator = guard
        .as_ref()
        .unwrap_or_else(|| panic!("the component has not been run"));
    tokio_runtime()
        .block_on(orchestrator.destroy())
        .unwrap_or_else(|err| panic!("destroy should succeed: {err}"));
}

#[then("the run completes \"{count}\" jobs")]
fn run_completes(run_context: &RunContext, count: usize) {
    match outcome(run_context) {
        RunOutcome::Finished(summary) => assert_eq!(summary.completed, count),
        RunOutcome::Failed(message) => panic!("run failed unexpectedly: {message}"),
    }
    let component = run_context.component.borrow();
    assert!(
        component
            .jobs
            .iter()
            .all(|job| job.status == JobStatus::Completed),
        "every job should be completed"
    );
}

#[then("the run fails mentioning \"{text}\"")]
fn run_fails(run_context: &RunContext, text: String) {
    match outcome(run_context) {
        RunOutcome::Failed(message) => assert!(
            message.contains(&text),
            "expected failure mentioning {text}, got: {message}"
        ),
        RunOutcome::Finished(summary) => panic!("run should fail, got {summary:?}"),
    }
}

#[then("at most \"{limit}\" job machines were alive at once")]
fn bounded_live_machines(run_context: &RunContext, limit: usize) {
    let max_live = run_context.backend.borrow().max_live();
    assert!(max_live <= limit, "max live was {max_live}");
    assert!(max_live > 0, "no machine was ever alive");
}

#[then("job \"{name}\" is marked failed")]
fn job_failed(run_context: &RunContext, name: String) {
    let component = run_context.component.borrow();
    let job = component
        .jobs
        .iter()
        .find(|job| job.name() == name)
        .unwrap_or_else(|| panic!("no job named {name}"));
    assert!(
        matches!(job.status, JobStatus::Failed { .. }),
        "unexpected status {:?}",
        job.status
    );
}

#[then("\"{count}\" machines are kept")]
fn machines_kept(run_context: &RunContext, count: usize) {
    match outcome(run_context) {
        RunOutcome::Finished(summary) => assert_eq!(summary.kept, count),
        RunOutcome::Failed(message) => panic!("run failed unexpectedly: {message}"),
    }
    assert_eq!(run_context.backend.borrow().live().len(), count);
}

#[then("no machines remain")]
fn no_machines_remain(run_context: &RunContext) {
    let live = run_context.backend.borrow().live();
    assert!(live.is_empty(), "machines still alive: {live:?}");
}

#[then("every job has a log file")]
fn job_log_files(run_context: &RunContext) {
    let component = run_context.component.borrow();
    for job in &component.jobs {
        let path = run_context.log_dir.join(format!("{}.log", job.name()));
        assert!(path.is_file(), "missing log file {path}");
    }
}
