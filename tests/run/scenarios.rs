//! BDD scenarios for the run workflow.

use rstest_bdd_macros::scenario;

use super::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Bound the number of live job machines"
)]
fn scenario_bound_live_machines(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Fail the run when an input cannot be fetched"
)]
fn scenario_fetch_failure(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Keep machines for inspection and destroy them later"
)]
fn scenario_keep_and_destroy(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Surface teardown failure after success"
)]
fn scenario_teardown_failure(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Write one log file per job"
)]
fn scenario_job_logs(run_context: RunContext) {
    drop(run_context);
}
