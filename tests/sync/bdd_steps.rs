//! BDD step definitions for job data synchronisation.

use std::mem;

use rstest_bdd_macros::{given, then, when};
use sortie::exec::ContainerHandle;
use sortie::job::BindKind;
use sortie::logging::JobLog;
use sortie::{MachineHandle, SyncError};

use super::test_helpers::{SyncContext, block_on, synchronizer};

#[given("a job reading \"{input}\" and writing \"{output}\"")]
fn job_with_data(sync_context: &SyncContext, input: String, output: String) {
    let mut job = sync_context.job.borrow_mut();
    job.parameters.bind(BindKind::Input, "IN", &input);
    job.parameters.bind(BindKind::Output, "OUT", &output);
}

#[given("a running lifecycle container")]
fn running_routine(sync_context: &SyncContext) {
    sync_context.job.borrow_mut().container.routine = Some(ContainerHandle {
        machine: MachineHandle {
            name: String::from("tasks00"),
            address: String::from("10.0.0.1"),
        },
        name: String::from("tasks00-routine"),
    });
}

#[given("downloads of \"{url}\" exit with status \"{code}\"")]
fn failing_download(sync_context: &SyncContext, url: String, code: i32) {
    let mut runtime = sync_context.runtime.borrow_mut();
    *runtime = mem::take(&mut *runtime).failing_exec(url, code);
}

#[when("I fetch the job data")]
fn fetch(sync_context: &SyncContext) {
    let synchronizer = synchronizer(sync_context);
    let log = JobLog::detached("tasks-00");
    let result = {
        let mut job = sync_context.job.borrow_mut();
        block_on(synchronizer.fetch(&mut job, &log))
    };
    *sync_context.error.borrow_mut() = result.err();
}

#[when("I publish the job data")]
fn publish(sync_context: &SyncContext) {
    let synchronizer = synchronizer(sync_context);
    let log = JobLog::detached("tasks-00");
    let result = {
        let mut job = sync_context.job.borrow_mut();
        block_on(synchronizer.publish(&mut job, &log))
    };
    *sync_context.error.borrow_mut() = result.err();
}

#[then("the script sees \"{name}\" at \"{path}\"")]
fn script_env(sync_context: &SyncContext, name: String, path: String) {
    if let Some(err) = sync_context.error.borrow().as_ref() {
        panic!("fetch failed unexpectedly: {err}");
    }
    let job = sync_context.job.borrow();
    let value = job
        .container
        .envs
        .iter()
        .find(|env| env.name == name)
        .map(|env| env.value.clone());
    assert_eq!(value.as_deref(), Some(path.as_str()));
}

#[then("the output directory \"{dir}\" is created")]
fn output_dir_created(sync_context: &SyncContext, dir: String) {
    let expected = format!("mkdir -p {dir}");
    let executions = sync_context.runtime.borrow().executions();
    assert!(
        executions.iter().any(|exec| exec.inline == expected),
        "no `{expected}` among {executions:?}"
    );
}

#[then("\"{count}\" upload is issued")]
fn uploads_issued(sync_context: &SyncContext, count: usize) {
    if let Some(err) = sync_context.error.borrow().as_ref() {
        panic!("publish failed unexpectedly: {err}");
    }
    let uploads = sync_context
        .runtime
        .borrow()
        .executions()
        .into_iter()
        .filter(|exec| exec.inline.contains("upload.sh"))
        .count();
    assert_eq!(uploads, count);
}

#[then("the sync error names \"{url}\" with status \"{code}\"")]
fn transfer_error(sync_context: &SyncContext, url: String, code: i32) {
    let error = sync_context.error.borrow();
    let Some(SyncError::Transfer {
        url: failed,
        status,
        ..
    }) = error.as_ref()
    else {
        panic!("expected a transfer error, got {error:?}");
    };
    assert_eq!(*failed, url);
    assert_eq!(*status, Some(code));
}

#[then("the sync error reports a missing lifecycle container")]
fn missing_routine(sync_context: &SyncContext) {
    let error = sync_context.error.borrow();
    assert!(
        matches!(error.as_ref(), Some(SyncError::MissingRoutine { job }) if job == "tasks-00"),
        "unexpected error {error:?}"
    );
}
