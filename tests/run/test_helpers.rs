//! Shared fixtures for run BDD scenarios.

use std::cell::RefCell;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use sortie::component::Script;
use sortie::test_support::{RecordingBackend, ScriptedRuntime};
use sortie::{
    Component, JobLogFactory, LifecycleConfig, RunOrchestrator, RunSummary, Synchronizer,
};
use tempfile::TempDir;
use thiserror::Error;

/// Orchestrator wired to the in-memory doubles.
pub type TestOrchestrator = RunOrchestrator<RecordingBackend, ScriptedRuntime>;

/// State shared between the steps of one scenario.
///
/// Steps borrow the context, so mutable pieces sit behind `RefCell`.
pub struct RunContext {
    pub backend: RefCell<RecordingBackend>,
    pub runtime: RefCell<ScriptedRuntime>,
    pub component: RefCell<Component>,
    pub keep: RefCell<bool>,
    pub orchestrator: RefCell<Option<TestOrchestrator>>,
    pub outcome: RefCell<Option<RunOutcome>>,
    pub log_dir: Utf8PathBuf,
    _log_tmp: Arc<TempDir>,
}

/// Result of the most recent orchestration step.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// The run finished.
    Finished(RunSummary),
    /// The run returned an error, rendered for assertions.
    Failed(String),
}

#[derive(Debug, Error)]
pub enum RunTestError {
    #[error("failed to create workspace: {0}")]
    Workspace(String),
}

#[fixture]
pub fn run_context() -> RunContext {
    build_run_context()
        .unwrap_or_else(|err| panic!("run context fixture should initialise: {err}"))
}

pub fn build_run_context() -> Result<RunContext, RunTestError> {
    let tmp = TempDir::new().map_err(|err| RunTestError::Workspace(format!("tempdir: {err}")))?;
    let log_dir = Utf8PathBuf::from_path_buf(tmp.path().join("log")).map_err(|path| {
        RunTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
    })?;

    let mut component = Component::template("tasks.tsv");
    component.machine.name_prefix = String::from("tasks");
    component.runtime.script = Some(Script {
        path: Utf8PathBuf::from("run.sh"),
    });

    Ok(RunContext {
        backend: RefCell::new(RecordingBackend::new()),
        runtime: RefCell::new(ScriptedRuntime::new()),
        component: RefCell::new(component),
        keep: RefCell::new(false),
        orchestrator: RefCell::new(None),
        outcome: RefCell::new(None),
        log_dir,
        _log_tmp: Arc::new(tmp),
    })
}

/// Builds an orchestrator over clones of the context's doubles.
pub fn orchestrator(run_context: &RunContext) -> TestOrchestrator {
    let runtime = run_context.runtime.borrow().clone();
    let sync = Synchronizer::new(LifecycleConfig::default(), runtime)
        .unwrap_or_else(|err| panic!("default lifecycle config should validate: {err}"));
    RunOrchestrator::new(run_context.backend.borrow().clone(), sync)
        .with_keep(*run_context.keep.borrow())
}

/// Enables per-job log files under the context's temporary directory.
pub fn enable_logs(run_context: &RunContext) {
    let logs = JobLogFactory::in_dir(&run_context.log_dir)
        .unwrap_or_else(|err| panic!("log directory should be created: {err}"));
    run_context.component.borrow_mut().logs = logs;
}
