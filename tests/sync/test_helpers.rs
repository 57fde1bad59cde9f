//! Shared fixtures for sync BDD scenarios.

use std::cell::RefCell;
use std::future::Future;

use rstest::fixture;
use sortie::test_support::ScriptedRuntime;
use sortie::{Job, LifecycleConfig, SyncError, Synchronizer};
use tokio::runtime::Runtime;

pub struct SyncContext {
    pub runtime: RefCell<ScriptedRuntime>,
    pub job: RefCell<Job>,
    pub error: RefCell<Option<SyncError>>,
}

#[fixture]
pub fn sync_context() -> SyncContext {
    SyncContext {
        runtime: RefCell::new(ScriptedRuntime::new()),
        job: RefCell::new(Job::new(0, "tasks")),
        error: RefCell::new(None),
    }
}

/// Builds a synchroniser over a clone of the context's runtime.
pub fn synchronizer(sync_context: &SyncContext) -> Synchronizer<ScriptedRuntime> {
    Synchronizer::new(
        LifecycleConfig::default(),
        sync_context.runtime.borrow().clone(),
    )
    .unwrap_or_else(|err| panic!("default lifecycle config should validate: {err}"))
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    Runtime::new()
        .unwrap_or_else(|err| panic!("tokio runtime should start: {err}"))
        .block_on(future)
}
