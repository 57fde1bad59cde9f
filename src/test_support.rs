//! Test support utilities shared across unit and integration tests.
//!
//! The doubles implement the crate's capability traits over shared state so
//! a test can keep a clone for assertions after handing another clone to the
//! code under test.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::backend::{Backend, BackendError, BackendFuture, MachineHandle, MachineRequest};
use crate::exec::{
    CommandOutput, CommandRunner, ContainerHandle, ContainerRuntime, ContainerSpec, ExecError,
    ExecFuture, Execution,
};
use crate::resource::Env;

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.lock().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ExecFuture<'a, CommandOutput> {
        self.invocations.lock().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = self.responses.lock().pop_front();
        Box::pin(async move {
            response.ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// Errors raised by [`RecordingBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RecordingBackendError {
    /// The request failed validation.
    #[error(transparent)]
    Invalid(#[from] BackendError),
    /// Creation was scripted to fail for this machine.
    #[error("simulated create failure for {0}")]
    Create(String),
    /// Destruction was scripted to fail for this machine.
    #[error("simulated destroy failure for {0}")]
    Destroy(String),
}

#[derive(Debug, Default)]
struct BackendState {
    live: BTreeSet<String>,
    max_live: usize,
    created: Vec<String>,
    destroyed: Vec<String>,
}

/// In-memory backend tracking how many machines are alive at once.
#[derive(Clone, Debug, Default)]
pub struct RecordingBackend {
    state: Arc<Mutex<BackendState>>,
    delay: Duration,
    fail_create: Vec<String>,
    fail_destroy: Vec<String>,
}

impl RecordingBackend {
    /// Creates a backend whose operations always succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every create so admitted jobs overlap.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails creation of the machine called `name`.
    #[must_use]
    pub fn failing_create(mut self, name: impl Into<String>) -> Self {
        self.fail_create.push(name.into());
        self
    }

    /// Fails destruction of the machine called `name`; it stays live.
    #[must_use]
    pub fn failing_destroy(mut self, name: impl Into<String>) -> Self {
        self.fail_destroy.push(name.into());
        self
    }

    /// Names of machines currently alive.
    #[must_use]
    pub fn live(&self) -> Vec<String> {
        self.state.lock().live.iter().cloned().collect()
    }

    /// Highest number of simultaneously alive machines observed.
    #[must_use]
    pub fn max_live(&self) -> usize {
        self.state.lock().max_live
    }

    /// Machines created, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    /// Machines destroyed, in destruction order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().destroyed.clone()
    }
}

impl Backend for RecordingBackend {
    type Error = RecordingBackendError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_create.contains(&request.name) {
                return Err(RecordingBackendError::Create(request.name.clone()));
            }
            let mut state = self.state.lock();
            state.live.insert(request.name.clone());
            state.max_live = state.max_live.max(state.live.len());
            state.created.push(request.name.clone());
            Ok(MachineHandle {
                name: request.name.clone(),
                address: format!("10.0.0.{}", state.created.len()),
            })
        })
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            if self.fail_destroy.contains(&handle.name) {
                return Err(RecordingBackendError::Destroy(handle.name));
            }
            let mut state = self.state.lock();
            state.live.remove(&handle.name);
            state.destroyed.push(handle.name);
            Ok(())
        })
    }
}

/// Execution observed by [`ScriptedRuntime`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedExecution {
    /// Container the execution ran in.
    pub container: String,
    /// Snippet passed to the shell.
    pub inline: String,
    /// Per-execution environment.
    pub env: Vec<Env>,
}

impl RecordedExecution {
    /// Value of the environment variable `name`, if set.
    #[must_use]
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|env| env.name == name)
            .map(|env| env.value.as_str())
    }
}

/// File copy observed by [`ScriptedRuntime`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCopy {
    /// Machine receiving the file.
    pub machine: String,
    /// Local source path.
    pub source: Utf8PathBuf,
    /// Destination on the machine.
    pub destination: Utf8PathBuf,
}

#[derive(Debug, Default)]
struct RuntimeState {
    started: Vec<ContainerSpec>,
    executions: Vec<RecordedExecution>,
    copies: Vec<RecordedCopy>,
    in_flight: usize,
    max_in_flight: usize,
    finished: usize,
}

/// In-memory container runtime returning scripted exit codes.
///
/// Executions succeed unless their snippet or an environment value contains
/// a registered failure pattern.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRuntime {
    state: Arc<Mutex<RuntimeState>>,
    exec_failures: Vec<(String, i32)>,
    start_failures: Vec<String>,
    slow_execs: Vec<(String, Duration)>,
    delay: Duration,
}

impl ScriptedRuntime {
    /// Creates a runtime where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exits with `code` for executions mentioning `pattern`.
    #[must_use]
    pub fn failing_exec(mut self, pattern: impl Into<String>, code: i32) -> Self {
        self.exec_failures.push((pattern.into(), code));
        self
    }

    /// Fails to start containers whose name contains `pattern`.
    #[must_use]
    pub fn failing_start(mut self, pattern: impl Into<String>) -> Self {
        self.start_failures.push(pattern.into());
        self
    }

    /// Sleeps for `delay` inside every execution.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleeps for `delay` instead of the default for executions mentioning
    /// `pattern`.
    #[must_use]
    pub fn slow_exec(mut self, pattern: impl Into<String>, delay: Duration) -> Self {
        self.slow_execs.push((pattern.into(), delay));
        self
    }

    /// Highest number of executions observed running at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Executions that ran to completion; dropped executions are not counted.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.state.lock().finished
    }

    /// Containers started so far.
    #[must_use]
    pub fn started(&self) -> Vec<ContainerSpec> {
        self.state.lock().started.clone()
    }

    /// Executions issued so far, in issue order.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.state.lock().executions.clone()
    }

    /// Copies issued so far.
    #[must_use]
    pub fn copies(&self) -> Vec<RecordedCopy> {
        self.state.lock().copies.clone()
    }

    fn exit_code_for(&self, execution: &Execution) -> i32 {
        self.exec_failures
            .iter()
            .find(|(pattern, _)| mentions(execution, pattern))
            .map_or(0, |(_, code)| *code)
    }

    fn delay_for(&self, execution: &Execution) -> Duration {
        self.slow_execs
            .iter()
            .find(|(pattern, _)| mentions(execution, pattern))
            .map_or(self.delay, |(_, delay)| *delay)
    }
}

fn mentions(execution: &Execution, pattern: &str) -> bool {
    execution.inline.contains(pattern)
        || execution
            .env
            .iter()
            .any(|env| env.value.contains(pattern))
}

impl ContainerRuntime for ScriptedRuntime {
    fn start<'a>(
        &'a self,
        machine: &'a MachineHandle,
        spec: &'a ContainerSpec,
    ) -> ExecFuture<'a, ContainerHandle> {
        Box::pin(async move {
            if self
                .start_failures
                .iter()
                .any(|pattern| spec.name.contains(pattern.as_str()))
            {
                return Err(ExecError::CommandFailure {
                    program: String::from("docker"),
                    status: Some(125),
                    status_text: String::from("125"),
                    stderr: format!("simulated start failure for {}", spec.name),
                });
            }
            self.state.lock().started.push(spec.clone());
            Ok(ContainerHandle {
                machine: machine.clone(),
                name: spec.name.clone(),
            })
        })
    }

    fn exec<'a>(
        &'a self,
        container: &'a ContainerHandle,
        execution: &'a Execution,
    ) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                state.executions.push(RecordedExecution {
                    container: container.name.clone(),
                    inline: execution.inline.clone(),
                    env: execution.env.clone(),
                });
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
            }
            let delay = self.delay_for(execution);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            {
                let mut state = self.state.lock();
                state.in_flight -= 1;
                state.finished += 1;
            }
            let code = self.exit_code_for(execution);
            Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    String::from("simulated failure")
                },
            })
        })
    }

    fn copy_in<'a>(
        &'a self,
        machine: &'a MachineHandle,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().copies.push(RecordedCopy {
                machine: machine.name.clone(),
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
