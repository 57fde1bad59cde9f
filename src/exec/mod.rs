//! Command and container execution capabilities.
//!
//! [`CommandRunner`] abstracts spawning a local process so drivers can be
//! exercised with scripted fakes. [`ContainerRuntime`] abstracts starting
//! containers on a provisioned machine and executing shell snippets inside
//! them; the orchestrator and the synchroniser depend only on this trait.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use camino::Utf8Path;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::backend::MachineHandle;
use crate::resource::Env;

/// Future returned by execution capabilities.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ExecError>> + Send + 'a>>;

/// Errors surfaced while running local commands or container executions.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a driver command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit status rendered for messages, `unknown` when killed by a signal.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Converts a non-zero status into [`ExecError::CommandFailure`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::CommandFailure`] unless the exit code is zero.
    pub fn into_success(self, program: &str) -> Result<Self, ExecError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ExecError::CommandFailure {
            program: program.to_owned(),
            status: self.code,
            status_text: self.status_text(),
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`], not as
    /// an error.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString])
    -> ExecFuture<'a, CommandOutput>;
}

/// Real command runner that spawns host processes and forwards each output
/// line to `tracing` as it arrives.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|err| ExecError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (stdout, stderr, waited) = tokio::join!(
                forward_lines(stdout, program, "stdout"),
                forward_lines(stderr, program, "stderr"),
                child.wait(),
            );
            let status = waited.map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

            Ok(CommandOutput {
                code: status.code(),
                stdout,
                stderr,
            })
        })
    }
}

async fn forward_lines<S>(stream: Option<S>, program: &str, label: &'static str) -> String
where
    S: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(pipe) = stream else {
        return captured;
    };
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(program, stream = label, "{line}");
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

/// Handle to a running container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerHandle {
    /// Machine hosting the container.
    pub machine: MachineHandle,
    /// Container name, unique on its machine.
    pub name: String,
}

/// NFS export mounted into a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NfsMount {
    /// Address of the exporting machine.
    pub address: String,
    /// Exported path on the server.
    pub export: String,
    /// Mount point inside the container.
    pub target: String,
}

/// Parameters for starting a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Host paths bind-mounted at the same path inside the container.
    pub binds: Vec<String>,
    /// Optional NFS volume.
    pub nfs: Option<NfsMount>,
    /// Environment set at container start.
    pub envs: Vec<Env>,
    /// TCP ports published on the host.
    pub ports: Vec<u16>,
    /// Whether the container needs extended privileges.
    pub privileged: bool,
    /// Replace the image entrypoint with an idle process so executions can
    /// be issued later.
    pub idle: bool,
}

impl ContainerSpec {
    /// Creates an idle container spec with no mounts.
    #[must_use]
    pub fn idle(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            binds: Vec::new(),
            nfs: None,
            envs: Vec::new(),
            ports: Vec::new(),
            privileged: false,
            idle: true,
        }
    }

    /// Creates a spec that keeps the image entrypoint.
    #[must_use]
    pub fn service(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            idle: false,
            ..Self::idle(name, image)
        }
    }

    /// Adds a same-path bind mount.
    #[must_use]
    pub fn bind(mut self, path: impl Into<String>) -> Self {
        self.binds.push(path.into());
        self
    }

    /// Sets the NFS volume.
    #[must_use]
    pub fn nfs(mut self, mount: Option<NfsMount>) -> Self {
        self.nfs = mount;
        self
    }

    /// Adds an environment binding.
    #[must_use]
    pub fn env(mut self, env: Env) -> Self {
        self.envs.push(env);
        self
    }

    /// Publishes a TCP port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Grants extended privileges.
    #[must_use]
    pub const fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Shell snippet executed inside a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Execution {
    /// Snippet passed to `sh -c`.
    pub inline: String,
    /// Environment for this execution only.
    pub env: Vec<Env>,
}

impl Execution {
    /// Creates an execution without extra environment.
    #[must_use]
    pub fn new(inline: impl Into<String>) -> Self {
        Self {
            inline: inline.into(),
            env: Vec::new(),
        }
    }

    /// Replaces the execution environment.
    #[must_use]
    pub fn with_env(mut self, env: Vec<Env>) -> Self {
        self.env = env;
        self
    }
}

/// Container operations on provisioned machines.
pub trait ContainerRuntime: Send + Sync {
    /// Starts a container on `machine`.
    fn start<'a>(
        &'a self,
        machine: &'a MachineHandle,
        spec: &'a ContainerSpec,
    ) -> ExecFuture<'a, ContainerHandle>;

    /// Runs `execution` inside `container`. A non-zero exit is reported in
    /// the returned output, not as an error.
    fn exec<'a>(
        &'a self,
        container: &'a ContainerHandle,
        execution: &'a Execution,
    ) -> ExecFuture<'a, CommandOutput>;

    /// Copies a local file to `destination` on `machine`, creating parent
    /// directories.
    fn copy_in<'a>(
        &'a self,
        machine: &'a MachineHandle,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
    ) -> ExecFuture<'a, ()>;
}

#[cfg(test)]
mod tests;
