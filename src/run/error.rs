//! Errors surfaced while running a component.

use std::fmt::Display;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::sync::AcquireError;

use crate::backend::BackendError;
use crate::exec::ExecError;
use crate::sync::SyncError;

/// Errors surfaced while running jobs.
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the component admits no job at all.
    #[error("concurrency must be at least 1")]
    Concurrency,
    /// Raised when the admission gate is closed.
    #[error("admission gate closed: {0}")]
    Admission(#[source] AcquireError),
    /// Raised when the machine template yields an invalid request.
    #[error("invalid machine request for {job}: {source}")]
    Request {
        /// Job (or `shared`) the machine was for.
        job: String,
        /// Validation failure.
        #[source]
        source: BackendError,
    },
    /// Raised when provisioning a machine fails.
    #[error("failed to create machine for {job}: {source}")]
    Provision {
        /// Job (or `shared`) the machine was for.
        job: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a container cannot be started.
    #[error("failed to start {role} container for {job}: {source}")]
    Container {
        /// Job (or `shared`) owning the container.
        job: String,
        /// Container role.
        role: &'static str,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when an include or the script cannot be copied.
    #[error("failed to copy {path} for {job}: {source}")]
    Copy {
        /// Job receiving the file.
        job: String,
        /// Local file.
        path: Utf8PathBuf,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when a standard job has no script to run.
    #[error("job {job} has no script to run")]
    MissingScript {
        /// Job name.
        job: String,
    },
    /// Raised when fetching or publishing data fails.
    #[error("{job}: {source}")]
    Sync {
        /// Job (or `shared`) whose data failed to move.
        job: String,
        /// Underlying synchronisation error.
        #[source]
        source: SyncError,
    },
    /// Raised when the job script cannot be started.
    #[error("failed to execute script for {job}: {source}")]
    Exec {
        /// Job name.
        job: String,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when the job script exits non-zero.
    #[error("script for {job} exited with status {status_text}, please use --verbose option")]
    Script {
        /// Job name.
        job: String,
        /// Exit status as reported by the container.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
    },
    /// Raised when teardown fails after the primary operation succeeded.
    #[error("failed to destroy machine {machine}: {source}")]
    Teardown {
        /// Machine that is still alive.
        machine: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
}

pub(super) fn append_teardown_note<E: Display>(
    message: String,
    teardown_error: Option<&E>,
) -> String {
    let mut rendered = message;
    if let Some(teardown) = teardown_error {
        rendered.push_str(&format!(" (teardown also failed: {teardown})"));
    }
    rendered
}
