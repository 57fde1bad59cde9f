//! Process-wide tracing setup and per-job log files.
//!
//! Every job gets its own append-only file `<log_dir>/<job name>.log` with
//! timestamped lines covering its lifecycle and the output of every command
//! run on its behalf. Log writes never fail a job: errors are reported once
//! through `tracing` and the file is abandoned.

use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir, fs_utf8::File, fs_utf8::OpenOptions};
use chrono::{Local, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::exec::CommandOutput;

/// Installs the global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
/// when `verbose` is set. Calling this more than once is harmless.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Default log directory: `./log/<YYYYmmdd_HHMMSS>` in local time.
#[must_use]
pub fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("log").join(Local::now().format("%Y%m%d_%H%M%S").to_string())
}

/// Errors raised while preparing the log directory.
#[derive(Debug, Error)]
pub enum LogError {
    /// Raised when the directory cannot be created or opened.
    #[error("failed to prepare log directory {path}: {message}")]
    Directory {
        /// Directory that could not be prepared.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Creates one [`JobLog`] per job inside a shared directory.
#[derive(Clone, Debug, Default)]
pub struct JobLogFactory {
    dir: Option<Arc<Dir>>,
    path: Option<Utf8PathBuf>,
}

impl JobLogFactory {
    /// Creates `path` (and parents) and writes job logs into it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Directory`] when the directory cannot be created.
    pub fn in_dir(path: &Utf8Path) -> Result<Self, LogError> {
        let to_error = |err: std::io::Error| LogError::Directory {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        Dir::create_ambient_dir_all(path, ambient_authority()).map_err(to_error)?;
        let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(to_error)?;
        Ok(Self {
            dir: Some(Arc::new(dir)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Factory whose logs only go to `tracing`.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Directory receiving log files, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Opens the log for `job`. Failure to open the file degrades to a
    /// tracing-only log.
    #[must_use]
    pub fn open(&self, job: &str) -> JobLog {
        let file = self.dir.as_ref().and_then(|dir| {
            let mut options = OpenOptions::new();
            options.create(true).append(true);
            dir.open_with(format!("{job}.log"), &options)
                .map_err(|err| tracing::warn!(job, error = %err, "failed to open job log"))
                .ok()
        });
        JobLog {
            job: job.to_owned(),
            file: Mutex::new(file),
        }
    }
}

/// Append-only log for one job.
#[derive(Debug)]
pub struct JobLog {
    job: String,
    file: Mutex<Option<File>>,
}

impl JobLog {
    /// Log that only forwards to `tracing`.
    #[must_use]
    pub fn detached(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            file: Mutex::new(None),
        }
    }

    /// Job this log belongs to.
    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Appends one timestamped line.
    pub fn line(&self, message: &str) {
        tracing::debug!(job = %self.job, "{message}");
        self.write(&format!("{} {message}\n", Utc::now().to_rfc3339()));
    }

    /// Appends the captured output of a command, prefixing each line with
    /// the stream it came from.
    pub fn output(&self, label: &str, output: &CommandOutput) {
        let stamp = Utc::now().to_rfc3339();
        let mut rendered = String::new();
        for line in output.stdout.lines() {
            rendered.push_str(&format!("{stamp} [{label}] {line}\n"));
        }
        for line in output.stderr.lines() {
            rendered.push_str(&format!("{stamp} [{label}:stderr] {line}\n"));
        }
        rendered.push_str(&format!(
            "{stamp} [{label}] exited with status {}\n",
            output.status_text()
        ));
        self.write(&rendered);
    }

    fn write(&self, rendered: &str) {
        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(rendered.as_bytes()) {
            tracing::warn!(job = %self.job, error = %err, "failed to write job log");
            *guard = None;
        }
    }
}
