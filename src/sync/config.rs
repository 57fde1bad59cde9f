//! Lifecycle container configuration and synchronisation errors.
//!
//! This module defines [`LifecycleConfig`] for the images and scripts used to
//! move data in and out of job machines, along with associated error types.
//! Configuration is loaded via `ortho-config` which merges defaults,
//! configuration files, and environment variables.

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::ExecError;
use crate::resource::LocalizeError;

/// Default execution root shared by every container on a job machine.
pub const DEFAULT_CONTAINER_ROOT: &str = "/tmp/sortie";

/// Default image providing the download and upload scripts.
pub const DEFAULT_LIFECYCLE_IMAGE: &str = "sortie/lifecycle:latest";

/// Default image used for workflow-description jobs.
pub const DEFAULT_WORKFLOW_IMAGE: &str = "commonworkflowlanguage/cwltool:latest";

/// Default image exporting shared data over NFS.
pub const DEFAULT_SHARED_EXPORT_IMAGE: &str = "itsthenetwork/nfs-server-alpine:latest";

/// Lifecycle settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SORTIE_LIFECYCLE",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct LifecycleConfig {
    /// Directory bind-mounted into every container on a job machine.
    #[ortho_config(default = DEFAULT_CONTAINER_ROOT.to_owned())]
    pub container_root: String,
    /// Image whose containers run the transfer scripts.
    #[ortho_config(default = DEFAULT_LIFECYCLE_IMAGE.to_owned())]
    pub lifecycle_image: String,
    /// Script downloading `REMOTE_URL` to `LOCAL_PATH`.
    #[ortho_config(default = "/lifecycle/download.sh".to_owned())]
    pub download_script: String,
    /// Script uploading `LOCAL_PATH` to `REMOTE_URL`.
    #[ortho_config(default = "/lifecycle/upload.sh".to_owned())]
    pub upload_script: String,
    /// Image forced for workflow-description jobs.
    #[ortho_config(default = DEFAULT_WORKFLOW_IMAGE.to_owned())]
    pub workflow_image: String,
    /// Image exporting shared data from the shared-data machine.
    #[ortho_config(default = DEFAULT_SHARED_EXPORT_IMAGE.to_owned())]
    pub shared_export_image: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            container_root: DEFAULT_CONTAINER_ROOT.to_owned(),
            lifecycle_image: DEFAULT_LIFECYCLE_IMAGE.to_owned(),
            download_script: String::from("/lifecycle/download.sh"),
            upload_script: String::from("/lifecycle/upload.sh"),
            workflow_image: DEFAULT_WORKFLOW_IMAGE.to_owned(),
            shared_export_image: DEFAULT_SHARED_EXPORT_IMAGE.to_owned(),
        }
    }
}

/// Errors raised when loading the lifecycle configuration from layered
/// sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LifecycleConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("lifecycle configuration parsing failed: {0}")]
    Parse(String),
}

impl LifecycleConfig {
    /// Ensures configuration values are present after trimming whitespace and
    /// that the execution root is absolute.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when any required field is empty
    /// or the root is relative.
    pub fn validate(&self) -> Result<(), SyncError> {
        Self::require_value(&self.container_root, "container_root")?;
        if !self.root().is_absolute() || self.root() == Utf8Path::new("/") {
            return Err(SyncError::InvalidConfig {
                field: String::from("container_root"),
            });
        }
        Self::require_value(&self.lifecycle_image, "lifecycle_image")?;
        Self::require_value(&self.download_script, "download_script")?;
        Self::require_value(&self.upload_script, "upload_script")?;
        Self::require_value(&self.workflow_image, "workflow_image")?;
        Self::require_value(&self.shared_export_image, "shared_export_image")?;
        Ok(())
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, LifecycleConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("sortie")])
            .map_err(|err| LifecycleConfigLoadError::Parse(err.to_string()))
    }

    /// Execution root on job machines.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        Utf8Path::new(self.container_root.trim())
    }

    /// Directory holding shared data, both on the exporting machine and as
    /// the mount point inside job containers.
    #[must_use]
    pub fn shared_root(&self) -> Utf8PathBuf {
        self.root().join("shared")
    }

    fn require_value(value: &str, field: &str) -> Result<(), SyncError> {
        if value.trim().is_empty() {
            return Err(SyncError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}

/// Direction of a resource transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferAction {
    /// Remote object to execution root.
    Download,
    /// Output location creation.
    Ensure,
    /// Execution root to remote object.
    Upload,
}

impl std::fmt::Display for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Ensure => f.write_str("ensure output location for"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

/// Errors surfaced while fetching inputs or publishing outputs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyncError {
    /// Raised when configuration is missing required values. The error message
    /// includes guidance on how to provide the value via environment variable
    /// or configuration file.
    #[error("missing {field}: set SORTIE_LIFECYCLE_{env_suffix} or add {field} to [lifecycle] in sortie.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a resource URL cannot be mapped onto the execution root.
    #[error(transparent)]
    Localize(#[from] LocalizeError),
    /// Raised when a transfer is requested before the lifecycle container
    /// started.
    #[error("job {job} has no running lifecycle container")]
    MissingRoutine {
        /// Job name.
        job: String,
    },
    /// Raised when a transfer script or `mkdir` exits non-zero.
    #[error("failed to {action} `{url}` with status {status_text}, please use --verbose option")]
    Transfer {
        /// What was attempted.
        action: TransferAction,
        /// Remote URL of the resource.
        url: String,
        /// Exit status as reported by the container.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
    },
    /// Raised when the container runtime itself fails.
    #[error(transparent)]
    Exec(#[from] ExecError),
}
