//! Error types for the `docker-machine` driver.

use thiserror::Error;

use crate::backend::BackendError;
use crate::exec::ExecError;

/// Errors raised by [`super::DockerMachineDriver`] as a [`crate::Backend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when a request is missing a required field.
    #[error("invalid machine request: {0}")]
    Validation(String),
    /// Raised when `docker-machine create` fails.
    #[error("failed to create machine {machine}: {source}")]
    Create {
        /// Machine name.
        machine: String,
        /// Underlying command failure.
        source: ExecError,
    },
    /// Raised when a created machine does not report a usable address.
    #[error("machine {machine} did not report an address: {reason}")]
    Address {
        /// Machine name.
        machine: String,
        /// Why the address lookup failed.
        reason: String,
    },
    /// Raised when `docker-machine rm` fails.
    #[error("failed to remove machine {machine}: {source}")]
    Destroy {
        /// Machine name.
        machine: String,
        /// Underlying command failure.
        source: ExecError,
    },
}

impl From<BackendError> for DriverError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Validation(field) => Self::Validation(field),
        }
    }
}
