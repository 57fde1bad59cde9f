//! Backend abstraction for provisioning disposable compute instances.
//!
//! The orchestrator decides when machines are created and destroyed and how
//! many exist at once; a [`Backend`] only knows how to perform a single
//! create or destroy against a provider.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Provider family a machine is created with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Provider {
    /// Amazon EC2.
    #[default]
    AmazonEc2,
    /// Google Compute Engine.
    Google,
}

impl Provider {
    /// Parses the driver name used by `docker-machine`.
    #[must_use]
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver.trim() {
            "amazonec2" => Some(Self::AmazonEc2),
            "google" => Some(Self::Google),
            _ => None,
        }
    }

    /// Driver name used by `docker-machine`.
    #[must_use]
    pub const fn driver(self) -> &'static str {
        match self {
            Self::AmazonEc2 => "amazonec2",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.driver())
    }
}

/// Builds the machine name for job `index`: `<prefix><two-digit index>`.
#[must_use]
pub fn machine_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index:02}")
}

/// Parameters required to create a new machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineRequest {
    /// Machine name, unique for the lifetime of the run.
    pub name: String,
    /// Provider driving the machine.
    pub provider: Provider,
    /// Region (EC2) or zone (Google) to create the machine in.
    pub region: String,
    /// Instance type or machine type.
    pub instance_type: String,
    /// Root disk size in gigabytes.
    pub root_size_gb: u32,
    /// Instance profile granting the machine access to remote storage.
    pub iam_instance_profile: Option<String>,
    /// Security group; defaults to the machine name.
    pub security_group: Option<String>,
}

impl MachineRequest {
    /// Starts a builder for a [`MachineRequest`].
    #[must_use]
    pub fn builder() -> MachineRequestBuilder {
        MachineRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a string field is empty or
    /// the root disk size is zero.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.is_empty() {
            return Err(BackendError::Validation("name".to_owned()));
        }
        if self.region.is_empty() {
            return Err(BackendError::Validation("region".to_owned()));
        }
        if self.instance_type.is_empty() {
            return Err(BackendError::Validation("instance_type".to_owned()));
        }
        if self.root_size_gb == 0 {
            return Err(BackendError::Validation("root_size_gb".to_owned()));
        }
        if self
            .iam_instance_profile
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(BackendError::Validation("iam_instance_profile".to_owned()));
        }
        Ok(())
    }

    /// Security group to attach, falling back to the machine name.
    #[must_use]
    pub fn security_group(&self) -> &str {
        self.security_group.as_deref().unwrap_or(&self.name)
    }
}

/// Builder for [`MachineRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineRequestBuilder {
    name: String,
    provider: Provider,
    region: String,
    instance_type: String,
    root_size_gb: u32,
    iam_instance_profile: Option<String>,
    security_group: Option<String>,
}

impl MachineRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the machine name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the provider.
    #[must_use]
    pub const fn provider(mut self, value: Provider) -> Self {
        self.provider = value;
        self
    }

    /// Sets the region or zone.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the root disk size.
    #[must_use]
    pub const fn root_size_gb(mut self, value: u32) -> Self {
        self.root_size_gb = value;
        self
    }

    /// Sets the optional instance profile.
    #[must_use]
    pub fn iam_instance_profile(mut self, value: Option<String>) -> Self {
        self.iam_instance_profile = value;
        self
    }

    /// Sets the optional security group.
    #[must_use]
    pub fn security_group(mut self, value: Option<String>) -> Self {
        self.security_group = value;
        self
    }

    /// Builds and validates the [`MachineRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<MachineRequest, BackendError> {
        let request = MachineRequest {
            name: self.name.trim().to_owned(),
            provider: self.provider,
            region: self.region.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            root_size_gb: self.root_size_gb,
            iam_instance_profile: self
                .iam_instance_profile
                .map(|value| value.trim().to_owned()),
            security_group: self.security_group.map(|value| value.trim().to_owned()),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Handle returned by a backend once a machine has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineHandle {
    /// Machine name as known to the provider tooling.
    pub name: String,
    /// Public address of the machine.
    pub address: String,
}

/// Errors raised by backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by machine providers.
pub trait Backend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a machine and waits until it accepts container commands.
    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error>;

    /// Destroys the machine and ensures no provider resources remain.
    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error>;
}
