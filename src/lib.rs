//! Core library for the sortie batch runner.
//!
//! The crate turns a task file (or a workflow description with parameter
//! files) into independent jobs and runs each one on its own short-lived
//! machine: provision, fetch inputs, execute the script, publish outputs,
//! destroy. A semaphore bounds how many job machines are alive at once.
//! Machine provisioning and container execution sit behind capability
//! traits with a `docker-machine` implementation.

pub mod backend;
pub mod component;
pub mod config;
pub mod driver;
pub mod exec;
pub mod job;
pub mod logging;
pub mod parser;
pub mod resource;
pub mod run;
pub mod sync;
pub mod test_support;

pub use backend::{Backend, BackendError, MachineHandle, MachineRequest, MachineRequestBuilder};
pub use component::{Component, MachineSpec, PrepareError};
pub use config::{ConfigError, MachineConfig};
pub use driver::{DockerMachineDriver, DriverError};
pub use exec::{
    CommandOutput, CommandRunner, ContainerRuntime, ExecError, ProcessCommandRunner,
};
pub use job::{Job, JobStatus, JobType};
pub use logging::JobLogFactory;
pub use resource::{Env, Include, Input, Output, Resource};
pub use run::{RunError, RunOrchestrator, RunSummary};
pub use sync::{LifecycleConfig, SyncError, Synchronizer};
