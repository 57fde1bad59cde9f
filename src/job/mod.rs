//! Job model: one parameterised script execution bound to one machine.

use std::fmt;

use chrono::Utc;

use crate::exec::ContainerHandle;
use crate::resource::{Env, Include, Input, Output, Resource};

/// Name and creation time tagging a component or job in logs and names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    /// Human readable name.
    pub name: String,
    /// Creation time in nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Identity {
    /// Creates an identity stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

/// How the job's script is supplied.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum JobType {
    /// Operator script run inside the operator-chosen image.
    #[default]
    Standard,
    /// Workflow description run by the workflow engine image.
    WorkflowDescription,
}

/// The five ways a task-file column binds a value into a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindKind {
    /// Plain environment variable.
    Env,
    /// Single object downloaded before the run.
    Input,
    /// Directory tree downloaded before the run.
    InputRecursive,
    /// Single object uploaded after the run.
    Output,
    /// Directory tree uploaded after the run.
    OutputRecursive,
}

impl BindKind {
    /// Parses the flag spelling used in task-file headers.
    #[must_use]
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "--env" => Some(Self::Env),
            "--input" => Some(Self::Input),
            "--input-recursive" => Some(Self::InputRecursive),
            "--output" => Some(Self::Output),
            "--output-recursive" => Some(Self::OutputRecursive),
            _ => None,
        }
    }

    /// Flag spelling of this kind.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Env => "--env",
            Self::Input => "--input",
            Self::InputRecursive => "--input-recursive",
            Self::Output => "--output",
            Self::OutputRecursive => "--output-recursive",
        }
    }
}

/// Full parameter surface of one job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Parameters {
    /// Plain environment bindings.
    pub envs: Vec<Env>,
    /// Resources fetched before execution.
    pub inputs: Vec<Input>,
    /// Resources published after execution.
    pub outputs: Vec<Output>,
    /// Local files copied in before execution.
    pub includes: Vec<Include>,
}

impl Parameters {
    /// Appends `value` under `name` to the slice selected by `kind`.
    pub fn bind(&mut self, kind: BindKind, name: &str, value: &str) {
        match kind {
            BindKind::Env => self.envs.push(Env::new(name, value)),
            BindKind::Input => self.inputs.push(Input::new(Resource::new(name, value))),
            BindKind::InputRecursive => self
                .inputs
                .push(Input::new(Resource::new(name, value).with_recursive(true))),
            BindKind::Output => self.outputs.push(Output::new(Resource::new(name, value))),
            BindKind::OutputRecursive => self
                .outputs
                .push(Output::new(Resource::new(name, value).with_recursive(true))),
        }
    }

    /// Every name that becomes an environment variable, in declaration order.
    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.envs
            .iter()
            .map(|env| env.name.as_str())
            .chain(self.inputs.iter().map(|input| input.resource.name.as_str()))
            .chain(
                self.outputs
                    .iter()
                    .map(|output| output.resource.name.as_str()),
            )
            .chain(self.includes.iter().filter_map(|inc| inc.name.as_deref()))
    }
}

/// Container-side state accumulated while the job runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerState {
    /// Lifecycle container performing transfers.
    pub routine: Option<ContainerHandle>,
    /// Container running the job script.
    pub workflow: Option<ContainerHandle>,
    /// Environment passed to the job script.
    pub envs: Vec<Env>,
}

/// Lifecycle position of a job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum JobStatus {
    /// Waiting for admission.
    #[default]
    Pending,
    /// Machine and containers being created.
    Provisioning,
    /// Inputs being fetched and outputs ensured.
    SyncingInputs,
    /// Script running.
    Executing,
    /// Outputs being published.
    SyncingOutputs,
    /// Machine being destroyed.
    Destroying,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed {
        /// Rendered error.
        reason: String,
    },
}

impl JobStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Provisioning => f.write_str("provisioning"),
            Self::SyncingInputs => f.write_str("syncing-inputs"),
            Self::Executing => f.write_str("executing"),
            Self::SyncingOutputs => f.write_str("syncing-outputs"),
            Self::Destroying => f.write_str("destroying"),
            Self::Completed => f.write_str("completed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// One unit of work.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    /// Name and creation time.
    pub identity: Identity,
    /// Position assigned by the producer; unique within a run.
    pub index: usize,
    /// How the script is supplied.
    pub job_type: JobType,
    /// Parameters fixed before orchestration.
    pub parameters: Parameters,
    /// State grown while the job runs.
    pub container: ContainerState,
    /// Lifecycle position.
    pub status: JobStatus,
}

impl Job {
    /// Creates a pending standard job named `<prefix>-<index>`.
    #[must_use]
    pub fn new(index: usize, prefix: &str) -> Self {
        Self {
            identity: Identity::new(format!("{prefix}-{index:02}")),
            index,
            job_type: JobType::Standard,
            parameters: Parameters::default(),
            container: ContainerState::default(),
            status: JobStatus::Pending,
        }
    }

    /// Job name used for logs and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Finds the first binding name used twice, if any.
    #[must_use]
    pub fn duplicate_binding(&self) -> Option<&str> {
        let mut seen = std::collections::BTreeSet::new();
        self.parameters
            .binding_names()
            .find(|name| !seen.insert(*name))
    }
}
