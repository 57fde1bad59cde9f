//! Root aggregate describing one batch run.
//!
//! A [`Component`] owns a flat list of jobs together with everything shared
//! by them: the machine template, the runtime image and script, parameters
//! common to every job, shared data and the log factory. It carries no
//! behaviour beyond validation; [`crate::RunOrchestrator`] drives it.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::{BackendError, MachineRequest, Provider, machine_name};
use crate::job::{Identity, Job, JobType, Parameters};
use crate::logging::JobLogFactory;
use crate::resource::Input;
use crate::sync::DEFAULT_SHARED_EXPORT_IMAGE;

/// Machines alive at once when the operator does not choose.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Image used for standard jobs when the operator does not choose.
pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";

/// Template every job machine is created from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineSpec {
    /// Provider family.
    pub provider: Provider,
    /// Region or zone.
    pub region: String,
    /// Instance type.
    pub instance_type: String,
    /// Root disk size in gigabytes.
    pub root_size_gb: u32,
    /// Optional instance profile.
    pub iam_instance_profile: Option<String>,
    /// Prefix of every machine name in this run.
    pub name_prefix: String,
}

impl MachineSpec {
    /// Builds a run-unique prefix from a component name: lowercase ASCII
    /// alphanumerics and dashes, then eight random hex digits and a dash.
    #[must_use]
    pub fn default_prefix(component: &str) -> String {
        let mut base: String = component
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        base = base.trim_matches('-').to_owned();
        if base.is_empty() {
            base.push_str("sortie");
        }
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        format!("{base}-{suffix}-")
    }

    /// Request for the machine running job `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when the template is incomplete.
    pub fn request_for(&self, index: usize) -> Result<MachineRequest, BackendError> {
        self.request_named(machine_name(&self.name_prefix, index))
    }

    /// Request for the shared-data machine.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when the template is incomplete.
    pub fn shared_request(&self) -> Result<MachineRequest, BackendError> {
        self.request_named(format!("{}shared", self.name_prefix))
    }

    fn request_named(&self, name: String) -> Result<MachineRequest, BackendError> {
        MachineRequest::builder()
            .name(name)
            .provider(self.provider)
            .region(self.region.as_str())
            .instance_type(self.instance_type.as_str())
            .root_size_gb(self.root_size_gb)
            .iam_instance_profile(self.iam_instance_profile.clone())
            .build()
    }
}

impl Default for MachineSpec {
    fn default() -> Self {
        Self {
            provider: Provider::AmazonEc2,
            region: String::from("ap-northeast-1"),
            instance_type: String::from("t2.2xlarge"),
            root_size_gb: 48,
            iam_instance_profile: None,
            name_prefix: Self::default_prefix("sortie"),
        }
    }
}

/// Container image reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Reference passed to `docker run`.
    pub name: String,
}

/// Operator script copied onto every job machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Script {
    /// Local path of the script.
    pub path: Utf8PathBuf,
}

impl Script {
    /// Destination of the script inside the execution root.
    #[must_use]
    pub fn container_path(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join("script")
            .join(self.path.file_name().unwrap_or("run.sh"))
    }
}

/// What standard jobs run and where.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Runtime {
    /// Image for the workflow container of standard jobs.
    pub image: Image,
    /// Script for standard jobs; workflow-description runs have none.
    pub script: Option<Script>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            image: Image {
                name: DEFAULT_IMAGE.to_owned(),
            },
            script: None,
        }
    }
}

/// How the shared-data machine is set up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SharedDataSpec {
    /// Image serving the shared directory over NFS.
    pub export_image: String,
}

impl Default for SharedDataSpec {
    fn default() -> Self {
        Self {
            export_image: DEFAULT_SHARED_EXPORT_IMAGE.to_owned(),
        }
    }
}

/// Inputs downloaded once and exported to every job machine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SharedData {
    /// Shared inputs; always recursive.
    pub inputs: Vec<Input>,
    /// Shared-data machine setup.
    pub spec: SharedDataSpec,
}

/// Errors raised by [`Component::prepare`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PrepareError {
    /// Raised when concurrency is zero.
    #[error("concurrency must be at least 1")]
    Concurrency,
    /// Raised when the machine template cannot produce a valid request.
    #[error("invalid machine spec: {0}")]
    Machine(#[from] BackendError),
    /// Raised when the runtime image is empty.
    #[error("runtime image must not be empty")]
    Image,
    /// Raised when standard jobs exist but no script was given.
    #[error("standard jobs need a script: pass --script")]
    MissingScript,
    /// Raised when the script is not a local file.
    #[error("script {path} is not a readable file")]
    Script {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when an include is not a local file.
    #[error("include {path} for job {job} is not a readable file")]
    Include {
        /// Job referencing the include.
        job: String,
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when shared data is configured inconsistently.
    #[error("invalid shared data: {0}")]
    SharedData(String),
    /// Raised when a resource or env name is empty.
    #[error("job {job} has a binding with an empty name")]
    EmptyName {
        /// Job name.
        job: String,
    },
    /// Raised when two bindings of one job share a name, counting the
    /// shared-data inputs every job receives.
    #[error("job {job} binds {name} more than once")]
    DuplicateName {
        /// Job name.
        job: String,
        /// Repeated binding name.
        name: String,
    },
}

/// One batch run.
#[derive(Clone, Debug)]
pub struct Component {
    /// Name and creation time.
    pub identity: Identity,
    /// Maximum number of job machines alive at once.
    pub concurrency: usize,
    /// Jobs, processed in any order, each exactly once.
    pub jobs: Vec<Job>,
    /// Parameters merged into every job by [`Component::add_jobs`].
    pub common_parameters: Parameters,
    /// Data shared by all jobs.
    pub shared_data: SharedData,
    /// Machine template.
    pub machine: MachineSpec,
    /// Image and script of standard jobs.
    pub runtime: Runtime,
    /// Per-job log files.
    pub logs: JobLogFactory,
}

impl Component {
    /// Empty component with default concurrency, machine template and
    /// runtime.
    #[must_use]
    pub fn template(name: impl Into<String>) -> Self {
        let identity = Identity::new(name);
        let machine = MachineSpec {
            name_prefix: MachineSpec::default_prefix(&identity.name),
            ..MachineSpec::default()
        };
        Self {
            identity,
            concurrency: DEFAULT_CONCURRENCY,
            jobs: Vec::new(),
            common_parameters: Parameters::default(),
            shared_data: SharedData::default(),
            machine,
            runtime: Runtime::default(),
            logs: JobLogFactory::disabled(),
        }
    }

    /// Appends `jobs`, merging the common parameters into each one after the
    /// job's own bindings.
    pub fn add_jobs(&mut self, jobs: impl IntoIterator<Item = Job>) {
        for mut job in jobs {
            let common = &self.common_parameters;
            job.parameters.envs.extend(common.envs.iter().cloned());
            job.parameters.inputs.extend(common.inputs.iter().cloned());
            job.parameters.outputs.extend(common.outputs.iter().cloned());
            job.parameters
                .includes
                .extend(common.includes.iter().cloned());
            self.jobs.push(job);
        }
    }

    /// Whether any job runs the operator script.
    #[must_use]
    pub fn has_standard_jobs(&self) -> bool {
        self.jobs
            .iter()
            .any(|job| job.job_type == JobType::Standard)
    }

    /// Validates the component before any machine is provisioned.
    ///
    /// # Errors
    ///
    /// Returns the first [`PrepareError`] found.
    pub fn prepare(&self) -> Result<(), PrepareError> {
        if self.concurrency == 0 {
            return Err(PrepareError::Concurrency);
        }
        self.machine.request_for(0)?;
        if self.runtime.image.name.trim().is_empty() {
            return Err(PrepareError::Image);
        }
        if self.has_standard_jobs() {
            let script = self
                .runtime
                .script
                .as_ref()
                .ok_or(PrepareError::MissingScript)?;
            if !script.path.is_file() {
                return Err(PrepareError::Script {
                    path: script.path.clone(),
                });
            }
        }
        self.prepare_shared_data()?;
        for job in &self.jobs {
            self.prepare_job(job)?;
        }
        Ok(())
    }

    fn prepare_shared_data(&self) -> Result<(), PrepareError> {
        if self.shared_data.inputs.is_empty() {
            return Ok(());
        }
        if self.shared_data.spec.export_image.trim().is_empty() {
            return Err(PrepareError::SharedData(String::from(
                "export image must not be empty",
            )));
        }
        self.machine.shared_request()?;
        let mut seen = std::collections::BTreeSet::new();
        for input in &self.shared_data.inputs {
            let name = input.resource.name.as_str();
            if name.is_empty() {
                return Err(PrepareError::SharedData(String::from(
                    "shared input with an empty name",
                )));
            }
            if !seen.insert(name) {
                return Err(PrepareError::SharedData(format!(
                    "{name} is shared more than once"
                )));
            }
        }
        Ok(())
    }

    fn prepare_job(&self, job: &Job) -> Result<(), PrepareError> {
        if job.parameters.binding_names().any(str::is_empty) {
            return Err(PrepareError::EmptyName {
                job: job.name().to_owned(),
            });
        }
        // Shared inputs are bound into every job's environment too.
        let shared = job.parameters.binding_names().find(|name| {
            self.shared_data
                .inputs
                .iter()
                .any(|input| input.resource.name == *name)
        });
        if let Some(name) = job.duplicate_binding().or(shared) {
            return Err(PrepareError::DuplicateName {
                job: job.name().to_owned(),
                name: name.to_owned(),
            });
        }
        if let Some(include) = job
            .parameters
            .includes
            .iter()
            .find(|include| !include.local_path.is_file())
        {
            return Err(PrepareError::Include {
                job: job.name().to_owned(),
                path: include.local_path.clone(),
            });
        }
        Ok(())
    }
}
