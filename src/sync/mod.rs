//! Resource synchronisation between remote storage and a job's execution
//! root.
//!
//! Transfers run inside the job's lifecycle ("routine") container through
//! the [`ContainerRuntime`] capability. All transfers of one phase form a
//! single fan-out group: the group fails on the first error and the
//! environment bindings it produces are merged into the job only after every
//! member completed.

use futures::future::try_join_all;

use crate::exec::{ContainerHandle, ContainerRuntime, Execution};
use crate::job::Job;
use crate::logging::JobLog;
use crate::resource::{Env, Input, Output};

mod config;

pub use config::{
    DEFAULT_CONTAINER_ROOT, DEFAULT_LIFECYCLE_IMAGE, DEFAULT_SHARED_EXPORT_IMAGE,
    DEFAULT_WORKFLOW_IMAGE, LifecycleConfig, LifecycleConfigLoadError, SyncError, TransferAction,
};

/// One transfer prepared from a localised resource.
#[derive(Clone, Debug)]
struct Transfer {
    action: TransferAction,
    url: String,
    execution: Execution,
    binding: Env,
}

impl Transfer {
    /// Download of a localised input; `None` until [`Input::localize`] ran.
    fn download(config: &LifecycleConfig, input: &Input) -> Option<Self> {
        let local = input.local_path.as_deref()?;
        Some(Self {
            action: TransferAction::Download,
            url: input.resource.url.clone(),
            execution: Execution::new(config.download_script.trim())
                .with_env(input.resource.transfer_env(local)),
            binding: input.env()?,
        })
    }

    fn ensure(output: &Output) -> Option<Self> {
        let local = output.local_path.as_deref()?;
        let dir = output.ensure_dir().unwrap_or(local);
        let escaped = shell_escape::unix::escape(dir.as_str().into());
        Some(Self {
            action: TransferAction::Ensure,
            url: output.resource.url.clone(),
            execution: Execution::new(format!("mkdir -p {escaped}")),
            binding: output.env()?,
        })
    }

    fn upload(config: &LifecycleConfig, output: &Output) -> Option<Self> {
        let local = output.local_path.as_deref()?;
        Some(Self {
            action: TransferAction::Upload,
            url: output.resource.url.clone(),
            execution: Execution::new(config.upload_script.trim())
                .with_env(output.resource.transfer_env(local)),
            binding: output.env()?,
        })
    }
}

/// Moves job data in and out of the execution root.
#[derive(Clone, Debug)]
pub struct Synchronizer<C: ContainerRuntime> {
    config: LifecycleConfig,
    runtime: C,
}

impl<C: ContainerRuntime> Synchronizer<C> {
    /// Creates a synchroniser over `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: LifecycleConfig, runtime: C) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self { config, runtime })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Returns the container runtime transfers are issued through.
    #[must_use]
    pub const fn runtime(&self) -> &C {
        &self.runtime
    }

    /// Localises every input and output of `job`, downloads the inputs and
    /// creates the output locations in one group, then merges the job's
    /// parameter envs followed by every localised binding into
    /// `job.container.envs`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Localize`] for a malformed URL,
    /// [`SyncError::MissingRoutine`] when the lifecycle container was not
    /// started, and the first [`SyncError::Transfer`] or
    /// [`SyncError::Exec`] raised by the group.
    pub async fn fetch(&self, job: &mut Job, log: &JobLog) -> Result<(), SyncError> {
        let root = self.config.root();
        let mut transfers = Vec::new();
        for input in &mut job.parameters.inputs {
            input.localize(root)?;
            transfers.extend(Transfer::download(&self.config, input));
        }
        for output in &mut job.parameters.outputs {
            output.localize(root)?;
            transfers.extend(Transfer::ensure(output));
        }

        let bindings = if transfers.is_empty() {
            Vec::new()
        } else {
            self.run_group(routine_of(job)?, transfers, log).await?
        };

        let parameter_envs = job.parameters.envs.clone();
        job.container.envs.extend(parameter_envs);
        job.container.envs.extend(bindings);
        Ok(())
    }

    /// Downloads `inputs` into the shared-data root through `routine` and
    /// returns their bindings in declaration order.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::fetch`] for the download phase.
    pub async fn fetch_inputs(
        &self,
        routine: &ContainerHandle,
        inputs: &mut [Input],
        log: &JobLog,
    ) -> Result<Vec<Env>, SyncError> {
        let root = self.config.shared_root();
        let mut transfers = Vec::with_capacity(inputs.len());
        for input in inputs.iter_mut() {
            input.localize(&root)?;
            transfers.extend(Transfer::download(&self.config, input));
        }
        self.run_group(routine, transfers, log).await
    }

    /// Uploads every output of `job` in one group.
    ///
    /// Outputs are localised again so publishing a job whose fetch was
    /// skipped still targets the same paths.
    ///
    /// # Errors
    ///
    /// Returns the first [`SyncError`] raised by the group.
    pub async fn publish(&self, job: &mut Job, log: &JobLog) -> Result<(), SyncError> {
        let root = self.config.root();
        let mut transfers = Vec::with_capacity(job.parameters.outputs.len());
        for output in &mut job.parameters.outputs {
            output.localize(root)?;
            transfers.extend(Transfer::upload(&self.config, output));
        }
        if transfers.is_empty() {
            return Ok(());
        }
        let routine = routine_of(job)?;
        self.run_group(routine, transfers, log).await.map(drop)
    }

    async fn run_group(
        &self,
        routine: &ContainerHandle,
        transfers: Vec<Transfer>,
        log: &JobLog,
    ) -> Result<Vec<Env>, SyncError> {
        try_join_all(
            transfers
                .into_iter()
                .map(|transfer| self.perform(routine, transfer, log)),
        )
        .await
    }

    async fn perform(
        &self,
        routine: &ContainerHandle,
        transfer: Transfer,
        log: &JobLog,
    ) -> Result<Env, SyncError> {
        let label = format!("{} {}", transfer.action, transfer.url);
        log.line(&label);
        let output = self.runtime.exec(routine, &transfer.execution).await?;
        log.output(&label, &output);
        if !output.is_success() {
            return Err(SyncError::Transfer {
                action: transfer.action,
                url: transfer.url,
                status: output.code,
                status_text: output.status_text(),
            });
        }
        Ok(transfer.binding)
    }
}

fn routine_of(job: &Job) -> Result<&ContainerHandle, SyncError> {
    job.container
        .routine
        .as_ref()
        .ok_or_else(|| SyncError::MissingRoutine {
            job: job.name().to_owned(),
        })
}
