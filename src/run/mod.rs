//! Orchestrates a component's jobs across disposable machines.
//!
//! Every job is admitted through a semaphore sized to the component's
//! concurrency, then provisioned, synchronised, executed, published and torn
//! down. The permit is held until teardown finished, so the number of job
//! machines alive at any instant never exceeds the concurrency. Jobs run as
//! futures on the caller's task; a failing job does not cancel its siblings.

mod error;

use camino::Utf8Path;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use shell_escape::unix::escape;
use tokio::sync::Semaphore;

use crate::backend::{Backend, MachineHandle};
use crate::component::{Component, MachineSpec, Runtime, SharedData};
use crate::exec::{ContainerHandle, ContainerRuntime, ContainerSpec, Execution, NfsMount};
use crate::job::{Job, JobStatus, JobType};
use crate::logging::{JobLog, JobLogFactory};
use crate::resource::Env;
use crate::sync::Synchronizer;

pub use error::RunError;
use error::append_teardown_note;

/// Command run for workflow-description jobs.
pub const WORKFLOW_COMMAND: &str = r#"cwltool "$CWL_FILE" "$CWL_PARAM_FILE""#;

/// Port the shared-data export listens on.
pub const NFS_PORT: u16 = 2049;

const SHARED: &str = "shared";

/// Outcome of a successful run.
///
/// `kept` may exceed the component's concurrency by one: the shared-data
/// machine is not counted against the admission gate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Jobs that completed.
    pub completed: usize,
    /// Machines still alive when the run ended.
    pub kept: usize,
}

/// Shared-data machine serving its inputs to every job.
#[derive(Clone, Debug)]
struct SharedMount {
    machine: MachineHandle,
    nfs: NfsMount,
    envs: Vec<Env>,
}

/// Everything a job borrows from its component.
struct JobContext<'a> {
    machine: &'a MachineSpec,
    runtime: &'a Runtime,
    shared: Option<&'a SharedMount>,
    logs: &'a JobLogFactory,
    gate: &'a Semaphore,
}

/// Drives every job of a component through its lifecycle.
#[derive(Debug)]
pub struct RunOrchestrator<B, C: ContainerRuntime> {
    backend: B,
    sync: Synchronizer<C>,
    keep: bool,
    live: Mutex<Vec<MachineHandle>>,
}

impl<B, C> RunOrchestrator<B, C>
where
    B: Backend,
    C: ContainerRuntime,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(backend: B, sync: Synchronizer<C>) -> Self {
        Self {
            backend,
            sync,
            keep: false,
            live: Mutex::new(Vec::new()),
        }
    }

    /// Leaves machines running after their job instead of destroying them.
    #[must_use]
    pub const fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Machines created by this orchestrator and not yet destroyed.
    #[must_use]
    pub fn live_machines(&self) -> Vec<MachineHandle> {
        self.live.lock().clone()
    }

    /// Runs every job of `component` exactly once.
    ///
    /// When shared data is configured, the shared-data machine is prepared
    /// before any job starts and released after the last job finished.
    /// Each job's status ends as `Completed` or `Failed`.
    ///
    /// At most `concurrency` job machines are alive at once. The shared-data
    /// machine sits outside that bound, so up to `concurrency + 1` machines
    /// can exist while jobs run.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Concurrency`] before provisioning anything when
    /// the component's concurrency is zero. Otherwise returns the first job
    /// error in completion order, an error preparing shared data, or
    /// [`RunError::Teardown`] when destroying a machine fails after its work
    /// succeeded.
    pub async fn run(
        &self,
        component: &mut Component,
    ) -> Result<RunSummary, RunError<B::Error>> {
        let Component {
            identity,
            concurrency,
            jobs,
            shared_data,
            machine,
            runtime,
            logs,
            ..
        } = component;
        if *concurrency == 0 {
            return Err(RunError::Concurrency);
        }
        tracing::info!(
            component = %identity.name,
            jobs = jobs.len(),
            concurrency = *concurrency,
            "starting run"
        );

        let shared = self.provision_shared(machine, shared_data, logs).await?;
        let gate = Semaphore::new(*concurrency);
        let context = JobContext {
            machine,
            runtime,
            shared: shared.as_ref(),
            logs,
            gate: &gate,
        };

        let mut summary = RunSummary::default();
        let mut first_error = None;
        let mut pending: FuturesUnordered<_> = jobs
            .iter_mut()
            .map(|job| self.run_job(&context, job))
            .collect();
        while let Some(result) = pending.next().await {
            match result {
                Ok(()) => summary.completed += 1,
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }
        drop(pending);

        if let Some(mount) = shared {
            let machine_name = mount.machine.name.clone();
            if let Err(source) = self.release(mount.machine).await {
                if first_error.is_none() {
                    return Err(RunError::Teardown {
                        machine: machine_name,
                        source,
                    });
                }
                tracing::warn!(machine = %machine_name, error = %source, "failed to destroy shared-data machine");
            }
        }
        summary.kept = self.live.lock().len();

        first_error.map_or(Ok(summary), Err)
    }

    /// Destroys every machine still tracked as live.
    ///
    /// Machines whose destruction fails stay tracked.
    ///
    /// # Errors
    ///
    /// Returns the first provider error after attempting every machine.
    pub async fn destroy(&self) -> Result<usize, B::Error> {
        let handles = std::mem::take(&mut *self.live.lock());
        let mut destroyed = 0;
        let mut first_error = None;
        for handle in handles {
            tracing::info!(machine = %handle.name, "destroying machine");
            match self.backend.destroy(handle.clone()).await {
                Ok(()) => destroyed += 1,
                Err(err) => {
                    tracing::warn!(machine = %handle.name, error = %err, "failed to destroy machine");
                    self.live.lock().push(handle);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(destroyed), Err)
    }

    async fn run_job(
        &self,
        context: &JobContext<'_>,
        job: &mut Job,
    ) -> Result<(), RunError<B::Error>> {
        let result = self.admit_and_run(context, job).await;
        match &result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                tracing::info!(job = %job.name(), "job completed");
            }
            Err(err) => {
                if !matches!(job.status, JobStatus::Failed { .. }) {
                    job.status = JobStatus::Failed {
                        reason: err.to_string(),
                    };
                }
                tracing::error!(job = %job.name(), error = %err, "job failed");
            }
        }
        result
    }

    async fn admit_and_run(
        &self,
        context: &JobContext<'_>,
        job: &mut Job,
    ) -> Result<(), RunError<B::Error>> {
        let _permit = context.gate.acquire().await.map_err(RunError::Admission)?;
        let log = context.logs.open(job.name());

        job.status = JobStatus::Provisioning;
        let request = context
            .machine
            .request_for(job.index)
            .map_err(|source| RunError::Request {
                job: job.name().to_owned(),
                source,
            })?;
        log.line(&format!("creating machine {}", request.name));
        tracing::info!(job = %job.name(), machine = %request.name, "provisioning");
        let handle = self
            .backend
            .create(&request)
            .await
            .map_err(|source| RunError::Provision {
                job: job.name().to_owned(),
                source,
            })?;
        self.track(&handle);

        let outcome = self.pipeline(context, job, &handle, &log).await;

        job.status = JobStatus::Destroying;
        let machine_name = handle.name.clone();
        let teardown = self.release(handle).await;
        log.line(&format!("released machine {machine_name}"));
        match (outcome, teardown) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(source)) => Err(RunError::Teardown {
                machine: machine_name,
                source,
            }),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(teardown)) => {
                tracing::warn!(machine = %machine_name, error = %teardown, "teardown after failure also failed");
                job.status = JobStatus::Failed {
                    reason: append_teardown_note(err.to_string(), Some(&teardown)),
                };
                Err(err)
            }
        }
    }

    async fn pipeline(
        &self,
        context: &JobContext<'_>,
        job: &mut Job,
        machine: &MachineHandle,
        log: &JobLog,
    ) -> Result<(), RunError<B::Error>> {
        let root = self.sync.config().root().to_path_buf();
        let mut extra_envs = self.copy_includes(job, machine, &root).await?;
        let command = self.prepare_command(context, job, machine, &root).await?;

        let image = match job.job_type {
            JobType::Standard => context.runtime.image.name.clone(),
            JobType::WorkflowDescription => self.sync.config().workflow_image.clone(),
        };
        let routine = self
            .start_container(
                job.name(),
                "lifecycle",
                machine,
                ContainerSpec::idle(format!("{}-routine", machine.name), self.sync.config().lifecycle_image.as_str())
                    .bind(root.as_str()),
            )
            .await?;
        let workflow = self
            .start_container(
                job.name(),
                "workflow",
                machine,
                ContainerSpec::idle(format!("{}-workflow", machine.name), image)
                    .bind(root.as_str())
                    .nfs(context.shared.map(|mount| mount.nfs.clone())),
            )
            .await?;
        job.container.routine = Some(routine);
        job.container.workflow = Some(workflow.clone());

        job.status = JobStatus::SyncingInputs;
        log.line("fetching inputs");
        self.sync
            .fetch(job, log)
            .await
            .map_err(|source| RunError::Sync {
                job: job.name().to_owned(),
                source,
            })?;
        if let Some(mount) = context.shared {
            extra_envs.extend(mount.envs.iter().cloned());
        }
        job.container.envs.extend(extra_envs);

        job.status = JobStatus::Executing;
        self.execute(job, &workflow, command, log).await?;

        job.status = JobStatus::SyncingOutputs;
        log.line("publishing outputs");
        self.sync
            .publish(job, log)
            .await
            .map_err(|source| RunError::Sync {
                job: job.name().to_owned(),
                source,
            })
    }

    async fn copy_includes(
        &self,
        job: &Job,
        machine: &MachineHandle,
        root: &Utf8Path,
    ) -> Result<Vec<Env>, RunError<B::Error>> {
        let mut envs = Vec::new();
        for (position, include) in job.parameters.includes.iter().enumerate() {
            let destination = include.container_path(root, position);
            self.sync
                .runtime()
                .copy_in(machine, &include.local_path, &destination)
                .await
                .map_err(|source| RunError::Copy {
                    job: job.name().to_owned(),
                    path: include.local_path.clone(),
                    source,
                })?;
            if let Some(name) = &include.name {
                envs.push(Env::new(name.as_str(), destination.as_str()));
            }
        }
        Ok(envs)
    }

    async fn prepare_command(
        &self,
        context: &JobContext<'_>,
        job: &Job,
        machine: &MachineHandle,
        root: &Utf8Path,
    ) -> Result<String, RunError<B::Error>> {
        if job.job_type == JobType::WorkflowDescription {
            return Ok(WORKFLOW_COMMAND.to_owned());
        }
        let script = context
            .runtime
            .script
            .as_ref()
            .ok_or_else(|| RunError::MissingScript {
                job: job.name().to_owned(),
            })?;
        let destination = script.container_path(root);
        self.sync
            .runtime()
            .copy_in(machine, &script.path, &destination)
            .await
            .map_err(|source| RunError::Copy {
                job: job.name().to_owned(),
                path: script.path.clone(),
                source,
            })?;
        let escaped = escape(destination.as_str().into());
        Ok(format!("chmod +x {escaped} && {escaped}"))
    }

    async fn execute(
        &self,
        job: &Job,
        workflow: &ContainerHandle,
        command: String,
        log: &JobLog,
    ) -> Result<(), RunError<B::Error>> {
        log.line("executing script");
        tracing::info!(job = %job.name(), "executing");
        let execution = Execution::new(command).with_env(job.container.envs.clone());
        let output = self
            .sync
            .runtime()
            .exec(workflow, &execution)
            .await
            .map_err(|source| RunError::Exec {
                job: job.name().to_owned(),
                source,
            })?;
        log.output("script", &output);
        if output.is_success() {
            return Ok(());
        }
        Err(RunError::Script {
            job: job.name().to_owned(),
            status: output.code,
            status_text: output.status_text(),
        })
    }

    async fn start_container(
        &self,
        owner: &str,
        role: &'static str,
        machine: &MachineHandle,
        spec: ContainerSpec,
    ) -> Result<ContainerHandle, RunError<B::Error>> {
        self.sync
            .runtime()
            .start(machine, &spec)
            .await
            .map_err(|source| RunError::Container {
                job: owner.to_owned(),
                role,
                source,
            })
    }

    async fn provision_shared(
        &self,
        machine: &MachineSpec,
        shared: &mut SharedData,
        logs: &JobLogFactory,
    ) -> Result<Option<SharedMount>, RunError<B::Error>> {
        if shared.inputs.is_empty() {
            return Ok(None);
        }
        let log = logs.open(SHARED);
        let request = machine
            .shared_request()
            .map_err(|source| RunError::Request {
                job: SHARED.to_owned(),
                source,
            })?;
        tracing::info!(machine = %request.name, inputs = shared.inputs.len(), "provisioning shared-data machine");
        let handle = self
            .backend
            .create(&request)
            .await
            .map_err(|source| RunError::Provision {
                job: SHARED.to_owned(),
                source,
            })?;
        self.track(&handle);

        match self.serve_shared(&handle, shared, &log).await {
            Ok((nfs, envs)) => Ok(Some(SharedMount {
                machine: handle,
                nfs,
                envs,
            })),
            Err(err) => {
                let machine_name = handle.name.clone();
                if let Err(teardown) = self.release(handle).await {
                    tracing::warn!(machine = %machine_name, error = %teardown, "teardown after failure also failed");
                }
                Err(err)
            }
        }
    }

    async fn serve_shared(
        &self,
        machine: &MachineHandle,
        shared: &mut SharedData,
        log: &JobLog,
    ) -> Result<(NfsMount, Vec<Env>), RunError<B::Error>> {
        let shared_root = self.sync.config().shared_root();
        let routine = self
            .start_container(
                SHARED,
                "lifecycle",
                machine,
                ContainerSpec::idle(format!("{}-routine", machine.name), self.sync.config().lifecycle_image.as_str())
                    .bind(shared_root.as_str()),
            )
            .await?;
        let envs = self
            .sync
            .fetch_inputs(&routine, &mut shared.inputs, log)
            .await
            .map_err(|source| RunError::Sync {
                job: SHARED.to_owned(),
                source,
            })?;
        self.start_container(
            SHARED,
            "export",
            machine,
            ContainerSpec::service(format!("{}-export", machine.name), shared.spec.export_image.as_str())
                .bind(shared_root.as_str())
                .env(Env::new("SHARED_DIRECTORY", shared_root.as_str()))
                .port(NFS_PORT)
                .privileged(),
        )
        .await?;
        let nfs = NfsMount {
            address: machine.address.clone(),
            export: String::from("/"),
            target: shared_root.into_string(),
        };
        Ok((nfs, envs))
    }

    fn track(&self, handle: &MachineHandle) {
        self.live.lock().push(handle.clone());
    }

    async fn release(&self, handle: MachineHandle) -> Result<(), B::Error> {
        if self.keep {
            tracing::info!(machine = %handle.name, "keeping machine");
            return Ok(());
        }
        let name = handle.name.clone();
        self.backend.destroy(handle).await?;
        self.live.lock().retain(|live| live.name != name);
        Ok(())
    }
}
