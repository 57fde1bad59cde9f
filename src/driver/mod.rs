//! `docker-machine` implementation of machine provisioning and container
//! execution.
//!
//! Every operation shells out to the `docker-machine` binary through a
//! [`CommandRunner`]: machines are created and removed with `create` and
//! `rm`, containers are driven by running `docker` on the machine over
//! `docker-machine ssh`, and files are copied with `docker-machine scp`.

mod command;
mod error;

use std::ffi::OsString;

use camino::Utf8Path;

use crate::backend::{Backend, BackendFuture, MachineHandle, MachineRequest};
use crate::exec::{
    CommandOutput, CommandRunner, ContainerHandle, ContainerRuntime, ContainerSpec, ExecError,
    ExecFuture, Execution, ProcessCommandRunner,
};

pub use error::DriverError;

/// Default binary name.
pub const DEFAULT_DOCKER_MACHINE_BIN: &str = "docker-machine";

/// Drives cloud machines and their containers through `docker-machine`.
#[derive(Clone, Debug)]
pub struct DockerMachineDriver<R: CommandRunner = ProcessCommandRunner> {
    bin: String,
    runner: R,
}

impl DockerMachineDriver<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(bin: impl Into<String>) -> Self {
        Self::new(bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> DockerMachineDriver<R> {
    /// Creates a driver invoking `bin` through `runner`.
    #[must_use]
    pub fn new(bin: impl Into<String>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Binary invoked for every operation.
    #[must_use]
    pub fn bin(&self) -> &str {
        &self.bin
    }

    async fn invoke(&self, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        self.runner.run(&self.bin, args).await
    }

    async fn ssh(&self, machine: &str, command: &[String]) -> Result<CommandOutput, ExecError> {
        let args = command::ssh_args(machine, command);
        self.invoke(&args).await
    }

    async fn address_of(&self, machine: &str) -> Result<String, DriverError> {
        let output = self
            .invoke(&command::ip_args(machine))
            .await
            .and_then(|output| output.into_success(&self.bin))
            .map_err(|err| DriverError::Address {
                machine: machine.to_owned(),
                reason: err.to_string(),
            })?;
        let address = output.stdout.trim();
        if address.is_empty() {
            return Err(DriverError::Address {
                machine: machine.to_owned(),
                reason: String::from("empty output"),
            });
        }
        Ok(address.to_owned())
    }

    async fn remove_after_failure(&self, machine: &str, stage: &str) {
        if let Err(cleanup) = self.remove(machine).await {
            tracing::warn!(machine, stage, error = %cleanup, "cleanup after failed machine creation also failed");
        }
    }

    async fn remove(&self, machine: &str) -> Result<(), DriverError> {
        self.invoke(&command::rm_args(machine))
            .await
            .and_then(|output| output.into_success(&self.bin))
            .map(drop)
            .map_err(|source| DriverError::Destroy {
                machine: machine.to_owned(),
                source,
            })
    }
}

impl<R: CommandRunner> Backend for DockerMachineDriver<R> {
    type Error = DriverError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            tracing::info!(
                machine = %request.name,
                provider = %request.provider,
                instance_type = %request.instance_type,
                "creating machine"
            );
            let created = self
                .invoke(&command::create_args(request))
                .await
                .and_then(|output| output.into_success(&self.bin));
            if let Err(source) = created {
                // A failed create can leave a registered, half-provisioned machine.
                self.remove_after_failure(&request.name, "create").await;
                return Err(DriverError::Create {
                    machine: request.name.clone(),
                    source,
                });
            }

            match self.address_of(&request.name).await {
                Ok(address) => Ok(MachineHandle {
                    name: request.name.clone(),
                    address,
                }),
                Err(err) => {
                    self.remove_after_failure(&request.name, "address lookup")
                        .await;
                    Err(err)
                }
            }
        })
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            tracing::info!(machine = %handle.name, "removing machine");
            self.remove(&handle.name).await
        })
    }
}

impl<R: CommandRunner> ContainerRuntime for DockerMachineDriver<R> {
    fn start<'a>(
        &'a self,
        machine: &'a MachineHandle,
        spec: &'a ContainerSpec,
    ) -> ExecFuture<'a, ContainerHandle> {
        Box::pin(async move {
            self.ssh(&machine.name, &command::docker_run(spec))
                .await?
                .into_success(&self.bin)?;
            Ok(ContainerHandle {
                machine: machine.clone(),
                name: spec.name.clone(),
            })
        })
    }

    fn exec<'a>(
        &'a self,
        container: &'a ContainerHandle,
        execution: &'a Execution,
    ) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.ssh(
                &container.machine.name,
                &command::docker_exec(&container.name, execution),
            )
            .await
        })
    }

    fn copy_in<'a>(
        &'a self,
        machine: &'a MachineHandle,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            self.ssh(&machine.name, &command::mkdir_parent(destination))
                .await?
                .into_success(&self.bin)?;
            self.invoke(&command::scp_args(&machine.name, source, destination))
                .await?
                .into_success(&self.bin)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests;
