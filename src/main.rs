//! Binary entry point for the sortie CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use sortie::component::{Image, Script};
use sortie::logging::{LogError, default_log_dir, init_tracing};
use sortie::parser::{
    ParseError, parse_env, parse_file, parse_includes, parse_shared_data, workflow_jobs,
};
use sortie::{
    Component, ConfigError, DockerMachineDriver, Job, JobLogFactory, LifecycleConfig,
    MachineConfig, PrepareError, RunOrchestrator, SyncError, Synchronizer,
};

mod cli;

use cli::{Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid run: {0}")]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("pass --tasks or --cwl")]
    MissingSource,
    #[error("run failed: {0}")]
    Run(String),
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<(), CliError> {
    init_tracing(args.verbose);

    let machine_config = MachineConfig::load_without_cli_args()?;
    let lifecycle_config = LifecycleConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let mut component = build_component(&args, &machine_config, &lifecycle_config)?;
    component.prepare()?;
    let log_dir = args.log_dir.clone().unwrap_or_else(default_log_dir);
    component.logs = JobLogFactory::in_dir(&log_dir)?;
    tracing::info!(
        component = %component.identity.name,
        jobs = component.jobs.len(),
        log_dir = %log_dir,
        "prepared run"
    );

    let driver = DockerMachineDriver::with_process_runner(machine_config.docker_machine_bin);
    let sync = Synchronizer::new(lifecycle_config, driver.clone())?;
    let orchestrator = RunOrchestrator::new(driver, sync).with_keep(args.keep);

    match orchestrator.run(&mut component).await {
        Ok(summary) => {
            tracing::info!(
                completed = summary.completed,
                kept = summary.kept,
                "run finished"
            );
            for machine in orchestrator.live_machines() {
                tracing::info!(machine = %machine.name, address = %machine.address, "machine left running");
            }
            Ok(())
        }
        Err(err) if args.keep => Err(CliError::Run(err.to_string())),
        Err(err) => {
            if let Err(cleanup) = orchestrator.destroy().await {
                tracing::warn!(error = %cleanup, "failed to destroy remaining machines");
            }
            Err(CliError::Run(err.to_string()))
        }
    }
}

fn build_component(
    args: &RunCommand,
    machine: &MachineConfig,
    lifecycle: &LifecycleConfig,
) -> Result<Component, CliError> {
    let (name, jobs) = produce_jobs(args)?;
    let mut component = Component::template(name.as_str());
    component.machine = machine.machine_spec(&name)?;
    component.concurrency = usize::from(args.concurrency);
    if let Some(image) = &args.image {
        component.runtime.image = Image {
            name: image.clone(),
        };
    }
    component.runtime.script = args.script.clone().map(|path| Script { path });
    component.common_parameters.envs = parse_env(&args.env)?;
    component.common_parameters.includes = parse_includes(&args.include)?;
    component.shared_data.inputs = parse_shared_data(&args.shared)?;
    component
        .shared_data
        .spec
        .export_image
        .clone_from(&lifecycle.shared_export_image);
    component.add_jobs(jobs);
    Ok(component)
}

fn produce_jobs(args: &RunCommand) -> Result<(String, Vec<Job>), CliError> {
    if let Some(workflow) = &args.cwl {
        return Ok(workflow_jobs(workflow, &args.cwl_param));
    }
    let tasks = args.tasks.as_deref().ok_or(CliError::MissingSource)?;
    let parsed = parse_file(tasks)?;
    Ok((parsed.name, parsed.jobs))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
