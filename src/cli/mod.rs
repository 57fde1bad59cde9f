//! Command-line interface definitions for the `sortie` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::{ArgGroup, Parser};

/// Top-level CLI for the `sortie` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sortie",
    about = "Run a script once per task row on disposable cloud machines",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision one machine per job, run it, and tear everything down.
    #[command(
        name = "run",
        about = "Provision one machine per job, run it, and tear everything down"
    )]
    Run(RunCommand),
}

/// Arguments for the `sortie run` subcommand.
#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("source").required(true).args(["tasks", "cwl"])))]
pub(crate) struct RunCommand {
    /// Task file (`.csv` or `.tsv`); every data row becomes one job.
    ///
    /// Header cells read `<bind kind> <NAME>` where the bind kind is one of
    /// `--env`, `--input`, `--input-recursive`, `--output` or
    /// `--output-recursive`.
    #[arg(long, value_name = "PATH")]
    pub(crate) tasks: Option<Utf8PathBuf>,
    /// Workflow description run once per `--cwl-param` file.
    #[arg(long, value_name = "PATH", conflicts_with = "tasks", requires = "cwl_param")]
    pub(crate) cwl: Option<Utf8PathBuf>,
    /// Parameter file for the workflow description; repeat for more jobs.
    #[arg(long = "cwl-param", value_name = "PATH", requires = "cwl")]
    pub(crate) cwl_param: Vec<Utf8PathBuf>,
    /// Script executed in every standard job.
    #[arg(long, value_name = "PATH")]
    pub(crate) script: Option<Utf8PathBuf>,
    /// Image the script runs in.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Maximum number of job machines alive at once.
    #[arg(
        long,
        value_name = "N",
        default_value_t = 8,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub(crate) concurrency: u16,
    /// Environment variable passed to every job, as `KEY=value`.
    #[arg(long, value_name = "KEY=VALUE")]
    pub(crate) env: Vec<String>,
    /// Remote data downloaded once and shared with every job, as `KEY=url`.
    #[arg(long, value_name = "KEY=URL")]
    pub(crate) shared: Vec<String>,
    /// Local file copied into every job, as `KEY=path` or a bare path.
    #[arg(long, value_name = "[KEY=]PATH")]
    pub(crate) include: Vec<String>,
    /// Keep machines running after their job instead of destroying them.
    #[arg(long)]
    pub(crate) keep: bool,
    /// Log command output and debug events to stderr.
    #[arg(long, short = 'v')]
    pub(crate) verbose: bool,
    /// Directory receiving one log file per job.
    ///
    /// Defaults to `log/<YYYYmmdd_HHMMSS>` under the working directory.
    #[arg(long = "log-dir", value_name = "DIR")]
    pub(crate) log_dir: Option<Utf8PathBuf>,
}
