//! Behavioural tests for the `sortie run` CLI.
//!
//! Every case fails before a machine is requested, so no provider tooling is
//! needed.

use std::fs;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn sortie(workdir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("sortie");
    cmd.current_dir(workdir.path());
    cmd.env("HOME", workdir.path());
    cmd.env("XDG_CONFIG_HOME", workdir.path());
    cmd.env_remove("SORTIE_CONFIG_PATH");
    cmd
}

fn write(workdir: &TempDir, name: &str, contents: &str) {
    fs::write(workdir.path().join(name), contents)
        .unwrap_or_else(|err| panic!("write {name}: {err}"));
}

#[rstest]
fn missing_task_file_is_reported(workdir: TempDir) {
    let mut cmd = sortie(&workdir);
    cmd.args(["run", "--tasks", "absent.tsv", "--script", "run.sh"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("failed to open tasks file `absent.tsv`"));
}

#[rstest]
fn unsupported_extension_is_reported(workdir: TempDir) {
    write(&workdir, "tasks.txt", "--env A\n1\n");
    let mut cmd = sortie(&workdir);
    cmd.args(["run", "--tasks", "tasks.txt", "--script", "run.sh"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("expected .csv or .tsv"));
}

#[rstest]
fn malformed_header_is_reported(workdir: TempDir) {
    write(&workdir, "tasks.csv", "SAMPLE\na\n");
    let mut cmd = sortie(&workdir);
    cmd.args(["run", "--tasks", "tasks.csv", "--script", "run.sh"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("unexpected format for task file columns header: SAMPLE"));
}

#[rstest]
fn standard_jobs_without_script_are_rejected(workdir: TempDir) {
    write(&workdir, "tasks.tsv", "--env SAMPLE\na\n");
    let mut cmd = sortie(&workdir);
    cmd.args(["run", "--tasks", "tasks.tsv"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("standard jobs need a script"));
    assert!(
        !workdir.path().join("log").exists(),
        "log directory should not be created for an invalid run"
    );
}

#[rstest]
fn tasks_and_workflow_flags_conflict(workdir: TempDir) {
    let mut cmd = sortie(&workdir);
    cmd.args([
        "run",
        "--tasks",
        "tasks.tsv",
        "--cwl",
        "align.cwl",
        "--cwl-param",
        "a.yml",
    ]);

    cmd.assert()
        .failure()
        .code(2)
        .stderr(contains("cannot be used with"));
}

#[rstest]
fn unknown_provider_is_reported_with_guidance(workdir: TempDir) {
    write(&workdir, "tasks.tsv", "--env SAMPLE\na\n");
    let mut cmd = sortie(&workdir);
    cmd.env("SORTIE_MACHINE_PROVIDER", "azure");
    cmd.args(["run", "--tasks", "tasks.tsv", "--script", "run.sh"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("SORTIE_MACHINE_PROVIDER"));
}
