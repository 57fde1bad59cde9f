//! Argument rendering for `docker-machine` and the `docker` commands it
//! forwards over SSH.

use std::borrow::Cow;
use std::ffi::OsString;

use camino::Utf8Path;

use crate::backend::{MachineRequest, Provider};
use crate::exec::{ContainerSpec, Execution, NfsMount};

/// Arguments for `docker-machine create`.
pub(super) fn create_args(request: &MachineRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "create".into(),
        "--driver".into(),
        request.provider.driver().into(),
    ];
    match request.provider {
        Provider::AmazonEc2 => {
            push_flag(&mut args, "--amazonec2-region", &request.region);
            push_flag(
                &mut args,
                "--amazonec2-instance-type",
                &request.instance_type,
            );
            push_flag(
                &mut args,
                "--amazonec2-root-size",
                &request.root_size_gb.to_string(),
            );
            if let Some(profile) = request.iam_instance_profile.as_deref() {
                push_flag(&mut args, "--amazonec2-iam-instance-profile", profile);
            }
            push_flag(
                &mut args,
                "--amazonec2-security-group",
                request.security_group(),
            );
        }
        Provider::Google => {
            push_flag(&mut args, "--google-zone", &request.region);
            push_flag(&mut args, "--google-machine-type", &request.instance_type);
            push_flag(
                &mut args,
                "--google-disk-size",
                &request.root_size_gb.to_string(),
            );
        }
    }
    args.push(request.name.as_str().into());
    args
}

/// Arguments for `docker-machine ip`.
pub(super) fn ip_args(machine: &str) -> Vec<OsString> {
    vec!["ip".into(), machine.into()]
}

/// Arguments for `docker-machine rm`, forcing removal without a prompt.
pub(super) fn rm_args(machine: &str) -> Vec<OsString> {
    vec!["rm".into(), "-f".into(), "-y".into(), machine.into()]
}

/// Arguments running `command` on `machine` over `docker-machine ssh`.
pub(super) fn ssh_args(machine: &str, command: &[String]) -> Vec<OsString> {
    vec!["ssh".into(), machine.into(), shell_line(command).into()]
}

/// Arguments for `docker-machine scp`.
pub(super) fn scp_args(machine: &str, source: &Utf8Path, destination: &Utf8Path) -> Vec<OsString> {
    vec![
        "scp".into(),
        source.as_str().into(),
        format!("{machine}:{destination}").into(),
    ]
}

/// `docker run` invocation starting `spec` detached.
pub(super) fn docker_run(spec: &ContainerSpec) -> Vec<String> {
    let mut command = vec![
        String::from("docker"),
        String::from("run"),
        String::from("-d"),
        String::from("--name"),
        spec.name.clone(),
    ];
    for bind in &spec.binds {
        command.push(String::from("-v"));
        command.push(format!("{bind}:{bind}"));
    }
    if let Some(mount) = &spec.nfs {
        command.push(String::from("--mount"));
        command.push(nfs_mount(mount));
    }
    for env in &spec.envs {
        command.push(String::from("-e"));
        command.push(env.render());
    }
    for port in &spec.ports {
        command.push(String::from("-p"));
        command.push(format!("{port}:{port}"));
    }
    if spec.privileged {
        command.push(String::from("--privileged"));
    }
    if spec.idle {
        command.push(String::from("--entrypoint"));
        command.push(String::from("tail"));
    }
    command.push(spec.image.clone());
    if spec.idle {
        command.push(String::from("-f"));
        command.push(String::from("/dev/null"));
    }
    command
}

/// `docker exec` invocation running `execution` through `sh -c`.
pub(super) fn docker_exec(container: &str, execution: &Execution) -> Vec<String> {
    let mut command = vec![String::from("docker"), String::from("exec")];
    for env in &execution.env {
        command.push(String::from("-e"));
        command.push(env.render());
    }
    command.push(container.to_owned());
    command.push(String::from("sh"));
    command.push(String::from("-c"));
    command.push(execution.inline.clone());
    command
}

/// `mkdir -p` for the parent of `destination`.
pub(super) fn mkdir_parent(destination: &Utf8Path) -> Vec<String> {
    let parent = destination.parent().unwrap_or(destination);
    vec![
        String::from("mkdir"),
        String::from("-p"),
        parent.as_str().to_owned(),
    ]
}

fn nfs_mount(mount: &NfsMount) -> String {
    format!(
        "type=volume,dst={},volume-opt=type=nfs,volume-opt=device=:{},\"volume-opt=o=addr={},rw,nfsvers=4\"",
        mount.target, mount.export, mount.address
    )
}

fn push_flag(args: &mut Vec<OsString>, flag: &str, value: &str) {
    args.push(flag.into());
    args.push(value.into());
}

fn shell_line(command: &[String]) -> String {
    command
        .iter()
        .map(|part| shell_escape::unix::escape(Cow::Borrowed(part.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}
