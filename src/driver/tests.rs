//! Tests for `docker-machine` command rendering and failure handling.

use super::*;
use crate::backend::Provider;
use crate::exec::NfsMount;
use crate::resource::Env;
use crate::test_support::{CommandInvocation, ScriptedRunner};
use rstest::{fixture, rstest};

#[fixture]
fn request() -> MachineRequest {
    MachineRequest::builder()
        .name("tasks-ab12cd34-00")
        .region("ap-northeast-1")
        .instance_type("t2.2xlarge")
        .root_size_gb(48)
        .iam_instance_profile(Some(String::from("sortie-s3")))
        .build()
        .expect("request should be valid")
}

#[fixture]
fn machine() -> MachineHandle {
    MachineHandle {
        name: String::from("tasks00"),
        address: String::from("10.0.0.1"),
    }
}

#[rstest]
#[tokio::test]
async fn create_renders_amazonec2_flags_and_reads_address(request: MachineRequest) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), "203.0.113.9\n", "");
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());

    let handle = driver.create(&request).await.expect("create should succeed");

    assert_eq!(handle.address, "203.0.113.9");
    let calls = runner.invocations();
    let commands: Vec<String> = calls.iter().map(CommandInvocation::command_string).collect();
    assert_eq!(
        commands,
        vec![
            String::from(
                "docker-machine create --driver amazonec2 --amazonec2-region ap-northeast-1 \
                 --amazonec2-instance-type t2.2xlarge --amazonec2-root-size 48 \
                 --amazonec2-iam-instance-profile sortie-s3 \
                 --amazonec2-security-group tasks-ab12cd34-00 tasks-ab12cd34-00"
            ),
            String::from("docker-machine ip tasks-ab12cd34-00"),
        ]
    );
}

#[rstest]
fn google_requests_use_google_flags(request: MachineRequest) {
    let google = MachineRequest {
        provider: Provider::Google,
        region: String::from("asia-northeast1-a"),
        ..request
    };
    let rendered: Vec<String> = command::create_args(&google)
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        rendered.join(" "),
        "create --driver google --google-zone asia-northeast1-a --google-machine-type \
         t2.2xlarge --google-disk-size 48 tasks-ab12cd34-00"
    );
}

#[rstest]
#[tokio::test]
async fn create_failure_surfaces_stderr(request: MachineRequest) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), "", "quota exceeded\n");
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());

    let err = driver
        .create(&request)
        .await
        .expect_err("create should fail");

    assert!(matches!(err, DriverError::Create { .. }), "{err}");
    assert!(err.to_string().contains("quota exceeded"));
    let commands: Vec<_> = runner
        .invocations()
        .iter()
        .map(CommandInvocation::command_string)
        .collect();
    assert_eq!(commands.len(), 2, "{commands:?}");
    assert_eq!(
        commands.last().map(String::as_str),
        Some("docker-machine rm -f -y tasks-ab12cd34-00")
    );
}

#[rstest]
#[tokio::test]
async fn create_failure_survives_failed_cleanup(request: MachineRequest) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), "", "quota exceeded\n");
    runner.push_output(Some(1), "", "Host does not exist\n");
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());

    let err = driver
        .create(&request)
        .await
        .expect_err("create should fail");

    assert!(matches!(err, DriverError::Create { .. }), "{err}");
    assert!(err.to_string().contains("quota exceeded"), "{err}");
    assert_eq!(runner.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn missing_address_removes_the_machine(request: MachineRequest) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), "  \n", "");
    runner.push_success();
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());

    let err = driver
        .create(&request)
        .await
        .expect_err("empty address should fail");

    assert!(matches!(err, DriverError::Address { .. }), "{err}");
    let last = runner
        .invocations()
        .last()
        .map(CommandInvocation::command_string);
    assert_eq!(
        last.as_deref(),
        Some("docker-machine rm -f -y tasks-ab12cd34-00")
    );
}

#[rstest]
#[tokio::test]
async fn invalid_request_never_invokes_binary(request: MachineRequest) {
    let runner = ScriptedRunner::new();
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());
    let invalid = MachineRequest {
        region: String::new(),
        ..request
    };

    let err = driver
        .create(&invalid)
        .await
        .expect_err("invalid request should fail");

    assert_eq!(err, DriverError::Validation(String::from("region")));
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn destroy_failure_is_reported(machine: MachineHandle) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let driver = DockerMachineDriver::new("docker-machine", runner);

    let err = driver
        .destroy(machine)
        .await
        .expect_err("rm failure should surface");

    assert!(matches!(err, DriverError::Destroy { ref machine, .. } if machine == "tasks00"));
}

#[rstest]
#[tokio::test]
async fn start_runs_docker_over_ssh(machine: MachineHandle) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());
    let spec = ContainerSpec::idle("tasks00-workflow", "ubuntu:22.04")
        .bind("/tmp/sortie")
        .env(Env::new("GREETING", "hello world"));

    let handle = driver
        .start(&machine, &spec)
        .await
        .expect("start should succeed");

    assert_eq!(handle.name, "tasks00-workflow");
    let calls = runner.invocations();
    let call = calls.first().expect("one invocation");
    assert_eq!(
        call.command_string(),
        "docker-machine ssh tasks00 docker run -d --name tasks00-workflow \
         -v '/tmp/sortie:/tmp/sortie' -e 'GREETING=hello world' --entrypoint tail \
         'ubuntu:22.04' -f /dev/null"
    );
}

#[rstest]
fn nfs_mount_is_rendered_as_volume_options() {
    let spec = ContainerSpec::idle("tasks00-workflow", "ubuntu:22.04").nfs(Some(NfsMount {
        address: String::from("10.0.0.9"),
        export: String::from("/"),
        target: String::from("/tmp/sortie/shared"),
    }));

    let rendered = command::docker_run(&spec);

    assert!(rendered.contains(&String::from(
        "type=volume,dst=/tmp/sortie/shared,volume-opt=type=nfs,volume-opt=device=:/,\
         \"volume-opt=o=addr=10.0.0.9,rw,nfsvers=4\""
    )));
}

#[rstest]
#[tokio::test]
async fn exec_reports_non_zero_exit_without_error(machine: MachineHandle) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(3), "", "boom");
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());
    let container = ContainerHandle {
        machine,
        name: String::from("tasks00-routine"),
    };
    let execution = Execution::new("/lifecycle/download.sh")
        .with_env(vec![Env::new("REMOTE_URL", "s3://b/in")]);

    let output = driver
        .exec(&container, &execution)
        .await
        .expect("exec should return output");

    assert_eq!(output.code, Some(3));
    let calls = runner.invocations();
    let call = calls.first().expect("one invocation");
    assert_eq!(
        call.command_string(),
        "docker-machine ssh tasks00 docker exec -e 'REMOTE_URL=s3://b/in' tasks00-routine \
         sh -c /lifecycle/download.sh"
    );
}

#[rstest]
#[tokio::test]
async fn copy_in_creates_parent_then_copies(machine: MachineHandle) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let driver = DockerMachineDriver::new("docker-machine", runner.clone());

    driver
        .copy_in(
            &machine,
            Utf8Path::new("./run.sh"),
            Utf8Path::new("/tmp/sortie/script/run.sh"),
        )
        .await
        .expect("copy should succeed");

    let commands: Vec<String> = runner
        .invocations()
        .iter()
        .map(CommandInvocation::command_string)
        .collect();
    assert_eq!(
        commands,
        vec![
            String::from("docker-machine ssh tasks00 mkdir -p /tmp/sortie/script"),
            String::from("docker-machine scp ./run.sh tasks00:/tmp/sortie/script/run.sh"),
        ]
    );
}
