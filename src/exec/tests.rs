//! Tests for `ProcessCommandRunner` output capture and exit status helpers.

use super::*;
use rstest::rstest;

async fn run_sh(script: &str) -> CommandOutput {
    let args = [OsString::from("-c"), OsString::from(script)];
    ProcessCommandRunner
        .run("sh", &args)
        .await
        .expect("command should execute successfully")
}

#[tokio::test]
async fn process_runner_captures_output() {
    let output = run_sh("printf 'out\\n' && printf 'err\\n' 1>&2").await;

    assert_eq!(output.code, Some(0));
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");
}

#[tokio::test]
async fn process_runner_reports_non_zero_exit_code() {
    let output = run_sh("echo partial; exit 7").await;

    assert_eq!(output.code, Some(7));
    assert_eq!(output.stdout, "partial\n");
    assert!(!output.is_success());
}

#[tokio::test]
async fn process_runner_reports_spawn_failure() {
    let err = ProcessCommandRunner
        .run("/nonexistent/sortie-binary", &[])
        .await
        .expect_err("missing binary should fail to spawn");

    assert!(
        matches!(err, ExecError::Spawn { ref program, .. } if program == "/nonexistent/sortie-binary"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case(Some(0), "0")]
#[case(Some(3), "3")]
#[case(None, "unknown")]
fn status_text_renders_exit_code(#[case] code: Option<i32>, #[case] expected: &str) {
    let output = CommandOutput {
        code,
        ..CommandOutput::default()
    };
    assert_eq!(output.status_text(), expected);
}

#[rstest]
fn into_success_converts_failures() {
    let output = CommandOutput {
        code: Some(2),
        stdout: String::new(),
        stderr: String::from("no such machine\n"),
    };

    let err = output
        .into_success("docker-machine")
        .expect_err("non-zero exit should fail");

    assert_eq!(
        err,
        ExecError::CommandFailure {
            program: String::from("docker-machine"),
            status: Some(2),
            status_text: String::from("2"),
            stderr: String::from("no such machine"),
        }
    );
}

#[rstest]
fn container_spec_builders_compose() {
    let spec = ContainerSpec::idle("m00-routine", "sortie/lifecycle")
        .bind("/tmp/sortie")
        .env(Env::new("A", "1"))
        .port(2049)
        .privileged();

    assert!(spec.idle);
    assert!(spec.privileged);
    assert_eq!(spec.binds, vec![String::from("/tmp/sortie")]);
    assert_eq!(spec.ports, vec![2049]);
    assert!(!ContainerSpec::service("export", "nfs").idle);
}
