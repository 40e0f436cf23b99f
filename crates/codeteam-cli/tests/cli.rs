use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
use std::process::Command as StdCommand;
use tempfile::TempDir;

fn init_git(dir: &Path) {
    for args in [
        vec!["init", "-q"],
        vec!["config", "user.email", "test@example.com"],
        vec!["config", "user.name", "Test"],
    ] {
        let status = StdCommand::new("git")
            .args(&args)
            .current_dir(dir)
            .status()
            .expect("git available");
        assert!(status.success());
    }
}

fn codeteam(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("codeteam").expect("binary");
    cmd.current_dir(dir).args(args);
    cmd
}

#[test]
fn init_writes_settings_and_runtime_dirs() {
    let workspace = TempDir::new().expect("workspace");
    codeteam(workspace.path(), &["init"]).assert().success();

    assert!(workspace.path().join(".codeteam/settings.json").exists());
    assert!(workspace.path().join(".codeteam/logs").exists());
    assert!(workspace.path().join(".codeteam/reports").exists());
    assert!(workspace.path().join(".codeteam/plans").exists());
}

#[test]
fn status_reports_no_plan_as_json() {
    let workspace = TempDir::new().expect("workspace");
    init_git(workspace.path());

    let output = codeteam(workspace.path(), &["--json", "status"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let parsed: Value = serde_json::from_slice(&output).expect("json");
    assert_eq!(parsed["phase"], "no_plan");
    assert_eq!(parsed["plan_id"], Value::Null);
}

#[test]
fn code_without_a_plan_completes_with_guidance() {
    let workspace = TempDir::new().expect("workspace");
    init_git(workspace.path());

    let output = codeteam(workspace.path(), &["code"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("No plan found"));
}

#[test]
fn plan_without_request_on_closed_stdin_fails_cleanly() {
    let workspace = TempDir::new().expect("workspace");
    init_git(workspace.path());

    let output = codeteam(workspace.path(), &["plan"])
        .write_stdin("")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("no request provided"));
}
