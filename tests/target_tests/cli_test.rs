use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn harness() -> Command {
    Command::cargo_bin("target-harness").unwrap()
}

#[test]
fn help_lists_options() {
    harness()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--image-path"))
        .stdout(predicate::str::contains("--command"));
}

// 不提供镜像时在本机执行
#[test]
fn runs_command_natively() {
    harness()
        .args(["-c", "echo hello"])
        .env("RUST_LOG", "debug")
        .assert()
        .success()
        .stdout(predicate::eq("hello\n"));
}

#[test]
fn runs_commands_in_order_and_reports_first_failure() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("marker");
    harness()
        .arg("-q")
        .args(["-c", &format!("touch {}", marker.display())])
        .args(["-c", &format!("test -f {}", marker.display())])
        .args(["-c", "exit 3"])
        .args(["-c", "exit 4"])
        .assert()
        .code(3);
}

#[test]
fn missing_image_fails_with_configuration_error() {
    let dir = tempdir().unwrap();
    harness()
        .args(["--image-path", dir.path().join("none.img").to_str().unwrap()])
        .args(["-c", "ls"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no image"));
}

#[test]
fn reads_target_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("target.toml");
    fs::write(&config, "name = \"from-file\"\n[timeouts]\ncommand = \"200ms\"\n").unwrap();

    harness()
        .args(["--config", config.to_str().unwrap()])
        .args(["-c", "sleep 5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("timed out"));
}
