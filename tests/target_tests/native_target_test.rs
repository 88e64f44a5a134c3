use std::fs;
use std::time::Duration;

use target_harness::{
    BackendKind, ControlInterface, TargetConfig, TargetState, start_target, stop_target,
};
use tempfile::tempdir;

// 没有镜像时直接在本机执行
#[test]
fn native_target_echo_hello() {
    let mut target = start_target(&TargetConfig::native()).unwrap();
    assert_eq!(target.backend_kind(), BackendKind::Native);
    assert_eq!(target.state(), TargetState::Ready);
    assert!(target.emulator_pid().is_none());

    let result = target.exec_command_blocking("echo hello").unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout_lossy().contains("hello\n"));
    assert!(result.stderr.is_empty());
}

// 非零退出码是普通结果而不是错误
#[test]
fn failing_command_is_data() {
    let mut target = start_target(&TargetConfig::native()).unwrap();
    let result = target.exec_command_blocking("ls /nonexistent-dir").unwrap();
    assert_ne!(result.exit_code, 0);
    assert!(!result.stderr.is_empty());
}

// 后一条命令能看到前一条命令的副作用
#[test]
fn commands_complete_in_order() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("marker");
    let mut target = start_target(&TargetConfig::native()).unwrap();

    let first = target
        .exec_command_blocking(&format!("echo created > {}", marker.display()))
        .unwrap();
    assert_eq!(first.exit_code, 0);

    let second = target
        .exec_command_blocking(&format!("cat {}", marker.display()))
        .unwrap();
    assert_eq!(second.exit_code, 0);
    assert_eq!(second.stdout_lossy(), "created\n");
}

#[test]
fn stop_is_idempotent() {
    let mut target = start_target(&TargetConfig::native()).unwrap();
    stop_target(&mut target).unwrap();
    assert_eq!(target.state(), TargetState::Stopped);
    stop_target(&mut target).unwrap();
    assert_eq!(target.state(), TargetState::Stopped);

    let err = target.exec_command_blocking("echo hello").unwrap_err();
    assert!(err.is_transport());
}

#[test]
fn missing_image_is_configuration_error() {
    let dir = tempdir().unwrap();
    let err = start_target(&TargetConfig::with_image(dir.path().join("none.img")))
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no image"));
}

#[test]
fn command_timeout_is_enforced() {
    let mut config = TargetConfig::native();
    config.timeouts.command = Duration::from_millis(200);
    let mut target = start_target(&config).unwrap();

    let err = target.exec_command_blocking("sleep 5").unwrap_err();
    assert!(err.is_timeout());

    // 超时不影响之后的命令
    let result = target.exec_command_blocking("echo still-here").unwrap();
    assert_eq!(result.stdout_lossy(), "still-here\n");
}

#[test]
fn config_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("target.toml");
    fs::write(&path, "name = \"host\"\n[timeouts]\ncommand = \"2s\"\n").unwrap();

    let config = TargetConfig::from_file(&path).unwrap();
    assert_eq!(config.name, "host");
    let target = start_target(&config).unwrap();
    assert_eq!(target.name(), "host");
    assert_eq!(target.default_timeout(), Duration::from_secs(2));
}
