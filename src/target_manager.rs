//! 目标生命周期管理
//!
//! 根据配置选择后端（本地或模拟器），把目标带到就绪状态，
//! 并保证在任何退出路径上释放会话和模拟器进程。
//!
//! 状态机：`Uninitialized → Starting → Ready → Stopping → Stopped`。
//! 启动阶段的任何失败都直接进入 `Stopping → Stopped`，调用方不会拿到未就绪的目标。

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::target_config::TargetConfig;
use crate::connection::{
    CommandResult, Connector, ControlInterface, NativeInterface, SshConnector,
};
use crate::error::{Result, TargetError};
use crate::qemu_manager::QemuManager;
use crate::utils::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Uninitialized,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Native,
    Emulated,
}

enum Backend {
    Native(NativeInterface),
    Emulated {
        session: Option<Box<dyn ControlInterface + Send>>,
        emulator: QemuManager,
    },
}

/// 一个正在运行的目标
///
/// 自身实现 `ControlInterface`，这是交给测试代码的句柄。
/// 离开作用域时自动执行 `stop`。
pub struct Target {
    name: String,
    state: TargetState,
    kind: BackendKind,
    command_timeout: Duration,
    backend: Option<Backend>,
}

/// 按配置启动目标，客户机会话使用 SSH
pub fn start_target(config: &TargetConfig) -> Result<Target> {
    Target::start(config)
}

/// 停止目标，重复调用无副作用
pub fn stop_target(target: &mut Target) -> Result<()> {
    target.stop()
}

impl Target {
    pub fn start(config: &TargetConfig) -> Result<Self> {
        let connector = SshConnector::new(
            config.name.clone(),
            config.connection.clone(),
            config.timeouts.command,
        );
        Self::start_with(config, &connector)
    }

    /// 使用指定的连接器启动目标
    pub fn start_with(config: &TargetConfig, connector: &dyn Connector) -> Result<Self> {
        let mut target = Target {
            name: config.name.clone(),
            state: TargetState::Uninitialized,
            kind: BackendKind::Native,
            command_timeout: config.timeouts.command,
            backend: None,
        };

        target.transition(TargetState::Starting);
        if let Err(e) = target.bring_up(config, connector) {
            warn!("[{}] 启动失败: {e}", target.name);
            if let Err(stop_err) = target.stop() {
                error!("[{}] 启动失败后的清理出错: {stop_err}", target.name);
            }
            return Err(e);
        }
        target.transition(TargetState::Ready);
        Ok(target)
    }

    fn bring_up(&mut self, config: &TargetConfig, connector: &dyn Connector) -> Result<()> {
        let Some(image) = config.validated_image()? else {
            info!("[{}] 未提供镜像，在本机运行", self.name);
            self.kind = BackendKind::Native;
            self.backend = Some(Backend::Native(NativeInterface::new(
                self.name.clone(),
                config.timeouts.command,
            )));
            return Ok(());
        };

        self.kind = BackendKind::Emulated;
        let mut emulator = QemuManager::new(image, config);
        emulator.start()?;

        // 先交给 backend 持有，后续失败时由 stop 统一释放
        let backend = self.backend.insert(Backend::Emulated {
            session: None,
            emulator,
        });
        if let Backend::Emulated { session, emulator } = backend {
            let backoff = Backoff::new(
                config.timeouts.backoff_initial,
                config.timeouts.backoff_max,
            );
            *session = Some(emulator.wait_until_ready(
                connector,
                config.timeouts.readiness,
                backoff,
            )?);
        }
        Ok(())
    }

    fn transition(&mut self, next: TargetState) {
        debug!("[{}] {:?} -> {next:?}", self.name, self.state);
        self.state = next;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// 模拟器进程号，本地目标或已停止时为 `None`
    pub fn emulator_pid(&self) -> Option<u32> {
        match &self.backend {
            Some(Backend::Emulated { emulator, .. }) => emulator.pid(),
            _ => None,
        }
    }

    /// 就绪目标的控制接口
    pub fn control(&mut self) -> Result<&mut dyn ControlInterface> {
        if self.state != TargetState::Ready {
            return Err(TargetError::Transport(format!(
                "目标 {} 不可用 ({:?})",
                self.name, self.state
            )));
        }
        match &mut self.backend {
            Some(Backend::Native(native)) => Ok(native as &mut dyn ControlInterface),
            Some(Backend::Emulated {
                session: Some(session),
                ..
            }) => Ok(session.as_mut() as &mut dyn ControlInterface),
            _ => Err(TargetError::Transport(format!(
                "目标 {} 的会话已失效",
                self.name
            ))),
        }
    }

    /// 传输失败后会话不可再用，立即释放
    fn discard_session(&mut self) {
        if let Some(Backend::Emulated { session, .. }) = &mut self.backend {
            if let Some(mut session) = session.take() {
                if let Err(e) = session.close() {
                    debug!("[{}] 关闭失效会话出错: {e}", self.name);
                }
            }
        }
    }

    /// 停止目标：先关闭会话，再停止模拟器；前一步失败不影响后一步
    ///
    /// 返回遇到的第一个错误。对已停止的目标调用无副作用。
    pub fn stop(&mut self) -> Result<()> {
        if self.state == TargetState::Stopped {
            return Ok(());
        }
        self.transition(TargetState::Stopping);

        let mut first_error = None;
        let mut record = |name: &str, result: Result<()>| {
            if let Err(e) = result {
                error!("[{name}] 清理失败: {e}");
                first_error.get_or_insert(e);
            }
        };

        match self.backend.take() {
            Some(Backend::Native(mut native)) => record(&self.name, native.close()),
            Some(Backend::Emulated {
                session,
                mut emulator,
            }) => {
                if let Some(mut session) = session {
                    record(&self.name, session.close());
                }
                record(&self.name, emulator.stop());
            }
            None => {}
        }

        self.transition(TargetState::Stopped);
        info!("[{}] 目标已停止", self.name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ControlInterface for Target {
    fn exec_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let result = self.control()?.exec_command_with_timeout(command, timeout);
        if let Err(e @ TargetError::Transport(_)) = &result {
            warn!("[{}] 传输失败，会话不再可用: {e}", self.name);
            self.discard_session();
        }
        result
    }

    fn default_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn close(&mut self) -> Result<()> {
        self.stop()
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("[{}] Target teardown 过程中出错: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MockConnector, MockControlInterface};
    use nix::sys::signal;
    use nix::unistd::Pid;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn pid_alive(pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    /// 用一个写出自身 pid 的 shell 进程充当模拟器
    fn fake_emulator(image: &Path, pidfile: &Path) -> TargetConfig {
        let mut config = TargetConfig::with_image(image);
        config.name = "fake-qemu".into();
        config.emulator.launcher = Some(vec![
            "sh".into(),
            "-c".into(),
            format!("echo $$ > {}; exec sleep 30", pidfile.display()),
        ]);
        config.timeouts.readiness = Duration::from_secs(5);
        config.timeouts.stop_grace = Duration::from_millis(500);
        config.timeouts.backoff_initial = Duration::from_millis(5);
        config.timeouts.backoff_max = Duration::from_millis(50);
        config
    }

    fn echo_session() -> Box<dyn ControlInterface + Send> {
        let mut session = MockControlInterface::new();
        session
            .expect_exec_command_with_timeout()
            .returning(|command, _| {
                Ok(CommandResult {
                    exit_code: 0,
                    stdout: format!("{}\n", command.trim_start_matches("echo ")).into_bytes(),
                    stderr: Vec::new(),
                })
            });
        session.expect_close().returning(|| Ok(()));
        Box::new(session)
    }

    fn connector_with(session: Box<dyn ControlInterface + Send>) -> MockConnector {
        let mut connector = MockConnector::new();
        let mut session = Some(session);
        connector
            .expect_connect()
            .times(1)
            .returning(move |_, _| Ok(session.take().unwrap()));
        connector
    }

    #[test_log::test]
    fn no_image_selects_native_without_process() {
        let connector = MockConnector::new();
        let mut target = Target::start_with(&TargetConfig::native(), &connector).unwrap();

        assert_eq!(target.backend_kind(), BackendKind::Native);
        assert_eq!(target.state(), TargetState::Ready);
        assert!(target.emulator_pid().is_none());

        let result = target.exec_command_blocking("echo hello").unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hello\n");
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn missing_image_fails_before_any_resource() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("qemu.pid");
        let config = fake_emulator(&dir.path().join("missing.img"), &pidfile);
        let connector = MockConnector::new();

        let err = Target::start_with(&config, &connector).err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("no image"));
        assert!(!pidfile.exists());
    }

    #[test_log::test]
    fn emulated_target_runs_commands_and_stops_twice() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let config = fake_emulator(&image, &dir.path().join("qemu.pid"));

        let mut target = Target::start_with(&config, &connector_with(echo_session())).unwrap();
        assert_eq!(target.backend_kind(), BackendKind::Emulated);
        assert_eq!(target.state(), TargetState::Ready);
        let pid = target.emulator_pid().unwrap();
        assert!(pid_alive(pid));

        let result = target.exec_command_blocking("echo hello").unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hello\n");
        assert!(result.stderr.is_empty());

        stop_target(&mut target).unwrap();
        assert_eq!(target.state(), TargetState::Stopped);
        assert!(!pid_alive(pid));

        stop_target(&mut target).unwrap();
        assert_eq!(target.state(), TargetState::Stopped);
        assert!(target.exec_command_blocking("echo again").unwrap_err().is_transport());
    }

    #[test]
    fn session_is_closed_before_emulator_stops() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let pidfile = dir.path().join("qemu.pid");
        let config = fake_emulator(&image, &pidfile);

        let emulator_alive_at_close = Arc::new(AtomicBool::new(false));
        let observed = emulator_alive_at_close.clone();
        let written = pidfile.clone();
        let mut session = MockControlInterface::new();
        session.expect_close().times(1).returning(move || {
            let pid: u32 = std::fs::read_to_string(&written)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            observed.store(pid_alive(pid), Ordering::SeqCst);
            // 关闭失败也不能阻止模拟器被停止
            Err(TargetError::Transport("disconnect failed".into()))
        });

        let mut target = Target::start_with(&config, &connector_with(Box::new(session))).unwrap();
        let pid = target.emulator_pid().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pidfile.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let err = target.stop().unwrap_err();
        assert!(err.is_transport());
        assert!(emulator_alive_at_close.load(Ordering::SeqCst));
        assert!(!pid_alive(pid));
        assert_eq!(target.state(), TargetState::Stopped);
    }

    #[test_log::test]
    fn transport_error_mid_test_still_stops_emulator() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let config = fake_emulator(&image, &dir.path().join("qemu.pid"));

        let mut session = MockControlInterface::new();
        session
            .expect_exec_command_with_timeout()
            .times(1)
            .returning(|_, _| Err(TargetError::Transport("connection reset".into())));
        session.expect_close().returning(|| Ok(()));

        let pid;
        {
            let mut target =
                Target::start_with(&config, &connector_with(Box::new(session))).unwrap();
            pid = target.emulator_pid().unwrap();

            assert!(target.exec_command_blocking("ls").unwrap_err().is_transport());
            // 会话已丢弃，后续命令不会再到达后端
            assert!(target.exec_command_blocking("ls").unwrap_err().is_transport());
            assert!(pid_alive(pid));
        }
        assert!(!pid_alive(pid));
    }

    #[test]
    fn readiness_timeout_releases_emulator() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let pidfile = dir.path().join("qemu.pid");
        let mut config = fake_emulator(&image, &pidfile);
        config.timeouts.readiness = Duration::from_millis(400);

        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .returning(|_, _| Err(TargetError::Transport("no route to host".into())));

        let start = Instant::now();
        let err = Target::start_with(&config, &connector).err().unwrap();
        assert!(err.is_timeout(), "{err}");
        assert!(start.elapsed() < Duration::from_millis(400) + Duration::from_secs(2));

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!pid_alive(pid));
    }

    #[test]
    fn spawn_failure_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let mut config = TargetConfig::with_image(&image);
        config.emulator.binary = "/nonexistent/qemu".into();

        let err = Target::start_with(&config, &MockConnector::new()).err().unwrap();
        assert!(matches!(err, TargetError::Spawn { .. }));
    }

    #[test]
    fn empty_launcher_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let mut config = TargetConfig::with_image(&image);
        config.emulator.binary = "/nonexistent/qemu".into();
        config.emulator.launcher = Some(Vec::new());

        let err = Target::start_with(&config, &MockConnector::new()).err().unwrap();
        assert!(err.is_configuration(), "{err}");
    }
}
