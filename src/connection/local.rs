//! 本地控制接口
//!
//! 通过 `sh -c` 在宿主机上直接执行命令

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use log::{Level, debug, log_enabled, warn};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::connection::{CommandResult, ControlInterface};
use crate::error::{Result, TargetError};

/// 本地控制接口，无需启动步骤，创建即就绪
pub struct NativeInterface {
    label: String,
    default_timeout: Duration,
}

impl NativeInterface {
    pub fn new(label: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            default_timeout,
        }
    }
}

/// 在后台线程中读完一个管道，避免子进程因管道缓冲区写满而阻塞
fn drain<R: Read + Send + 'static>(
    mut pipe: R,
    name: &'static str,
) -> Result<Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("native-{name}"))
        .spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                warn!("读取{name}失败: {e}");
            }
            let _ = tx.send(buf);
        })?;
    Ok(rx)
}

fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Option<Vec<u8>> {
    rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .ok()
}

fn pipes(child: &mut Child) -> Result<(ChildStdout, ChildStderr)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TargetError::Transport("stdout 管道不可用".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TargetError::Transport("stderr 管道不可用".into()))?;
    Ok((stdout, stderr))
}

/// 子进程是独立进程组的组长，超时时整组杀掉，子 shell 与后台任务不会残留
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg({pgid}) 失败: {e}");
        let _ = child.kill();
    }
    let _ = child.wait();
}

impl ControlInterface for NativeInterface {
    fn exec_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        debug!("[{}] 执行本地命令: {command}", self.label);
        let deadline = Instant::now() + timeout;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| TargetError::transport("无法启动本地 shell", e))?;

        let (stdout_pipe, stderr_pipe) = pipes(&mut child)?;
        let stdout_rx = drain(stdout_pipe, "stdout")?;
        let stderr_rx = drain(stderr_pipe, "stderr")?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!("[{}] 命令执行超时: {command}", self.label);
                kill_group(&mut child);
                return Err(TargetError::timeout("native command", timeout));
            }
            thread::sleep(Duration::from_millis(10));
        };

        // 后台进程可能继承管道，输出读取同样受截止时间约束
        let (Some(stdout), Some(stderr)) = (
            collect(&stdout_rx, deadline),
            collect(&stderr_rx, deadline),
        ) else {
            warn!("[{}] 命令输出未在时限内关闭: {command}", self.label);
            let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
            return Err(TargetError::timeout("native command output", timeout));
        };

        let exit_code = status.code().unwrap_or(-1);
        if log_enabled!(Level::Debug) {
            debug!(
                "[{}] 命令执行完成: exit_code={exit_code}, stdout={}B, stderr={}B",
                self.label,
                stdout.len(),
                stderr.len()
            );
        }

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
