//! QEMU 模拟目标
//!
//! 以子进程方式启动模拟器，stdin/stdout/stderr 都接到管道上，
//! 两路输出由后台线程持续读取，写入日志并保留最近的控制台输出。

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::config::network_config::NetworkMode;
use crate::config::target_config::TargetConfig;
use crate::connection::{Connector, ControlInterface};
use crate::error::{Result, TargetError};
use crate::utils::{self, Backoff};

const CONSOLE_TAIL_LINES: usize = 64;

type ConsoleTail = Arc<Mutex<VecDeque<String>>>;

pub struct QemuManager {
    label: String,
    program: String,
    args: Vec<String>,
    endpoint: SocketAddr,
    stop_grace: Duration,
    kill_timeout: Duration,
    child: Option<Child>,
    console: ConsoleTail,
}

/// 生成 QEMU 命令行参数（不含程序名）
fn qemu_args(image: &Path, config: &TargetConfig) -> Vec<String> {
    let network = &config.network;
    let emulator = &config.emulator;

    let netdev = match network.mode {
        NetworkMode::Tap => format!(
            "tap,id=net0,ifname={},script=no,downscript=no",
            network.tap_interface
        ),
        NetworkMode::User => format!(
            "user,id=net0,net={host}/24,host={host},dhcpstart={guest},hostfwd=tcp:127.0.0.1:{port}-{guest}:22",
            host = network.host_address,
            guest = network.guest_address,
            port = network.forward_port,
        ),
    };

    let mut args = vec![
        "-m".to_string(),
        emulator.memory.to_string(),
        "-smp".to_string(),
        emulator.cpus.to_string(),
        "-nographic".to_string(),
        "-drive".to_string(),
        format!("file={},if=virtio,format=raw", image.display()),
        "-netdev".to_string(),
        netdev,
        "-device".to_string(),
        "virtio-net-pci,netdev=net0".to_string(),
    ];
    args.extend(emulator.extra_args.iter().cloned());
    args
}

/// 替换启动器参数中的占位符
fn substitute(arg: &str, image: &Path, config: &TargetConfig) -> String {
    arg.replace("{image}", &image.display().to_string())
        .replace("{host_address}", &config.network.host_address.to_string())
        .replace("{guest_address}", &config.network.guest_address.to_string())
}

fn session_endpoint(config: &TargetConfig) -> SocketAddr {
    match config.network.mode {
        NetworkMode::Tap => SocketAddr::new(
            IpAddr::V4(config.network.guest_address),
            config.connection.port,
        ),
        NetworkMode::User => SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            config.network.forward_port,
        ),
    }
}

/// 逐行读取控制台输出直到管道关闭；不要求输出是合法 UTF-8
fn drain_console<R: Read + Send + 'static>(
    pipe: R,
    stream: &'static str,
    label: String,
    console: ConsoleTail,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("qemu-{stream}"))
        .spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).trim_end().to_string();
                        debug!("[{label}] {stream}: {text}");
                        if let Ok(mut tail) = console.lock() {
                            if tail.len() == CONSOLE_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(text);
                        }
                    }
                    Err(e) => {
                        debug!("[{label}] 读取 QEMU {stream} 失败: {e}");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

/// 在 `bound` 内等待进程退出，返回是否已退出
fn wait_for_exit(child: &mut Child, bound: Duration) -> bool {
    let deadline = Instant::now() + bound;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("QEMU 进程已退出: {status}");
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("查询 QEMU 进程状态失败: {e}");
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

impl QemuManager {
    /// 根据配置准备模拟器命令行，此时还不启动进程
    pub fn new(image: &Path, config: &TargetConfig) -> Self {
        let (program, args) = match config.emulator.launcher.as_deref() {
            Some([program, rest @ ..]) => (
                substitute(program, image, config),
                rest.iter().map(|arg| substitute(arg, image, config)).collect(),
            ),
            _ => (config.emulator.binary.clone(), qemu_args(image, config)),
        };

        QemuManager {
            label: config.name.clone(),
            program,
            args,
            endpoint: session_endpoint(config),
            stop_grace: config.timeouts.stop_grace,
            kill_timeout: config.timeouts.kill,
            child: None,
            console: Arc::new(Mutex::new(VecDeque::with_capacity(CONSOLE_TAIL_LINES))),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// 客户机 SSH 服务的地址
    pub fn session_endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// 启动 QEMU 虚拟机
    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(TargetError::Transport("QEMU 已经在运行".into()));
        }

        info!("[{}] 启动 QEMU 虚拟机: {} {}", self.label, self.program, self.args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TargetError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!("[{}] QEMU pid: {}", self.label, child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.child = Some(child);

        if let Some(stdout) = stdout {
            drain_console(stdout, "stdout", self.label.clone(), self.console.clone())?;
        }
        if let Some(stderr) = stderr {
            drain_console(stderr, "stderr", self.label.clone(), self.console.clone())?;
        }
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// 最近的控制台输出
    pub fn console_tail(&self) -> Vec<String> {
        self.console
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 进程已退出时返回带控制台输出的传输错误
    fn check_alive(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(TargetError::Transport("QEMU 未启动".into()));
        };
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => {
                // 给读取线程一点时间把最后的输出写进来
                thread::sleep(Duration::from_millis(100));
                Err(TargetError::Transport(format!(
                    "QEMU 提前退出 ({status}):\n{}",
                    self.console_tail().join("\n")
                )))
            }
        }
    }

    /// 轮询连接器直到客户机接受会话，返回探测成功的会话
    ///
    /// 每次尝试前检查进程是否还活着；进程退出立即失败，不再等到超时。
    pub fn wait_until_ready(
        &mut self,
        connector: &dyn Connector,
        timeout: Duration,
        backoff: Backoff,
    ) -> Result<Box<dyn ControlInterface + Send>> {
        let endpoint = self.endpoint;
        let label = self.label.clone();
        info!("[{label}] 等待客户机 {endpoint} 就绪 (最长 {timeout:?})");

        let session = utils::poll_with_backoff("readiness wait", timeout, backoff, |attempt, remaining| {
            self.check_alive()?;
            if remaining.is_zero() {
                return Ok(None);
            }
            debug!("[{label}] 尝试连接 {endpoint} (尝试 {attempt})");
            match connector.connect(endpoint, remaining) {
                Ok(session) => {
                    info!("[{label}] 客户机就绪 (尝试 {attempt})");
                    Ok(Some(session))
                }
                Err(e) => {
                    debug!("[{label}] 连接尝试失败: {e}, 等待重试");
                    Ok(None)
                }
            }
        })?;
        Ok(session)
    }

    /// 停止 QEMU 虚拟机
    ///
    /// 先发送 SIGTERM，宽限期内未退出则 SIGKILL。重复调用无副作用。
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("[{}] 停止 QEMU 虚拟机 (pid {})", self.label, child.id());
        drop(child.stdin.take());

        if matches!(child.try_wait(), Ok(Some(_))) {
            debug!("[{}] QEMU 已自行退出", self.label);
            return Ok(());
        }

        let pid = Pid::from_raw(child.id() as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            warn!("[{}] 发送 SIGTERM 失败: {e}", self.label);
        }
        if wait_for_exit(&mut child, self.stop_grace) {
            info!("[{}] QEMU 虚拟机停止成功", self.label);
            return Ok(());
        }

        warn!(
            "[{}] QEMU 在 {:?} 内未退出，强制结束",
            self.label, self.stop_grace
        );
        if let Err(e) = child.kill() {
            error!("[{}] 强制结束 QEMU 失败: {e}", self.label);
        }
        if wait_for_exit(&mut child, self.kill_timeout) {
            info!("[{}] QEMU 虚拟机已被强制结束", self.label);
            return Ok(());
        }

        error!("[{}] QEMU 进程 {} 无法结束", self.label, child.id());
        Err(TargetError::timeout(
            "emulator stop",
            self.stop_grace + self.kill_timeout,
        ))
    }
}

// 确保进程不会比管理器活得更久
impl Drop for QemuManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("[{}] QemuManager 停止过程中出错: {e}", self.label);
        }
    }
}
