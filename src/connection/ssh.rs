//! SSH控制接口
//!
//! 该模块通过 SSH 会话在远程目标上执行命令。
//!
//! 会话状态依次为 `Disconnected → Connecting → Connected → Closed`。
//! 连接阶段的失败直接返回给调用方，这里不做重试；重试策略属于生命周期管理器。
//! 执行命令时发生传输层错误后会话会被关闭，之后的命令都返回 `Transport` 错误。

use log::{debug, error, warn};
use ssh2::{Channel, ErrorCode, Session};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::connection_config::ConnectionConfig;
use crate::connection::{CommandResult, Connector, ControlInterface};
use crate::error::{Result, TargetError};

// libssh2 的 LIBSSH2_ERROR_TIMEOUT
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// SSH控制接口
pub struct SshInterface {
    label: String,
    endpoint: SocketAddr,
    /// SSH会话，仅在 `Connected` 状态下存在
    session: Option<Session>,
    state: SessionState,
    default_timeout: Duration,
}

/// 把 ssh2 错误映射为超时或传输错误
fn ssh_error(context: &str, err: ssh2::Error, operation: &'static str, bound: Duration) -> TargetError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => TargetError::timeout(operation, bound),
        _ => TargetError::transport(context, err),
    }
}

/// libssh2 的超时以毫秒计，0 表示不限时
fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().clamp(1, u32::MAX as u128) as u32
}

/// 远端进程被信号终止时只发送 exit-signal，此时 libssh2 给出的退出码是 0，统一映射为 -1
fn exit_code_from(status: i32, signal: Option<&str>) -> i32 {
    match signal {
        Some(_) => -1,
        None => status,
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl SshInterface {
    /// 建立SSH连接，`timeout` 限制 TCP 连接、握手和认证的总耗时
    pub fn connect(
        label: impl Into<String>,
        endpoint: SocketAddr,
        config: &ConnectionConfig,
        timeout: Duration,
        default_timeout: Duration,
    ) -> Result<Self> {
        let mut interface = Self {
            label: label.into(),
            endpoint,
            session: None,
            state: SessionState::Disconnected,
            default_timeout,
        };
        interface.open(config, timeout)?;
        Ok(interface)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn open(&mut self, config: &ConnectionConfig, timeout: Duration) -> Result<()> {
        self.state = SessionState::Connecting;
        debug!(
            "[{}] 创建SSH连接: {}@{}",
            self.label, config.username, self.endpoint
        );
        match Self::establish(self.endpoint, config, timeout) {
            Ok(session) => {
                self.session = Some(session);
                self.state = SessionState::Connected;
                debug!("[{}] SSH连接已建立", self.label);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    fn establish(endpoint: SocketAddr, config: &ConnectionConfig, timeout: Duration) -> Result<Session> {
        let timeout = timeout.max(Duration::from_millis(1));
        let tcp = TcpStream::connect_timeout(&endpoint, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                TargetError::timeout("ssh connect", timeout)
            } else {
                TargetError::transport(&format!("无法连接到 {endpoint}"), e)
            }
        })?;

        let mut session =
            Session::new().map_err(|e| TargetError::transport("无法创建SSH会话", e))?;
        session.set_timeout(timeout_millis(timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ssh_error("SSH握手失败", e, "ssh handshake", timeout))?;

        Self::authenticate(&session, config)?;
        Ok(session)
    }

    /// 身份验证：依次尝试代理、私钥文件、密码
    fn authenticate(session: &Session, config: &ConnectionConfig) -> Result<()> {
        let username = config.username.as_str();

        match session.userauth_agent(username) {
            Ok(_) => debug!("SSH 代理认证成功"),
            Err(e) => debug!("SSH 代理认证失败: {e}"),
        }

        if !session.authenticated() {
            if let Some(key) = &config.private_key_path {
                let key_path = expand_home(key);
                if key_path.exists() {
                    match session.userauth_pubkey_file(username, None, &key_path, None) {
                        Ok(_) => debug!("SSH 公钥文件认证成功 ({})", key_path.display()),
                        Err(e) => debug!("SSH 公钥文件认证失败 ({}): {e}", key_path.display()),
                    }
                } else {
                    debug!("私钥文件未找到: {}", key_path.display());
                }
            }
        }

        if !session.authenticated() {
            if let Some(password) = &config.password {
                match session.userauth_password(username, password) {
                    Ok(_) => debug!("SSH 密码认证成功"),
                    Err(e) => debug!("SSH 密码认证失败: {e}"),
                }
            }
        }

        if !session.authenticated() {
            return Err(TargetError::Transport(format!(
                "所有 SSH 认证方法都失败 (用户 {username})"
            )));
        }
        Ok(())
    }

    fn live_session(&self) -> Result<&Session> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Connected) => Ok(session),
            _ => Err(TargetError::Transport(format!(
                "SSH 会话不可用 ({:?})",
                self.state
            ))),
        }
    }

    fn run(session: &Session, command: &str, timeout: Duration) -> Result<CommandResult> {
        let deadline = Instant::now() + timeout;
        session.set_timeout(timeout_millis(timeout));

        let mut channel = session
            .channel_session()
            .map_err(|e| ssh_error("无法打开SSH会话通道", e, "ssh command", timeout))?;
        channel
            .exec(command)
            .map_err(|e| ssh_error("无法执行远程命令", e, "ssh command", timeout))?;
        channel
            .send_eof()
            .map_err(|e| ssh_error("无法关闭标准输入", e, "ssh command", timeout))?;

        session.set_blocking(false);
        let streams = read_channel_until(&mut channel, deadline, timeout);
        session.set_blocking(true);
        let (stdout, stderr) = streams?;

        session.set_timeout(timeout_millis(
            deadline.saturating_duration_since(Instant::now()),
        ));
        channel
            .wait_close()
            .map_err(|e| ssh_error("等待通道关闭失败", e, "ssh command", timeout))?;
        let status = channel
            .exit_status()
            .map_err(|e| TargetError::transport("无法获取退出码", e))?;
        let signal = channel
            .exit_signal()
            .map_err(|e| TargetError::transport("无法获取退出信号", e))?;
        if let Some(name) = &signal.exit_signal {
            debug!("远程命令被信号 {name} 终止");
        }
        let exit_code = exit_code_from(status, signal.exit_signal.as_deref());

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

impl ControlInterface for SshInterface {
    fn exec_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        debug!("[{}] 执行SSH命令: {command}", self.label);
        let result = Self::run(self.live_session()?, command, timeout);

        match &result {
            Ok(output) => debug!(
                "[{}] SSH命令执行完成: exit_code={}",
                self.label, output.exit_code
            ),
            Err(e @ TargetError::Transport(_)) => {
                warn!("[{}] SSH 传输失败，关闭会话: {e}", self.label);
                if let Err(close_err) = self.close() {
                    debug!("[{}] 关闭失效会话出错: {close_err}", self.label);
                }
            }
            Err(e) => warn!("[{}] SSH命令失败: {e}", self.label),
        }
        result
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// 关闭SSH连接
    fn close(&mut self) -> Result<()> {
        let session = self.session.take();
        self.state = SessionState::Closed;
        if let Some(session) = session {
            debug!("[{}] 关闭SSH连接", self.label);
            session
                .disconnect(None, "正常关闭", None)
                .map_err(|e| TargetError::transport("关闭SSH连接失败", e))?;
        }
        Ok(())
    }
}

impl Drop for SshInterface {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("[{}] {e}", self.label);
        }
    }
}

/// 把当前可读的数据全部读出，返回是否读到了数据
fn drain_stream(stream: &mut impl Read, out: &mut Vec<u8>, buf: &mut [u8]) -> io::Result<bool> {
    let mut progressed = false;
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) => return Err(e),
        }
    }
}

/// 非阻塞地交替读取标准输出和标准错误，直到通道 EOF 且两路都已读空
fn read_channel_until(
    channel: &mut Channel,
    deadline: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buffer = [0; 4096];

    loop {
        let out = drain_stream(channel, &mut stdout, &mut buffer)
            .map_err(|e| TargetError::transport("读取标准输出失败", e))?;
        let err = drain_stream(&mut channel.stderr(), &mut stderr, &mut buffer)
            .map_err(|e| TargetError::transport("读取标准错误失败", e))?;
        let progressed = out || err;

        if channel.eof() && !progressed {
            return Ok((stdout, stderr));
        }
        if Instant::now() >= deadline {
            warn!("SSH命令执行超时");
            return Err(TargetError::timeout("ssh command", timeout));
        }
        if !progressed {
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// 用 SSH 建立会话的连接器
pub struct SshConnector {
    label: String,
    config: ConnectionConfig,
    command_timeout: Duration,
}

impl SshConnector {
    pub fn new(label: impl Into<String>, config: ConnectionConfig, command_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            config,
            command_timeout,
        }
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        endpoint: SocketAddr,
        timeout: Duration,
    ) -> Result<Box<dyn ControlInterface + Send>> {
        let interface = SshInterface::connect(
            self.label.clone(),
            endpoint,
            &self.config,
            timeout.min(self.config.timeout),
            self.command_timeout,
        )?;
        Ok(Box::new(interface))
    }
}
