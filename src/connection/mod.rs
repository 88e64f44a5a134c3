//! 控制接口模块
//!
//! 该模块为不同后端（本地、SSH）提供统一的命令执行接口

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

/// 命令执行结果，生成后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// 退出码，被信号终止时为 -1
    pub exit_code: i32,
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// 控制接口特质
///
/// 所有后端的结果形态和阻塞语义一致，测试代码不需要关心具体后端。
/// 方法取 `&mut self`，同一个接口上的命令严格按调用顺序串行执行。
#[cfg_attr(test, mockall::automock)]
pub trait ControlInterface {
    /// 执行命令并阻塞到命令结束、输出读取完毕
    ///
    /// 非零退出码是正常结果；传输层不可用时返回 `Transport`，超过 `timeout` 返回 `Timeout`。
    fn exec_command_with_timeout(&mut self, command: &str, timeout: Duration)
    -> Result<CommandResult>;

    /// 未显式指定时使用的命令超时
    fn default_timeout(&self) -> Duration;

    /// 以默认超时执行命令
    fn exec_command_blocking(&mut self, command: &str) -> Result<CommandResult> {
        let timeout = self.default_timeout();
        self.exec_command_with_timeout(command, timeout)
    }

    /// 关闭接口，重复调用无副作用
    ///
    /// 默认实现什么也不做并返回Ok
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 在给定时限内建立到目标地址的会话
///
/// 生命周期管理器用它探测客户机是否就绪，探测成功的会话直接交给调用方。
#[cfg_attr(test, mockall::automock)]
pub trait Connector {
    fn connect(
        &self,
        endpoint: SocketAddr,
        timeout: Duration,
    ) -> Result<Box<dyn ControlInterface + Send>>;
}

// 实现本地控制接口
mod local;
pub use local::NativeInterface;

// 实现SSH控制接口
mod ssh;
pub use ssh::{SessionState, SshConnector, SshInterface};
