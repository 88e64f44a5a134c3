//! 错误类型
//!
//! 非零退出码不是错误，它作为普通数据放在 `CommandResult` 里。

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    /// 配置无效或缺失（例如镜像文件不存在），在获取任何资源之前报告
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 进程或会话不可用；之后该控制接口视为不可再用
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {bound:?}")]
    Timeout {
        operation: &'static str,
        bound: Duration,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TargetError {
    /// 带上下文构造传输错误
    pub fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        TargetError::Transport(format!("{context}: {err}"))
    }

    pub fn timeout(operation: &'static str, bound: Duration) -> Self {
        TargetError::Timeout { operation, bound }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TargetError::Timeout { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, TargetError::Transport(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, TargetError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;
