//! 各阻塞操作的时间上限
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    /// 等待客户机就绪的总时长
    #[serde(with = "humantime_serde")]
    pub readiness: Duration,
    /// `exec_command_blocking` 的默认上限
    #[serde(with = "humantime_serde")]
    pub command: Duration,
    /// SIGTERM 之后等待模拟器退出的宽限期
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,
    /// SIGKILL 之后等待进程回收的上限
    #[serde(with = "humantime_serde")]
    pub kill: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_initial: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            readiness: Duration::from_secs(60),
            command: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            kill: Duration::from_secs(2),
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
        }
    }
}
