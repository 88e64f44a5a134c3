//! Utility helpers shared by the backends.
//!
//! Bounded polling with exponential backoff, and TOML loading.

use crate::error::{Result, TargetError};
use log::{debug, error};
use serde::de::DeserializeOwned;
use std::{
    fs,
    path::Path,
    thread,
    time::{Duration, Instant},
};

/// Exponential backoff between polling attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

/// 最小等待间隔，零间隔会让轮询退化为忙等
const MIN_DELAY: Duration = Duration::from_millis(1);

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_DELAY);
        Backoff {
            initial,
            max: max.max(initial),
        }
    }

    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// 在 `timeout` 内反复调用 `attempt`，直到它返回 `Ok(Some(_))`
///
/// `attempt` 的参数是尝试序号（从 1 开始）和剩余时间，用于限制单次尝试的耗时。
/// `Ok(None)` 表示尚未就绪，等待后重试；`Err` 立即终止轮询并向上传播。
/// 等待时间不会超过剩余时间，所以超时错误在 `timeout` 加上单次尝试耗时之内返回。
pub fn poll_with_backoff<T, F>(
    operation: &'static str,
    timeout: Duration,
    backoff: Backoff,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32, Duration) -> Result<Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = backoff.initial;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(value) = attempt(attempts, remaining)? {
            return Ok(value);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("{operation}: giving up after {attempts} attempts");
            return Err(TargetError::timeout(operation, timeout));
        }
        thread::sleep(delay.min(remaining));
        delay = backoff.next(delay);
    }
}

/// Reads a TOML file into an arbitrary struct.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read or parsed.
pub fn read_toml_from_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        TargetError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    match toml::de::from_str(&content) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to parse TOML file: {e}");
            Err(TargetError::Configuration(format!(
                "invalid {}: {e}",
                path.display()
            )))
        }
    }
}
