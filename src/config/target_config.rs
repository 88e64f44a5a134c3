//! Represents the configuration for one target.

use crate::config::connection_config::ConnectionConfig;
use crate::config::emulator_config::EmulatorConfig;
use crate::config::network_config::NetworkConfig;
use crate::config::timeout_config::TimeoutConfig;
use crate::error::{Result, TargetError};
use crate::utils;
/// This struct is used to deserialize the configuration from a file using the `utils::read_toml_from_file` method.
/// It contains the following fields:
/// - `name`: Label prefixed to every log line of this target.
/// - `image_path`: Optional emulator image. Absent means the commands run natively on the host.
/// - `network`: Host/guest addresses of the emulated target's private network.
/// - `connection`: SSH login used against the guest.
/// - `emulator`: How the QEMU process is launched.
/// - `timeouts`: Bounds for readiness wait, commands and teardown.
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetConfig {
    pub name: String,
    pub image_path: Option<PathBuf>,
    pub network: NetworkConfig,
    pub connection: ConnectionConfig,
    pub emulator: EmulatorConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: "target".to_string(),
            image_path: None,
            network: NetworkConfig::default(),
            connection: ConnectionConfig::default(),
            emulator: EmulatorConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl TargetConfig {
    /// 本地运行的配置（无镜像）
    pub fn native() -> Self {
        Self::default()
    }

    /// 使用指定镜像的模拟目标配置
    pub fn with_image(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: Some(image_path.into()),
            ..Self::default()
        }
    }

    /// 从文件中读取
    pub fn from_file(path: &Path) -> Result<Self> {
        utils::read_toml_from_file(path)
    }

    /// 校验镜像文件，返回需要启动的镜像路径；`None` 表示本地运行
    pub fn validated_image(&self) -> Result<Option<&Path>> {
        let Some(image) = self.image_path.as_deref() else {
            return Ok(None);
        };
        if !image.is_file() {
            return Err(TargetError::Configuration(format!(
                "no image: {}",
                image.display()
            )));
        }
        std::fs::File::open(image).map_err(|e| {
            TargetError::Configuration(format!("no image: {} ({e})", image.display()))
        })?;
        if self.emulator.launcher.as_ref().is_some_and(Vec::is_empty) {
            return Err(TargetError::Configuration(
                "emulator.launcher is empty; omit it to use emulator.binary".into(),
            ));
        }
        Ok(Some(image))
    }
}
