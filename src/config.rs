//! 配置模块
//!
//! 目标配置可以来自 TOML 文件，命令行参数覆盖文件中的值。

pub mod cli_args;
pub mod connection_config;
pub mod emulator_config;
pub mod network_config;
pub mod target_config;
pub mod timeout_config;

pub use cli_args::CliArgs;
pub use connection_config::ConnectionConfig;
pub use emulator_config::EmulatorConfig;
pub use network_config::{NetworkConfig, NetworkMode};
pub use target_config::TargetConfig;
pub use timeout_config::TimeoutConfig;
