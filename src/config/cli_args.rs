use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::target_config::TargetConfig;
use crate::error::Result;

// target-harness - 启动目标并在其上执行命令
#[derive(Parser, Debug)]
#[clap(
    name = "target-harness",
    version,
    about = "Start a target (host or QEMU guest) and run commands against it",
    after_help = "TARGET SELECTION:\n  (no image)             Run commands natively on this host\n  --image-path <FILE>    Boot the image in QEMU and run commands over SSH\n\nEXAMPLES:\n  target-harness -c 'echo hello'\n  target-harness --image-path disk.img -c ls -c 'uname -a'\n  target-harness --config target.toml --readiness-timeout 120 -c ls"
)]
pub struct CliArgs {
    // Image path - Boot this image in the emulator instead of running natively
    // 镜像路径 - 在模拟器中启动该镜像，而不是在本机运行
    #[clap(long = "image-path", help = "Path to the image file for the target")]
    pub image_path: Option<PathBuf>,

    // Target config file
    // 目标配置文件
    #[clap(long = "config", help = "Target configuration file (TOML)")]
    pub config: Option<PathBuf>,

    // Target name used in log lines
    // 日志中使用的目标名称
    #[clap(long = "name", help = "Name of the target in log output")]
    pub name: Option<String>,

    // Commands to execute, in order
    // 按顺序执行的命令
    #[clap(short = 'c', long = "command", required = true, help = "Command to execute (repeatable)")]
    pub commands: Vec<String>,

    // Readiness timeout (seconds)
    // 就绪等待超时（秒）
    #[clap(long = "readiness-timeout", help = "Readiness wait timeout in seconds")]
    pub readiness_timeout: Option<u64>,

    // Command execution timeout (seconds)
    // 执行命令超时时间（秒）
    #[clap(long = "timeout", help = "Command timeout in seconds")]
    pub timeout: Option<u64>,

    // Verbose mode - Show more log information
    // 详细模式 - 显示更多日志信息
    #[clap(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    // Quiet mode
    // 安静模式
    #[clap(short = 'q', long = "quiet", help = "Suppress non-essential output")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse command line arguments
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get log level
    /// 获取日志级别
    pub fn get_log_level(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Build the target configuration: file first, then command line overrides
    /// 构建目标配置：先读文件，再用命令行参数覆盖
    pub fn target_config(&self) -> Result<TargetConfig> {
        let mut config = match &self.config {
            Some(path) => TargetConfig::from_file(path)?,
            None => TargetConfig::default(),
        };
        if let Some(image) = &self.image_path {
            config.image_path = Some(image.clone());
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(secs) = self.readiness_timeout {
            config.timeouts.readiness = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.timeouts.command = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
