use anyhow::{Context, Result};
use log::info;
use std::io::{self, Write};
use std::process::ExitCode;

use target_harness::config::CliArgs;
use target_harness::{ControlInterface, start_target};

fn main() -> ExitCode {
    let args = CliArgs::parse_args();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.get_log_level()))
        .init();

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// 按顺序执行命令，返回第一个失败命令的退出码
fn run(args: &CliArgs) -> Result<u8> {
    let config = args
        .target_config()
        .context("Failed to load target configuration")?;
    let mut target = start_target(&config).context("Failed to start target")?;

    let mut exit_code = 0;
    for command in &args.commands {
        let result = target
            .exec_command_blocking(command)
            .with_context(|| format!("Failed to execute `{command}`"))?;
        io::stdout().write_all(&result.stdout)?;
        io::stderr().write_all(&result.stderr)?;
        info!("`{command}` exited with {}", result.exit_code);
        if exit_code == 0 && result.exit_code != 0 {
            exit_code = result.exit_code.clamp(1, 255) as u8;
        }
    }

    target.stop().context("Failed to stop target")?;
    Ok(exit_code)
}
