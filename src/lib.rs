//! Start a target and run shell commands against it.
//!
//! A target is either this host (no image configured) or an image booted in
//! QEMU and reached over SSH. Both are driven through [`ControlInterface`]:
//!
//! ```no_run
//! use target_harness::{ControlInterface, TargetConfig, start_target};
//!
//! let mut target = start_target(&TargetConfig::native())?;
//! let result = target.exec_command_blocking("echo hello")?;
//! assert_eq!(result.stdout, b"hello\n");
//! # Ok::<(), target_harness::TargetError>(())
//! ```
//!
//! The target is torn down when it goes out of scope, or explicitly with
//! [`stop_target`].

pub mod config;
pub mod connection;
pub mod error;
pub mod qemu_manager;
pub mod target_manager;
pub mod utils;

pub use config::TargetConfig;
pub use connection::{CommandResult, Connector, ControlInterface};
pub use error::{Result, TargetError};
pub use target_manager::{BackendKind, Target, TargetState, start_target, stop_target};
