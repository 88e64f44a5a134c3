//! Represents how the emulator process is launched.
///
/// - `binary`: QEMU system emulator to run.
/// - `memory`: Guest memory in MiB.
/// - `cpus`: Number of virtual CPUs.
/// - `extra_args`: Appended verbatim to the generated command line.
/// - `launcher`: Optional full argv replacing the generated command line (e.g. a wrapper script).
///   `{image}`, `{host_address}` and `{guest_address}` are substituted in every element.
///
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmulatorConfig {
    pub binary: String,
    pub memory: u32,
    pub cpus: u32,
    pub extra_args: Vec<String>,
    pub launcher: Option<Vec<String>>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            binary: "qemu-system-x86_64".to_string(),
            memory: 1024,
            cpus: 1,
            extra_args: Vec::new(),
            launcher: None,
        }
    }
}
