//! Represents the SSH login used to reach a target.
///
/// # Fields
///
/// - `port`: SSH port on the guest (ignored in user-mode networking, where the forwarded port is used).
/// - `username`: A string representing the username.
/// - `password`: An optional string representing the password. Images with an empty root password need `password = ""`.
/// - `private_key_path`: An optional path to the private key file, `~` is expanded.
/// - `timeout`: Bound for TCP connect, handshake and authentication of one connection attempt.
///
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: 22,
            username: "root".to_string(),
            password: None,
            private_key_path: None,
            timeout: Duration::from_secs(15),
        }
    }
}
