//! 模拟目标的私有网段约定
use serde::Deserialize;
use std::net::Ipv4Addr;

pub const DEFAULT_HOST_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 100, 1);
pub const DEFAULT_GUEST_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 100, 10);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// 宿主机侧的 tap 接口需预先配置为 `host_address`，客户机自行配置 `guest_address`
    Tap,
    /// QEMU 用户态网络，客户机 SSH 端口转发到 127.0.0.1:`forward_port`
    User,
}

/// 同一组地址在一个目标运行期间被独占；
/// 并发运行多个模拟目标时需要为每个目标配置不同的地址。
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub host_address: Ipv4Addr,
    pub guest_address: Ipv4Addr,
    pub mode: NetworkMode,
    pub tap_interface: String,
    pub forward_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: DEFAULT_HOST_ADDRESS,
            guest_address: DEFAULT_GUEST_ADDRESS,
            mode: NetworkMode::Tap,
            tap_interface: "tap0".to_string(),
            forward_port: 2222,
        }
    }
}
