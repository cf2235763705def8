use log::info;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Detailed information about a network interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceInfo {
    /// Device system name (used for capture operations)
    pub device_name: String,

    /// Human-readable description, when the platform provides one
    pub description: Option<String>,

    /// IPv4 address (if available)
    pub ipv4_address: Option<String>,

    /// MAC address (if available)
    pub mac_address: Option<String>,

    /// Whether this is a loopback interface
    pub is_loopback: bool,

    /// Whether this interface is up/active
    pub is_up: bool,
}

impl InterfaceInfo {
    /// Create a new interface info with just the device name
    pub fn new(device_name: String) -> Self {
        Self {
            device_name,
            description: None,
            ipv4_address: None,
            mac_address: None,
            is_loopback: false,
            is_up: true,
        }
    }

    /// Description if present, otherwise the device name
    pub fn display_name(&self) -> String {
        match &self.description {
            Some(desc) if !desc.is_empty() => desc.clone(),
            _ => self.device_name.clone(),
        }
    }
}

/// Enumerate capturable interfaces
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    let interfaces: Vec<InterfaceInfo> = pnet_datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let mut info = InterfaceInfo::new(iface.name.clone());

            if !iface.description.is_empty() {
                info.description = Some(iface.description.clone());
            }

            // Get the first IPv4 address
            info.ipv4_address = iface.ips.iter().find_map(|ip| match ip.ip() {
                IpAddr::V4(v4) => Some(v4.to_string()),
                IpAddr::V6(_) => None,
            });

            info.mac_address = iface.mac.map(|mac| mac.to_string());
            info.is_loopback = iface.is_loopback();
            info.is_up = iface.is_up();
            info
        })
        .collect();

    info!("Found {} network interfaces", interfaces.len());
    interfaces
}

/// Prefer en0, otherwise the first interface
pub fn default_interface(interfaces: &[InterfaceInfo]) -> Option<&InterfaceInfo> {
    interfaces
        .iter()
        .find(|iface| iface.device_name == "en0")
        .or_else(|| interfaces.first())
}
