use log::{debug, info};
use pnet::util::MacAddr;
use std::collections::HashSet;
use std::net::IpAddr;

/// Addresses owned by this host, collected once at startup.
///
/// Read-only after construction; shared between threads behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct LocalAddresses {
    ips: HashSet<String>,
    macs: HashSet<String>,
}

/// Lowercase an address string and drop any `%zone` suffix
pub fn normalize_address(addr: &str) -> String {
    let bare = match addr.find('%') {
        Some(idx) => &addr[..idx],
        None => addr,
    };
    bare.to_lowercase()
}

impl LocalAddresses {
    pub fn new<I, M>(ips: I, macs: M) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        Self {
            ips: ips.into_iter().map(|ip| normalize_address(ip.as_ref())).collect(),
            macs: macs.into_iter().map(|mac| mac.as_ref().to_lowercase()).collect(),
        }
    }

    /// Snapshot every interface address on the machine
    pub fn from_system() -> Self {
        let mut ips = HashSet::new();
        let mut macs = HashSet::new();

        for iface in pnet_datalink::interfaces() {
            for network in &iface.ips {
                ips.insert(Self::ip_key(network.ip()));
            }
            // Loopback and tunnel devices report an all-zero MAC
            if let Some(mac) = iface.mac {
                if mac != MacAddr::zero() {
                    macs.insert(mac.to_string());
                }
            }
            debug!("Local interface {}: {} addresses", iface.name, iface.ips.len());
        }

        info!("Local address snapshot: {} IPs, {} MACs", ips.len(), macs.len());
        Self { ips, macs }
    }

    fn ip_key(ip: IpAddr) -> String {
        normalize_address(&ip.to_string())
    }

    pub fn contains_ip(&self, addr: &str) -> bool {
        self.ips.contains(addr)
    }

    pub fn contains_mac(&self, mac: &MacAddr) -> bool {
        self.macs.contains(&mac.to_string())
    }

    pub fn ip_count(&self) -> usize {
        self.ips.len()
    }

    pub fn mac_count(&self) -> usize {
        self.macs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_zone_and_lowercases() {
        assert_eq!(normalize_address("FE80::1%en0"), "fe80::1");
        assert_eq!(normalize_address("192.168.1.10"), "192.168.1.10");
    }

    #[test]
    fn test_lookup_is_normalized() {
        let local = LocalAddresses::new(["FE80::AB%eth0", "10.0.0.5"], ["AA:BB:CC:DD:EE:FF"]);
        assert!(local.contains_ip("fe80::ab"));
        assert!(local.contains_ip("10.0.0.5"));
        assert!(local.contains_mac(&MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)));
        assert!(!local.contains_mac(&MacAddr::broadcast()));
        assert_eq!(local.ip_count(), 2);
        assert_eq!(local.mac_count(), 1);
    }
}
