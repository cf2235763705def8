//! Per-protocol heuristics that flag unusual traffic.
//!
//! Everything here is pure: no state, no storage. Forwarding flagged records
//! is the caller's job.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::models::record::{IcmpDetails, PacketRecord, TcpDetails, TcpFlag, UdpDetails};

const ODD_TCP_PORTS: [u16; 4] = [1337, 666, 31337, 0];
const MIN_SYN_WINDOW: u16 = 100;
const DNS_PORT: u16 = 53;
const MAX_DNS_NAME_LENGTH: usize = 255;
const MAX_DNS_LABEL_LENGTH: usize = 63;
const MAX_DNS_UNDERSCORES: usize = 5;
const ICMP_PAYLOAD_THRESHOLD: usize = 1000;

lazy_static! {
    static ref HEX_LABEL: Regex = Regex::new(r"^[0-9A-Fa-f]{32,}$").unwrap();
    static ref BEACON_LABEL: Regex = Regex::new(r"^[a-z0-9]{12,}$").unwrap();
}

/// Why a record was flagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AnomalyReason {
    OddTcpPort { port: u16 },
    TinySynWindow { window: u16 },
    DnsNameTooLong { length: usize },
    DnsTooManyUnderscores { count: usize },
    DnsLabelTooLong { length: usize },
    DnsHexLabel { label: String },
    DnsBeaconLabel { label: String },
    IcmpLargeEcho { payload: usize },
    IcmpHostUnreachable,
    IcmpSourceQuench,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::OddTcpPort { port } => write!(f, "odd TCP port {}", port),
            AnomalyReason::TinySynWindow { window } => write!(f, "SYN without ACK, window {}", window),
            AnomalyReason::DnsNameTooLong { length } => write!(f, "DNS name of {} characters", length),
            AnomalyReason::DnsTooManyUnderscores { count } => write!(f, "{} underscores in DNS name", count),
            AnomalyReason::DnsLabelTooLong { length } => write!(f, "DNS label of {} characters", length),
            AnomalyReason::DnsHexLabel { label } => write!(f, "hex-only DNS label {}", label),
            AnomalyReason::DnsBeaconLabel { label } => write!(f, "random-looking DNS label {}", label),
            AnomalyReason::IcmpLargeEcho { payload } => write!(f, "echo request with {} byte payload", payload),
            AnomalyReason::IcmpHostUnreachable => write!(f, "host unreachable"),
            AnomalyReason::IcmpSourceQuench => write!(f, "source quench"),
        }
    }
}

/// First heuristic the record trips, if any
pub fn inspect(record: &PacketRecord) -> Option<AnomalyReason> {
    match record.protocol.trim().to_uppercase().as_str() {
        "TCP" => record.tcp().and_then(inspect_tcp),
        "UDP" => record.udp().and_then(inspect_dns),
        "ICMP" => record.icmp().and_then(inspect_icmp),
        _ => None,
    }
}

pub fn is_suspicious(record: &PacketRecord) -> bool {
    inspect(record).is_some()
}

fn inspect_tcp(tcp: &TcpDetails) -> Option<AnomalyReason> {
    for port in [tcp.source_port, tcp.destination_port] {
        if ODD_TCP_PORTS.contains(&port) {
            return Some(AnomalyReason::OddTcpPort { port });
        }
    }

    // Tiny window on a bare SYN: scan or resource exhaustion
    if tcp.flags.contains(TcpFlag::Syn) && !tcp.flags.contains(TcpFlag::Ack) && tcp.window < MIN_SYN_WINDOW {
        return Some(AnomalyReason::TinySynWindow { window: tcp.window });
    }

    None
}

fn inspect_dns(udp: &UdpDetails) -> Option<AnomalyReason> {
    if udp.source_port != DNS_PORT && udp.destination_port != DNS_PORT {
        return None;
    }
    let name = udp.dns_query.as_deref()?;
    inspect_dns_name(name)
}

/// Length, underscore and label-shape checks on a query name
pub fn inspect_dns_name(name: &str) -> Option<AnomalyReason> {
    let length = name.chars().count();
    if length > MAX_DNS_NAME_LENGTH {
        return Some(AnomalyReason::DnsNameTooLong { length });
    }

    let count = name.chars().filter(|&c| c == '_').count();
    if count > MAX_DNS_UNDERSCORES {
        return Some(AnomalyReason::DnsTooManyUnderscores { count });
    }

    for label in name.split('.') {
        let length = label.chars().count();
        if length > MAX_DNS_LABEL_LENGTH {
            return Some(AnomalyReason::DnsLabelTooLong { length });
        }
        if HEX_LABEL.is_match(label) {
            return Some(AnomalyReason::DnsHexLabel { label: label.to_string() });
        }
        if BEACON_LABEL.is_match(label) {
            return Some(AnomalyReason::DnsBeaconLabel { label: label.to_string() });
        }
    }

    None
}

fn inspect_icmp(icmp: &IcmpDetails) -> Option<AnomalyReason> {
    let payload = icmp.payload.as_ref().map_or(0, Vec::len);

    match (icmp.icmp_type, icmp.icmp_code) {
        (8, _) if payload > ICMP_PAYLOAD_THRESHOLD => Some(AnomalyReason::IcmpLargeEcho { payload }),
        (3, 1) => Some(AnomalyReason::IcmpHostUnreachable),
        (4, _) => Some(AnomalyReason::IcmpSourceQuench),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::{ProtocolDetails, TcpFlags};
    use chrono::Utc;

    fn record(protocol: &str, details: Option<ProtocolDetails>) -> PacketRecord {
        PacketRecord {
            timestamp: Utc::now(),
            source: "10.0.0.1".to_string(),
            destination: "10.0.0.2".to_string(),
            protocol: protocol.to_string(),
            length: 64,
            summary: String::new(),
            dump: String::new(),
            is_self_originated: false,
            is_broadcast_or_multicast: false,
            details,
        }
    }

    fn tcp(sport: u16, dport: u16, flags: &[TcpFlag], window: u16) -> PacketRecord {
        record(
            "TCP",
            Some(ProtocolDetails::Tcp(TcpDetails {
                source_port: sport,
                destination_port: dport,
                window,
                flags: TcpFlags::from_flags(flags),
                payload: None,
            })),
        )
    }

    fn dns(sport: u16, dport: u16, name: Option<&str>) -> PacketRecord {
        record(
            "UDP",
            Some(ProtocolDetails::Udp(UdpDetails {
                source_port: sport,
                destination_port: dport,
                dns_query: name.map(str::to_string),
                payload: None,
            })),
        )
    }

    fn icmp(icmp_type: u8, icmp_code: u8, payload_len: usize) -> PacketRecord {
        record(
            "ICMP",
            Some(ProtocolDetails::Icmp(IcmpDetails {
                icmp_type,
                icmp_code,
                payload: if payload_len == 0 { None } else { Some(vec![0; payload_len]) },
            })),
        )
    }

    #[test]
    fn test_odd_tcp_ports() {
        assert!(is_suspicious(&tcp(50000, 1337, &[TcpFlag::Ack], 5000)));
        assert!(is_suspicious(&tcp(31337, 80, &[TcpFlag::Ack], 5000)));
        assert!(is_suspicious(&tcp(0, 80, &[TcpFlag::Ack], 5000)));
        assert_eq!(
            inspect(&tcp(666, 80, &[], 5000)),
            Some(AnomalyReason::OddTcpPort { port: 666 })
        );
        assert!(!is_suspicious(&tcp(50000, 443, &[TcpFlag::Ack], 5000)));
    }

    #[test]
    fn test_tcp_label_without_ports_is_clean() {
        // Later fragments keep the TCP label but carry no header to judge
        let mut fragment = record("TCP", None);
        fragment.summary = "TCP packet".to_string();
        assert_eq!(inspect(&fragment), None);
        assert!(!is_suspicious(&record("UDP", None)));
    }

    #[test]
    fn test_syn_window() {
        assert_eq!(
            inspect(&tcp(50000, 443, &[TcpFlag::Syn], 50)),
            Some(AnomalyReason::TinySynWindow { window: 50 })
        );
        assert!(!is_suspicious(&tcp(50000, 443, &[TcpFlag::Syn], 2000)));
        assert!(!is_suspicious(&tcp(50000, 443, &[TcpFlag::Syn, TcpFlag::Ack], 50)));
        assert!(!is_suspicious(&tcp(50000, 443, &[TcpFlag::Ack], 50)));
    }

    #[test]
    fn test_dns_name_length() {
        let long = "a.".repeat(150);
        assert_eq!(long.len(), 300);
        assert!(is_suspicious(&dns(40000, 53, Some(&long))));
        assert!(!is_suspicious(&dns(40000, 53, Some("abcdef.com"))));
    }

    #[test]
    fn test_dns_underscores() {
        assert!(is_suspicious(&dns(53, 40000, Some("_a_b_c_d_e_f.example.com"))));
        assert!(!is_suspicious(&dns(53, 40000, Some("_ldap._tcp.dc._msdcs.corp.local"))));
    }

    #[test]
    fn test_dns_label_shapes() {
        let long_label = format!("{}.example.com", "A-".repeat(32));
        assert_eq!(
            inspect(&dns(40000, 53, Some(&long_label))),
            Some(AnomalyReason::DnsLabelTooLong { length: 64 })
        );

        let hex = "0123456789ABCDEF0123456789abcdef.evil.net";
        assert!(matches!(
            inspect(&dns(40000, 53, Some(hex))),
            Some(AnomalyReason::DnsHexLabel { .. })
        ));

        assert!(matches!(
            inspect(&dns(40000, 53, Some("x7k2p9q4m1z8.example.com"))),
            Some(AnomalyReason::DnsBeaconLabel { .. })
        ));
        assert!(!is_suspicious(&dns(40000, 53, Some("mail.google.com"))));
        assert!(!is_suspicious(&dns(40000, 53, Some("Xk7k2p9q4m1z8.example.com"))));
    }

    #[test]
    fn test_dns_requires_port_and_name() {
        let long = "a".repeat(300);
        assert!(!is_suspicious(&dns(40000, 5353, Some(&long))));
        assert!(!is_suspicious(&dns(40000, 53, None)));
    }

    #[test]
    fn test_icmp_rules() {
        assert_eq!(
            inspect(&icmp(8, 0, 2000)),
            Some(AnomalyReason::IcmpLargeEcho { payload: 2000 })
        );
        assert!(!is_suspicious(&icmp(8, 0, 10)));
        assert!(!is_suspicious(&icmp(8, 0, 0)));
        assert!(is_suspicious(&icmp(4, 0, 0)));
        assert!(is_suspicious(&icmp(4, 0, 10)));
        assert_eq!(inspect(&icmp(3, 1, 28)), Some(AnomalyReason::IcmpHostUnreachable));
        assert!(!is_suspicious(&icmp(3, 3, 28)));
        assert!(!is_suspicious(&icmp(0, 0, 2000)));
    }

    #[test]
    fn test_protocol_dispatch_is_case_insensitive() {
        let mut r = tcp(1337, 80, &[], 1000);
        r.protocol = " tcp ".to_string();
        assert!(is_suspicious(&r));
    }

    #[test]
    fn test_other_protocols_never_flagged() {
        assert!(!is_suspicious(&record("ARP", None)));
        assert!(!is_suspicious(&record("IGMP", None)));
        // Label says TCP but nothing could be decoded
        assert!(!is_suspicious(&record("TCP", None)));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(AnomalyReason::OddTcpPort { port: 1337 }.to_string(), "odd TCP port 1337");
        assert_eq!(AnomalyReason::IcmpSourceQuench.to_string(), "source quench");
    }
}
