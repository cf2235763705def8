use chrono::{DateTime, Local, Utc};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::fmt;

/// A single TCP control flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpFlag {
    Syn,
    Ack,
    Fin,
    Rst,
    Urg,
    Psh,
}

impl TcpFlag {
    /// All flags in the order they are reported
    pub const ALL: [TcpFlag; 6] = [
        TcpFlag::Syn,
        TcpFlag::Ack,
        TcpFlag::Fin,
        TcpFlag::Rst,
        TcpFlag::Urg,
        TcpFlag::Psh,
    ];

    fn bit(self) -> u8 {
        match self {
            TcpFlag::Syn => 0x01,
            TcpFlag::Ack => 0x02,
            TcpFlag::Fin => 0x04,
            TcpFlag::Rst => 0x08,
            TcpFlag::Urg => 0x10,
            TcpFlag::Psh => 0x20,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TcpFlag::Syn => "SYN",
            TcpFlag::Ack => "ACK",
            TcpFlag::Fin => "FIN",
            TcpFlag::Rst => "RST",
            TcpFlag::Urg => "URG",
            TcpFlag::Psh => "PSH",
        }
    }
}

/// Set of TCP flags seen on a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_flags(flags: &[TcpFlag]) -> Self {
        let mut set = Self::empty();
        for flag in flags {
            set.insert(*flag);
        }
        set
    }

    pub fn insert(&mut self, flag: TcpFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(&self, flag: TcpFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TcpFlag> + '_ {
        TcpFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(TcpFlag::name).collect();
        write!(f, "{}", names.join(","))
    }
}

impl Serialize for TcpFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for flag in self.iter() {
            seq.serialize_element(flag.name())?;
        }
        seq.end()
    }
}

/// TCP fields of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcpDetails {
    pub source_port: u16,
    pub destination_port: u16,
    pub window: u16,
    pub flags: TcpFlags,
    #[serde(skip_serializing)]
    pub payload: Option<Vec<u8>>,
}

/// UDP fields of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UdpDetails {
    pub source_port: u16,
    pub destination_port: u16,
    /// First question name when the datagram is a DNS message
    pub dns_query: Option<String>,
    #[serde(skip_serializing)]
    pub payload: Option<Vec<u8>>,
}

/// ICMPv4 fields of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcmpDetails {
    pub icmp_type: u8,
    pub icmp_code: u8,
    #[serde(skip_serializing)]
    pub payload: Option<Vec<u8>>,
}

/// Protocol specific part of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ProtocolDetails {
    #[serde(rename = "tcp")]
    Tcp(TcpDetails),

    #[serde(rename = "udp")]
    Udp(UdpDetails),

    #[serde(rename = "icmp")]
    Icmp(IcmpDetails),
}

impl ProtocolDetails {
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            ProtocolDetails::Tcp(tcp) => tcp.payload.as_deref(),
            ProtocolDetails::Udp(udp) => udp.payload.as_deref(),
            ProtocolDetails::Icmp(icmp) => icmp.payload.as_deref(),
        }
    }
}

/// How a record relates to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    Mine,
    BroadcastOrMulticast,
    Foreign,
}

/// Canonical decoded frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketRecord {
    /// Capture time, millisecond precision
    pub timestamp: DateTime<Utc>,

    pub source: String,

    pub destination: String,

    /// Protocol label (e.g. TCP, UDP, ICMP, ARP)
    pub protocol: String,

    /// Length of the whole frame in bytes
    pub length: usize,

    /// One line description
    pub summary: String,

    /// Layered header listing and hex dump
    pub dump: String,

    pub is_self_originated: bool,

    pub is_broadcast_or_multicast: bool,

    pub details: Option<ProtocolDetails>,
}

impl PacketRecord {
    pub fn tcp(&self) -> Option<&TcpDetails> {
        match &self.details {
            Some(ProtocolDetails::Tcp(tcp)) => Some(tcp),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<&UdpDetails> {
        match &self.details {
            Some(ProtocolDetails::Udp(udp)) => Some(udp),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpDetails> {
        match &self.details {
            Some(ProtocolDetails::Icmp(icmp)) => Some(icmp),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.details.as_ref().and_then(ProtocolDetails::payload)
    }

    /// Ownership wins over broadcast when both flags are set
    pub fn traffic_class(&self) -> TrafficClass {
        if self.is_self_originated {
            TrafficClass::Mine
        } else if self.is_broadcast_or_multicast {
            TrafficClass::BroadcastOrMulticast
        } else {
            TrafficClass::Foreign
        }
    }

    /// Local wall clock label, e.g. 13:42:11.653
    pub fn time_label(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S%.3f")
            .to_string()
    }
}
