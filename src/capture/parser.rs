use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, log_enabled, trace, warn, Level};
use pnet::packet::{
    arp::ArpPacket,
    ethernet::{EtherType, EtherTypes, EthernetPacket},
    icmp::IcmpPacket,
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    Packet as PnetPacket,
};
use pnet::util::MacAddr;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::panic::{self, AssertUnwindSafe};

use crate::capture::local::normalize_address;
use crate::capture::source::{Frame, LinkType};
use crate::models::record::{
    IcmpDetails, PacketRecord, ProtocolDetails, TcpDetails, TcpFlag, TcpFlags, UdpDetails,
};

/// UDP ports whose payload is tried as a DNS message
const DNS_PORTS: [u16; 3] = [53, 5353, 5355];

/// Compression pointers followed before a name is rejected
const MAX_NAME_JUMPS: usize = 16;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const ICMP_COMMON_HEADER: usize = 4;
const VLAN_TAG: usize = 4;
const SLL_HEADER: usize = 16;
const SLL2_HEADER: usize = 20;

/// Link layer addresses of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddrs {
    pub source: MacAddr,
    pub destination: MacAddr,
}

/// Decoder output: the record plus what the classifier needs from layer 2
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub record: PacketRecord,
    pub link: Option<LinkAddrs>,
}

/// Fields collected while walking the layers of one frame
#[derive(Debug)]
struct Draft {
    source: String,
    destination: String,
    protocol: String,
    summary: String,
    details: Option<ProtocolDetails>,
    link: Option<LinkAddrs>,
    is_arp: bool,
    layers: Vec<String>,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            source: "?".to_string(),
            destination: "?".to_string(),
            protocol: "UNKNOWN".to_string(),
            summary: String::new(),
            details: None,
            link: None,
            is_arp: false,
            layers: Vec::new(),
        }
    }
}

/// Decode a captured frame into a record.
///
/// Never fails: anything that cannot be understood ends up as a generic summary,
/// and `length` is always the size of the input.
pub fn decode(frame: &Frame) -> DecodedFrame {
    let data = frame.data.as_slice();

    if log_enabled!(Level::Trace) {
        trace!("Decoding {} byte frame ({:?})", data.len(), frame.link_type);
    }

    let draft = match panic::catch_unwind(AssertUnwindSafe(|| decode_layers(data, frame.link_type))) {
        Ok(draft) => draft,
        Err(_) => {
            warn!("Header decoder panicked on a {} byte frame, keeping raw bytes only", data.len());
            Draft {
                summary: "Malformed frame".to_string(),
                ..Draft::default()
            }
        }
    };

    let summary = if draft.summary.is_empty() {
        "Unrecognized frame".to_string()
    } else {
        draft.summary
    };

    let mut dump = draft.layers.join("\n");
    if !dump.is_empty() {
        dump.push('\n');
    }
    dump.push_str(&hex_dump(data));

    DecodedFrame {
        record: PacketRecord {
            timestamp: frame.timestamp.trunc_subsecs(3),
            source: draft.source,
            destination: draft.destination,
            protocol: draft.protocol,
            length: data.len(),
            summary,
            dump,
            is_self_originated: false,
            is_broadcast_or_multicast: false,
            details: draft.details,
        },
        link: draft.link,
    }
}

/// Decode a raw byte slice stamped with `timestamp`
pub fn decode_bytes(data: &[u8], link_type: LinkType, timestamp: DateTime<Utc>) -> DecodedFrame {
    decode(&Frame {
        data: data.to_vec(),
        timestamp,
        link_type,
    })
}

fn decode_layers(data: &[u8], link_type: LinkType) -> Draft {
    let mut draft = Draft::default();

    match link_type {
        LinkType::Ethernet => decode_ethernet(data, &mut draft),
        LinkType::RawIp => decode_ip_by_version(data, &mut draft),
        LinkType::Loopback => {
            // 4 byte address family header, byte order depends on the capturing host
            if data.len() > 4 {
                draft.layers.push("[Loopback]".to_string());
                decode_ip_by_version(&data[4..], &mut draft);
            } else {
                draft.summary = "Truncated loopback frame".to_string();
            }
        }
        LinkType::LinuxSll => decode_cooked(data, SLL_HEADER, 14, &mut draft),
        LinkType::LinuxSll2 => decode_cooked(data, SLL2_HEADER, 0, &mut draft),
    }

    draft
}

fn decode_ethernet(data: &[u8], draft: &mut Draft) {
    let eth = match EthernetPacket::new(data) {
        Some(packet) => packet,
        None => {
            draft.summary = "Truncated Ethernet frame".to_string();
            return;
        }
    };

    let link = LinkAddrs {
        source: eth.get_source(),
        destination: eth.get_destination(),
    };
    draft.link = Some(link);

    let mut ethertype = eth.get_ethertype();
    let mut payload = eth.payload();
    draft.layers.push(format!(
        "[Ethernet] {} → {} type={}",
        link.source, link.destination, ethertype
    ));

    // Single 802.1Q tag
    if ethertype == EtherTypes::Vlan && payload.len() >= VLAN_TAG {
        let vid = u16::from_be_bytes([payload[0], payload[1]]) & 0x0fff;
        ethertype = EtherType::new(u16::from_be_bytes([payload[2], payload[3]]));
        payload = &payload[VLAN_TAG..];
        draft.layers.push(format!("[VLAN] id={} type={}", vid, ethertype));
    }

    decode_ethertype(ethertype, payload, draft);
}

/// Linux cooked capture: no usable link addresses, protocol field is an ethertype
fn decode_cooked(data: &[u8], header_len: usize, protocol_at: usize, draft: &mut Draft) {
    if data.len() < header_len {
        draft.summary = "Truncated cooked frame".to_string();
        return;
    }

    let ethertype = EtherType::new(u16::from_be_bytes([data[protocol_at], data[protocol_at + 1]]));
    draft.layers.push(format!("[Cooked] type={}", ethertype));
    decode_ethertype(ethertype, &data[header_len..], draft);
}

fn decode_ethertype(ethertype: EtherType, payload: &[u8], draft: &mut Draft) {
    match ethertype {
        EtherTypes::Arp => decode_arp(payload, draft),
        EtherTypes::Ipv4 => decode_ipv4(payload, draft),
        EtherTypes::Ipv6 => decode_ipv6(payload, draft),
        other => {
            draft.protocol = format!("0x{:04x}", other.0);
            draft.summary = format!("Ethernet frame (type {})", other);
        }
    }
}

fn decode_ip_by_version(data: &[u8], draft: &mut Draft) {
    match data.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(data, draft),
        Some(6) => decode_ipv6(data, draft),
        _ => draft.summary = "Unrecognized network layer".to_string(),
    }
}

fn decode_arp(data: &[u8], draft: &mut Draft) {
    draft.is_arp = true;
    draft.protocol = "ARP".to_string();
    draft.summary = "ARP Packet".to_string();

    if let Some(arp) = ArpPacket::new(data) {
        let sender = arp.get_sender_proto_addr();
        let target = arp.get_target_proto_addr();
        draft.source = sender.to_string();
        draft.destination = target.to_string();
        draft.layers.push(format!(
            "[ARP] op={:?} sender={} ({}) target={} ({})",
            arp.get_operation(),
            sender,
            arp.get_sender_hw_addr(),
            target,
            arp.get_target_hw_addr()
        ));
    }
}

fn decode_ipv4(data: &[u8], draft: &mut Draft) {
    let ip = match Ipv4Packet::new(data) {
        Some(packet) => packet,
        None => {
            set_generic(draft, "IPv4", "Truncated IPv4 packet");
            return;
        }
    };

    let header_len = ip.get_header_length() as usize * 4;
    if header_len < IPV4_MIN_HEADER || header_len > data.len() {
        set_generic(draft, "IPv4", "Malformed IPv4 header");
        return;
    }

    // Offloaded segments are often captured with a zero total length
    let total = ip.get_total_length() as usize;
    let end = if total >= header_len { total.min(data.len()) } else { data.len() };
    let payload = &data[header_len..end];

    let protocol = ip.get_next_level_protocol().0;
    set_addresses(draft, IpAddr::V4(ip.get_source()), IpAddr::V4(ip.get_destination()));
    draft.layers.push(format!(
        "[IPv4] {} → {} ttl={} proto={}",
        draft.source,
        draft.destination,
        ip.get_ttl(),
        ip_protocol_name(protocol)
    ));

    // Only the first fragment carries a transport header
    let fragment_offset = ip.get_fragment_offset();
    if fragment_offset != 0 {
        draft.layers.push(format!("[IPv4] fragment offset={}", fragment_offset));
        label_transport(protocol, draft);
        return;
    }

    decode_transport(protocol, payload, draft);
}

fn decode_ipv6(data: &[u8], draft: &mut Draft) {
    let ip = match Ipv6Packet::new(data) {
        Some(packet) => packet,
        None => {
            set_generic(draft, "IPv6", "Truncated IPv6 packet");
            return;
        }
    };

    let declared = ip.get_payload_length() as usize;
    let end = if declared == 0 {
        data.len()
    } else {
        (IPV6_HEADER + declared).min(data.len())
    };
    let payload = &data[IPV6_HEADER..end];

    let protocol = ip.get_next_header().0;
    set_addresses(draft, IpAddr::V6(ip.get_source()), IpAddr::V6(ip.get_destination()));
    draft.layers.push(format!(
        "[IPv6] {} → {} hop_limit={} next={}",
        draft.source,
        draft.destination,
        ip.get_hop_limit(),
        ip_protocol_name(protocol)
    ));

    decode_transport(protocol, payload, draft);
}

fn set_addresses(draft: &mut Draft, source: IpAddr, destination: IpAddr) {
    draft.source = normalize_address(&source.to_string());
    draft.destination = normalize_address(&destination.to_string());
}

/// Label a frame whose network layer could not be walked
fn set_generic(draft: &mut Draft, protocol: &str, summary: &str) {
    if !draft.is_arp {
        draft.protocol = protocol.to_string();
        draft.summary = summary.to_string();
    }
}

/// Protocol label and `"<NAME> packet"` summary without touching the payload
fn label_transport(protocol: u8, draft: &mut Draft) {
    let name = ip_protocol_name(protocol);
    set_generic(draft, &name, &format!("{} packet", name));
}

fn decode_transport(protocol: u8, data: &[u8], draft: &mut Draft) {
    let name = ip_protocol_name(protocol);

    // An ARP label is never overwritten by a later layer
    if draft.is_arp {
        return;
    }
    draft.protocol = name.clone();

    let decoded = match protocol {
        6 => decode_tcp(data, draft),
        17 => decode_udp(data, draft),
        1 => decode_icmp(data, draft),
        _ => false,
    };

    if !decoded {
        draft.summary = format!("{} packet", name);
    }
}

fn decode_tcp(data: &[u8], draft: &mut Draft) -> bool {
    let tcp = match TcpPacket::new(data) {
        Some(packet) => packet,
        None => return false,
    };

    let source_port = tcp.get_source();
    let destination_port = tcp.get_destination();
    let window = tcp.get_window();

    let raw_flags = tcp.get_flags() as u16;
    let mut flags = TcpFlags::empty();
    for (mask, flag) in [
        (0x02, TcpFlag::Syn),
        (0x10, TcpFlag::Ack),
        (0x01, TcpFlag::Fin),
        (0x04, TcpFlag::Rst),
        (0x20, TcpFlag::Urg),
        (0x08, TcpFlag::Psh),
    ] {
        if raw_flags & mask != 0 {
            flags.insert(flag);
        }
    }

    let offset = tcp.get_data_offset() as usize * 4;
    let payload = if offset >= TCP_MIN_HEADER && offset <= data.len() {
        &data[offset..]
    } else {
        &[][..]
    };

    draft.layers.push(format!(
        "[TCP] {} → {} seq={} ack={} flags=[{}] win={} len={}",
        source_port,
        destination_port,
        tcp.get_sequence(),
        tcp.get_acknowledgement(),
        flags,
        window,
        payload.len()
    ));
    draft.summary = format!("TCP {} → {}", source_port, destination_port);
    draft.details = Some(ProtocolDetails::Tcp(TcpDetails {
        source_port,
        destination_port,
        window,
        flags,
        payload: non_empty(payload),
    }));
    true
}

fn decode_udp(data: &[u8], draft: &mut Draft) -> bool {
    let udp = match UdpPacket::new(data) {
        Some(packet) => packet,
        None => return false,
    };

    let source_port = udp.get_source();
    let destination_port = udp.get_destination();

    let declared = udp.get_length() as usize;
    let end = if declared >= UDP_HEADER { declared.min(data.len()) } else { data.len() };
    let payload = &data[UDP_HEADER..end];

    let dns_query = if DNS_PORTS.contains(&source_port) || DNS_PORTS.contains(&destination_port) {
        parse_dns_query_name(payload)
    } else {
        None
    };

    draft.layers.push(format!(
        "[UDP] {} → {} len={}",
        source_port,
        destination_port,
        payload.len()
    ));
    if let Some(name) = &dns_query {
        draft.layers.push(format!("[DNS] query={}", name));
    }

    draft.summary = format!("UDP {} → {}", source_port, destination_port);
    draft.details = Some(ProtocolDetails::Udp(UdpDetails {
        source_port,
        destination_port,
        dns_query,
        payload: non_empty(payload),
    }));
    true
}

fn decode_icmp(data: &[u8], draft: &mut Draft) -> bool {
    let icmp = match IcmpPacket::new(data) {
        Some(packet) => packet,
        None => return false,
    };

    let icmp_type = icmp.get_icmp_type().0;
    let icmp_code = icmp.get_icmp_code().0;
    let payload = &data[ICMP_COMMON_HEADER..];

    draft.layers.push(format!(
        "[ICMP] type={} code={} len={}",
        icmp_type,
        icmp_code,
        payload.len()
    ));
    draft.summary = format!("ICMP type={} code={}", icmp_type, icmp_code);
    draft.details = Some(ProtocolDetails::Icmp(IcmpDetails {
        icmp_type,
        icmp_code,
        payload: non_empty(payload),
    }));
    true
}

fn non_empty(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    }
}

/// Name of the first question in a DNS message, if there is one
pub fn parse_dns_query_name(message: &[u8]) -> Option<String> {
    if message.len() < 12 {
        return None;
    }
    let question_count = u16::from_be_bytes([message[4], message[5]]);
    if question_count == 0 {
        return None;
    }

    let mut labels: Vec<String> = Vec::new();
    let mut pos = 12;
    let mut jumps = 0;

    loop {
        if pos >= message.len() {
            return None;
        }
        let len = message[pos] as usize;

        if len == 0 {
            break;
        }

        if len & 0xc0 == 0xc0 {
            // Compression pointer
            if pos + 1 >= message.len() {
                return None;
            }
            jumps += 1;
            if jumps > MAX_NAME_JUMPS {
                debug!("DNS name compression loop, giving up");
                return None;
            }
            pos = ((len & 0x3f) << 8) | message[pos + 1] as usize;
            continue;
        }

        // Extended label types are not supported
        if len & 0xc0 != 0 || pos + 1 + len > message.len() {
            return None;
        }
        labels.push(String::from_utf8_lossy(&message[pos + 1..pos + 1 + len]).into_owned());
        pos += 1 + len;
    }

    Some(labels.join("."))
}

/// Upper-case label for an IP protocol number
pub fn ip_protocol_name(protocol: u8) -> String {
    match protocol {
        0 => "HOPOPT".to_string(),
        1 => "ICMP".to_string(),
        2 => "IGMP".to_string(),
        4 => "IPIP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        41 => "IPV6".to_string(),
        43 => "IPV6-ROUTE".to_string(),
        44 => "IPV6-FRAG".to_string(),
        47 => "GRE".to_string(),
        50 => "ESP".to_string(),
        51 => "AH".to_string(),
        58 => "ICMPV6".to_string(),
        59 => "IPV6-NONXT".to_string(),
        60 => "IPV6-OPTS".to_string(),
        89 => "OSPF".to_string(),
        103 => "PIM".to_string(),
        112 => "VRRP".to_string(),
        132 => "SCTP".to_string(),
        other => format!("IP-{}", other),
    }
}

/// Offset, hex and printable columns, 16 bytes per line
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);
    let _ = write!(out, "[Data] {} bytes", data.len());
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "\n{:04x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' }));
    }
    out
}
