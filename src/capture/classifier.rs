use pnet::util::MacAddr;

use crate::capture::local::LocalAddresses;
use crate::capture::parser::LinkAddrs;
use crate::models::record::PacketRecord;

/// Destination prefixes of IPv4 multicast, IPv6 multicast and bridge protocols
const GROUP_PREFIXES: [&[u8]; 3] = [&[0x01, 0x00, 0x5e], &[0x33, 0x33], &[0x01, 0x80, 0xc2]];

pub fn is_broadcast_or_multicast(destination: &MacAddr) -> bool {
    if *destination == MacAddr::broadcast() {
        return true;
    }
    let d = destination;
    let octets = [d.0, d.1, d.2, d.3, d.4, d.5];
    GROUP_PREFIXES.iter().any(|prefix| octets.starts_with(prefix))
}

/// Tag a freshly decoded record with ownership and broadcast flags.
///
/// Hardware addresses decide ownership first; network addresses are only
/// consulted when there is no link header or no MAC matched.
pub fn classify(record: &mut PacketRecord, link: Option<&LinkAddrs>, local: &LocalAddresses) {
    let mut mine = false;

    if let Some(link) = link {
        record.is_broadcast_or_multicast = is_broadcast_or_multicast(&link.destination);
        mine = local.contains_mac(&link.source) || local.contains_mac(&link.destination);
    }

    if !mine {
        mine = local.contains_ip(&record.source) || local.contains_ip(&record.destination);
    }

    record.is_self_originated = mine;
}
