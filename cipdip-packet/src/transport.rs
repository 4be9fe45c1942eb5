//! TCP and UDP header access
//!
//! Only the fields replay touches: ports, header length and checksum.

use crate::checksum::transport_checksum;
use cipdip_core::ip_protocols;
use serde::Serialize;
use std::net::Ipv4Addr;

/// UDP header size
pub const UDP_HEADER_SIZE: usize = 8;

/// Minimum TCP header size (no options)
pub const TCP_MIN_HEADER_SIZE: usize = 20;

/// Transport protocols with addressing the rewriter can update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl TransportKind {
    /// Map an IPv4 protocol number
    pub fn from_protocol(protocol: u8) -> Option<Self> {
        match protocol {
            ip_protocols::TCP => Some(TransportKind::Tcp),
            ip_protocols::UDP => Some(TransportKind::Udp),
            _ => None,
        }
    }

    pub fn protocol(self) -> u8 {
        match self {
            TransportKind::Tcp => ip_protocols::TCP,
            TransportKind::Udp => ip_protocols::UDP,
        }
    }

    /// Offset of the checksum field inside the transport header
    pub fn checksum_offset(self) -> usize {
        match self {
            TransportKind::Tcp => 16,
            TransportKind::Udp => 6,
        }
    }
}

/// Decoded transport header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportView {
    pub kind: TransportKind,
    pub header_len: usize,
    pub source_port: u16,
    pub destination_port: u16,
    pub checksum: u16,
}

/// Parse a TCP or UDP header starting at `data[0]`
pub fn parse(kind: TransportKind, data: &[u8]) -> Option<TransportView> {
    let header_len = match kind {
        TransportKind::Udp => UDP_HEADER_SIZE,
        TransportKind::Tcp => {
            if data.len() < TCP_MIN_HEADER_SIZE {
                return None;
            }
            usize::from(data[12] >> 4) * 4
        }
    };

    if header_len < UDP_HEADER_SIZE
        || (kind == TransportKind::Tcp && header_len < TCP_MIN_HEADER_SIZE)
        || data.len() < header_len
    {
        return None;
    }

    let offset = kind.checksum_offset();
    Some(TransportView {
        kind,
        header_len,
        source_port: u16::from_be_bytes([data[0], data[1]]),
        destination_port: u16::from_be_bytes([data[2], data[3]]),
        checksum: u16::from_be_bytes([data[offset], data[offset + 1]]),
    })
}

/// Overwrite the source port in place
pub fn set_source_port(header: &mut [u8], port: u16) {
    header[0..2].copy_from_slice(&port.to_be_bytes());
}

/// Overwrite the destination port in place
pub fn set_destination_port(header: &mut [u8], port: u16) {
    header[2..4].copy_from_slice(&port.to_be_bytes());
}

/// Recompute the checksum of `segment` (transport header + payload)
///
/// A UDP datagram sent without a checksum (field zero) keeps it zero.
/// A computed UDP checksum of zero is transmitted as 0xFFFF.
pub fn recompute_checksum(
    kind: TransportKind,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    segment: &mut [u8],
) -> u16 {
    let offset = kind.checksum_offset();
    let existing = u16::from_be_bytes([segment[offset], segment[offset + 1]]);
    if kind == TransportKind::Udp && existing == 0 {
        return 0;
    }

    segment[offset] = 0;
    segment[offset + 1] = 0;
    let mut checksum = transport_checksum(src_ip, dst_ip, kind.protocol(), segment);
    if kind == TransportKind::Udp && checksum == 0 {
        checksum = 0xFFFF;
    }
    segment[offset..offset + 2].copy_from_slice(&checksum.to_be_bytes());
    checksum
}

/// Check the stored checksum of `segment` against its pseudo-header
pub fn checksum_valid(kind: TransportKind, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> bool {
    let offset = kind.checksum_offset();
    if kind == TransportKind::Udp && segment[offset] == 0 && segment[offset + 1] == 0 {
        return true;
    }
    transport_checksum(src_ip, dst_ip, kind.protocol(), segment) == 0
}
