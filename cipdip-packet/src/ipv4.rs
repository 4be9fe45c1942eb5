//! IPv4 header access and construction

use crate::checksum::internet_checksum;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

const CHECKSUM_OFFSET: usize = 10;
const SOURCE_OFFSET: usize = 12;
const DESTINATION_OFFSET: usize = 16;

/// Decoded IPv4 header fields relevant to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4View {
    /// Header length in bytes (IHL * 4)
    pub header_len: usize,
    /// Total length field (header + data)
    pub total_length: usize,
    pub protocol: u8,
    pub checksum: u16,
    /// Fragment offset in 8-byte units
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4View {
    /// Any fragment of a fragmented datagram
    pub fn is_fragment(&self) -> bool {
        self.more_fragments || self.fragment_offset != 0
    }

    /// Fragment that carries the transport header
    pub fn carries_transport_header(&self) -> bool {
        self.fragment_offset == 0
    }
}

/// Parse an IPv4 header starting at `data[0]`
///
/// Returns `None` unless the version is 4, IHL >= 5, the full header is
/// present and the total length covers the header.
pub fn parse(data: &[u8]) -> Option<Ipv4View> {
    if data.len() < MIN_HEADER_SIZE {
        return None;
    }

    let version = data[0] >> 4;
    let header_len = usize::from(data[0] & 0x0F) * 4;
    if version != 4 || header_len < MIN_HEADER_SIZE || data.len() < header_len {
        return None;
    }

    let total_length = usize::from(u16::from_be_bytes([data[2], data[3]]));
    if total_length < header_len {
        return None;
    }

    let flags_and_offset = u16::from_be_bytes([data[6], data[7]]);

    Some(Ipv4View {
        header_len,
        total_length,
        protocol: data[9],
        checksum: u16::from_be_bytes([data[CHECKSUM_OFFSET], data[CHECKSUM_OFFSET + 1]]),
        fragment_offset: flags_and_offset & 0x1FFF,
        more_fragments: flags_and_offset & 0x2000 != 0,
        source: read_addr(data, SOURCE_OFFSET),
        destination: read_addr(data, DESTINATION_OFFSET),
    })
}

fn read_addr(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

/// Overwrite the source address (checksum is not touched)
pub fn set_source(header: &mut [u8], addr: Ipv4Addr) {
    header[SOURCE_OFFSET..SOURCE_OFFSET + 4].copy_from_slice(&addr.octets());
}

/// Overwrite the destination address (checksum is not touched)
pub fn set_destination(header: &mut [u8], addr: Ipv4Addr) {
    header[DESTINATION_OFFSET..DESTINATION_OFFSET + 4].copy_from_slice(&addr.octets());
}

/// Recompute the header checksum over `header` (exactly IHL * 4 bytes)
pub fn recompute_checksum(header: &mut [u8]) -> u16 {
    header[CHECKSUM_OFFSET] = 0;
    header[CHECKSUM_OFFSET + 1] = 0;
    let checksum = internet_checksum(header);
    header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    checksum
}

/// Encode a 20-byte header (DF set, no options) with a valid checksum
pub fn encode_header(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    payload_len: usize,
    ttl: u8,
    identification: u16,
) -> Vec<u8> {
    let mut buffer = BytesMut::with_capacity(MIN_HEADER_SIZE);

    buffer.put_u8(0x45);
    buffer.put_u8(0);
    buffer.put_u16((MIN_HEADER_SIZE + payload_len) as u16);
    buffer.put_u16(identification);
    buffer.put_u16(0x4000);
    buffer.put_u8(ttl);
    buffer.put_u8(protocol);
    buffer.put_u16(0);
    buffer.put_slice(&source.octets());
    buffer.put_slice(&destination.octets());

    let mut header = buffer.to_vec();
    recompute_checksum(&mut header);
    header
}
