//! Ethernet II framing
//!
//! Offset-based accessors over captured frames plus a small frame encoder.
//! Up to two 802.1Q / 802.1ad tags are skipped when locating the payload.

use bytes::{BufMut, BytesMut};
use cipdip_core::{ethertypes, MacAddr};
use std::fmt;

/// Ethernet header size (dst + src + type)
pub const HEADER_SIZE: usize = 14;

/// Size of one VLAN tag (TPID + TCI)
pub const VLAN_TAG_SIZE: usize = 4;

/// Minimum frame size without FCS
pub const MIN_FRAME_SIZE: usize = 60;

const MAX_VLAN_TAGS: usize = 2;

/// EtherType values the replay path distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    IPv4,
    ARP,
    VLAN,
    QinQ,
    IPv6,
    Custom(u16),
}

impl EtherType {
    pub fn to_u16(self) -> u16 {
        match self {
            EtherType::IPv4 => ethertypes::IPV4,
            EtherType::ARP => ethertypes::ARP,
            EtherType::VLAN => ethertypes::DOT1Q,
            EtherType::QinQ => ethertypes::QINQ,
            EtherType::IPv6 => ethertypes::IPV6,
            EtherType::Custom(val) => val,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            ethertypes::IPV4 => EtherType::IPv4,
            ethertypes::ARP => EtherType::ARP,
            ethertypes::DOT1Q => EtherType::VLAN,
            ethertypes::QINQ => EtherType::QinQ,
            ethertypes::IPV6 => EtherType::IPv6,
            val => EtherType::Custom(val),
        }
    }

    fn is_vlan_tag(self) -> bool {
        matches!(self, EtherType::VLAN | EtherType::QinQ)
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::IPv4 => write!(f, "IPv4"),
            EtherType::ARP => write!(f, "ARP"),
            EtherType::VLAN => write!(f, "802.1Q"),
            EtherType::QinQ => write!(f, "802.1ad"),
            EtherType::IPv6 => write!(f, "IPv6"),
            EtherType::Custom(val) => write!(f, "0x{:04X}", val),
        }
    }
}

/// Parsed Ethernet header location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetView {
    /// EtherType of the payload (after any VLAN tags)
    pub ethertype: EtherType,
    /// Number of VLAN tags skipped
    pub vlan_tags: usize,
    /// Offset of the first payload byte
    pub payload_offset: usize,
}

/// Locate the Ethernet payload, skipping VLAN tags
///
/// Returns `None` if the frame is too short or uses an 802.3 length field.
pub fn parse(frame: &[u8]) -> Option<EthernetView> {
    if frame.len() < HEADER_SIZE {
        return None;
    }

    let mut type_offset = 12;
    let mut vlan_tags = 0;
    loop {
        let raw = u16::from_be_bytes([frame[type_offset], frame[type_offset + 1]]);
        if raw <= 1500 {
            // 802.3 length field, not an EtherType
            return None;
        }

        let ethertype = EtherType::from_u16(raw);
        if ethertype.is_vlan_tag() && vlan_tags < MAX_VLAN_TAGS {
            type_offset += VLAN_TAG_SIZE;
            vlan_tags += 1;
            if frame.len() < type_offset + 2 {
                return None;
            }
            continue;
        }

        return Some(EthernetView {
            ethertype,
            vlan_tags,
            payload_offset: type_offset + 2,
        });
    }
}

/// Destination MAC of a frame
pub fn destination(frame: &[u8]) -> Option<MacAddr> {
    frame.get(0..6).and_then(MacAddr::from_slice)
}

/// Source MAC of a frame
pub fn source(frame: &[u8]) -> Option<MacAddr> {
    frame.get(6..12).and_then(MacAddr::from_slice)
}

/// Overwrite the destination MAC in place
pub fn set_destination(frame: &mut [u8], mac: MacAddr) {
    frame[0..6].copy_from_slice(mac.as_bytes());
}

/// Overwrite the source MAC in place
pub fn set_source(frame: &mut [u8], mac: MacAddr) {
    frame[6..12].copy_from_slice(mac.as_bytes());
}

/// Encode an untagged Ethernet II frame, padding to the minimum size
pub fn encode(destination: MacAddr, source: MacAddr, ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
    let mut buffer = BytesMut::with_capacity((HEADER_SIZE + payload.len()).max(MIN_FRAME_SIZE));

    buffer.put_slice(destination.as_bytes());
    buffer.put_slice(source.as_bytes());
    buffer.put_u16(ethertype.to_u16());
    buffer.put_slice(payload);

    let mut result = buffer.to_vec();
    if result.len() < MIN_FRAME_SIZE {
        result.resize(MIN_FRAME_SIZE, 0);
    }
    result
}
