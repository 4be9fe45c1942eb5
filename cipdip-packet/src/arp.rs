//! ARP packet structure, request frames and reply matching

use crate::ethernet::{self, EtherType};
use bytes::{BufMut, BytesMut};
use cipdip_core::{Error, MacAddr, Result};
use std::net::Ipv4Addr;

/// ARP payload size for Ethernet/IPv4
pub const PACKET_SIZE: usize = 28;

/// Hardware type Ethernet
pub const HTYPE_ETHERNET: u16 = 1;

/// Protocol type IPv4
pub const PTYPE_IPV4: u16 = 0x0800;

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOpcode {
    Request = 1,
    Reply = 2,
}

impl ArpOpcode {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// Ethernet/IPv4 ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOpcode,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Who-has `target_ip`, tell `sender_ip`
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOpcode::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::zero(),
            target_ip,
        }
    }

    /// `sender_ip` is-at `sender_mac`
    pub fn reply(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_mac: MacAddr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOpcode::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Parse an ARP payload (after the Ethernet header)
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_SIZE {
            return Err(Error::PacketParsing("ARP packet too short".into()));
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || data[4] != 6 || data[5] != 4 {
            return Err(Error::PacketParsing(format!(
                "unsupported ARP hardware/protocol {}/0x{:04x}",
                htype, ptype
            )));
        }

        let operation = ArpOpcode::from_u16(u16::from_be_bytes([data[6], data[7]]))
            .ok_or_else(|| Error::PacketParsing("Invalid ARP opcode".into()))?;

        Ok(Self {
            operation,
            sender_mac: MacAddr::from_slice(&data[8..14]).unwrap_or_default(),
            sender_ip: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            target_mac: MacAddr::from_slice(&data[18..24]).unwrap_or_default(),
            target_ip: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);

        buf.put_u16(HTYPE_ETHERNET);
        buf.put_u16(PTYPE_IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(self.operation as u16);
        buf.put_slice(self.sender_mac.as_bytes());
        buf.put_slice(&self.sender_ip.octets());
        buf.put_slice(self.target_mac.as_bytes());
        buf.put_slice(&self.target_ip.octets());

        buf.to_vec()
    }

    pub fn is_reply(&self) -> bool {
        self.operation == ArpOpcode::Reply
    }

    /// A reply announcing `ip`
    pub fn is_reply_from(&self, ip: Ipv4Addr) -> bool {
        self.is_reply() && self.sender_ip == ip
    }
}

/// Broadcast Ethernet frame carrying an ARP request for `target_ip`
pub fn request_frame(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let packet = ArpPacket::request(sender_mac, sender_ip, target_ip);
    ethernet::encode(MacAddr::broadcast(), sender_mac, EtherType::ARP, &packet.serialize())
}

/// Decode an ARP packet from a full Ethernet frame, `None` if it is not ARP
pub fn parse_frame(frame: &[u8]) -> Option<ArpPacket> {
    let view = ethernet::parse(frame)?;
    if view.ethertype != EtherType::ARP {
        return None;
    }
    ArpPacket::parse(&frame[view.payload_offset..]).ok()
}

/// MAC announced for `target_ip` if `frame` is an ARP reply from it
pub fn reply_mac(frame: &[u8], target_ip: Ipv4Addr) -> Option<MacAddr> {
    parse_frame(frame)
        .filter(|packet| packet.is_reply_from(target_ip))
        .map(|packet| packet.sender_mac)
}
