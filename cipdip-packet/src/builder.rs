//! Packet builder for constructing Ethernet/IPv4/TCP|UDP frames
//!
//! Used for ARP probes and for synthesising capture fixtures. Checksums and
//! length fields are always filled in correctly.

use crate::ethernet::{self, EtherType};
use crate::ipv4;
use crate::transport::{self, TransportKind, TCP_MIN_HEADER_SIZE, UDP_HEADER_SIZE};
use bytes::{BufMut, BytesMut};
use cipdip_core::{Error, MacAddr, Result};
use std::net::Ipv4Addr;

/// TCP flag bits
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

#[derive(Debug, Clone, Copy)]
struct Layer2 {
    src: MacAddr,
    dst: MacAddr,
    ethertype: EtherType,
    vlan: Option<u16>,
}

#[derive(Debug, Clone, Copy)]
struct Layer3 {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    identification: u16,
}

#[derive(Debug, Clone, Copy)]
enum Layer4 {
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        window: u16,
    },
}

/// Fluent frame builder
///
/// ```
/// use std::net::Ipv4Addr;
/// use cipdip_core::MacAddr;
/// use cipdip_packet::PacketBuilder;
/// use cipdip_packet::ethernet::EtherType;
///
/// let frame = PacketBuilder::new()
///     .ethernet(MacAddr::new([2, 0, 0, 0, 0, 1]), MacAddr::broadcast(), EtherType::IPv4)
///     .ipv4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
///     .udp(50000, 2222)
///     .payload(vec![0u8; 16])
///     .build()
///     .unwrap();
/// assert_eq!(frame.len(), 60);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    layer2: Option<Layer2>,
    layer3: Option<Layer3>,
    layer4: Option<Layer4>,
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ethernet header; the EtherType is overridden to IPv4 when `ipv4()` is used
    pub fn ethernet(mut self, src: MacAddr, dst: MacAddr, ethertype: EtherType) -> Self {
        self.layer2 = Some(Layer2 {
            src,
            dst,
            ethertype,
            vlan: None,
        });
        self
    }

    /// Insert one 802.1Q tag. Must be called after `ethernet()`.
    pub fn vlan(mut self, id: u16) -> Self {
        if let Some(ref mut l2) = self.layer2 {
            l2.vlan = Some(id & 0x0FFF);
        }
        self
    }

    pub fn ipv4(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.layer3 = Some(Layer3 {
            src,
            dst,
            ttl: 64,
            identification: 0,
        });
        self
    }

    /// Must be called after `ipv4()`.
    pub fn ttl(mut self, ttl: u8) -> Self {
        if let Some(ref mut l3) = self.layer3 {
            l3.ttl = ttl;
        }
        self
    }

    /// Must be called after `ipv4()`.
    pub fn identification(mut self, id: u16) -> Self {
        if let Some(ref mut l3) = self.layer3 {
            l3.identification = id;
        }
        self
    }

    pub fn udp(mut self, src_port: u16, dst_port: u16) -> Self {
        self.layer4 = Some(Layer4::Udp { src_port, dst_port });
        self
    }

    pub fn tcp(mut self, src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u8) -> Self {
        self.layer4 = Some(Layer4::Tcp {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: 65535,
        });
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    /// Build the frame
    ///
    /// # Errors
    ///
    /// Layer 4 without layer 3, a missing layer 2, or a datagram longer than
    /// IPv4 can express.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut data = self.payload;

        let protocol = match self.layer4 {
            Some(layer4) => {
                let l3 = self
                    .layer3
                    .ok_or_else(|| Error::invalid_parameter("layer4", "TCP/UDP requires an IPv4 layer"))?;
                let (kind, segment) = encode_segment(layer4, l3, &data)?;
                data = segment;
                kind.protocol()
            }
            None => 0,
        };

        let mut ethertype = None;
        if let Some(l3) = self.layer3 {
            if data.len() + ipv4::MIN_HEADER_SIZE > usize::from(u16::MAX) {
                return Err(Error::invalid_parameter("payload", "exceeds IPv4 total length"));
            }
            let mut packet = ipv4::encode_header(l3.src, l3.dst, protocol, data.len(), l3.ttl, l3.identification);
            packet.extend_from_slice(&data);
            data = packet;
            ethertype = Some(EtherType::IPv4);
        }

        let l2 = self
            .layer2
            .ok_or_else(|| Error::invalid_parameter("layer2", "an Ethernet layer is required"))?;
        let ethertype = ethertype.unwrap_or(l2.ethertype);

        match l2.vlan {
            None => Ok(ethernet::encode(l2.dst, l2.src, ethertype, &data)),
            Some(id) => {
                let mut tagged = BytesMut::with_capacity(ethernet::VLAN_TAG_SIZE + 2 + data.len());
                tagged.put_u16(id);
                tagged.put_u16(ethertype.to_u16());
                tagged.put_slice(&data);
                Ok(ethernet::encode(l2.dst, l2.src, EtherType::VLAN, &tagged[..]))
            }
        }
    }
}

fn encode_segment(layer4: Layer4, l3: Layer3, payload: &[u8]) -> Result<(TransportKind, Vec<u8>)> {
    let mut buf = BytesMut::new();
    let kind = match layer4 {
        Layer4::Udp { src_port, dst_port } => {
            let length = UDP_HEADER_SIZE + payload.len();
            if length > usize::from(u16::MAX) {
                return Err(Error::invalid_parameter("payload", "exceeds UDP length"));
            }
            buf.put_u16(src_port);
            buf.put_u16(dst_port);
            buf.put_u16(length as u16);
            buf.put_u16(0);
            TransportKind::Udp
        }
        Layer4::Tcp {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window,
        } => {
            buf.put_u16(src_port);
            buf.put_u16(dst_port);
            buf.put_u32(seq);
            buf.put_u32(ack);
            buf.put_u8(((TCP_MIN_HEADER_SIZE / 4) as u8) << 4);
            buf.put_u8(flags);
            buf.put_u16(window);
            buf.put_u16(0);
            buf.put_u16(0);
            TransportKind::Tcp
        }
    };
    buf.put_slice(payload);

    let mut segment = buf.to_vec();
    // Checksum field is zero here, so UDP gets a real checksum
    set_checksum(kind, l3, &mut segment);
    Ok((kind, segment))
}

fn set_checksum(kind: TransportKind, l3: Layer3, segment: &mut [u8]) {
    let offset = kind.checksum_offset();
    let mut checksum = crate::checksum::transport_checksum(l3.src, l3.dst, kind.protocol(), segment);
    if kind == TransportKind::Udp && checksum == 0 {
        checksum = 0xFFFF;
    }
    segment[offset..offset + 2].copy_from_slice(&checksum.to_be_bytes());
    debug_assert!(transport::checksum_valid(kind, l3.src, l3.dst, segment));
}
