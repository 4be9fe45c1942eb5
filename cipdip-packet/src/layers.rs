//! Layer offset detection for captured frames
//!
//! Detection never fails: anything that is not Ethernet / IPv4 / TCP|UDP
//! still yields a record, with the missing layers left as `None` and the
//! application start marked [`ApplicationStart::Unknown`].

use crate::ethernet::{self, EtherType};
use crate::ipv4;
use crate::transport::{self, TransportKind};
use serde::Serialize;
use std::ops::Range;

/// pcap LINKTYPE_ETHERNET
pub const LINKTYPE_ETHERNET: u32 = 1;

/// A byte range inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Where the ENIP/CIP payload begins, if it can be located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplicationStart {
    Known(usize),
    Unknown,
}

impl ApplicationStart {
    pub fn offset(&self) -> Option<usize> {
        match self {
            ApplicationStart::Known(offset) => Some(*offset),
            ApplicationStart::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ApplicationStart::Known(_))
    }
}

/// Byte offsets of each layer in a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerOffsets {
    /// Ethernet header including VLAN tags
    pub ethernet: Option<Span>,
    /// IPv4 header (IHL * 4)
    pub ip: Option<Span>,
    /// TCP or UDP header
    pub transport: Option<(TransportKind, Span)>,
    pub application: ApplicationStart,
    /// Application bytes present in the capture
    pub application_len: usize,
    /// The capture holds fewer bytes than the IPv4 total length claims
    pub truncated: bool,
    /// The IPv4 datagram is one fragment of a larger one
    pub fragmented: bool,
}

impl LayerOffsets {
    /// Offsets for a frame nothing could be decoded from
    pub fn unknown() -> Self {
        Self {
            ethernet: None,
            ip: None,
            transport: None,
            application: ApplicationStart::Unknown,
            application_len: 0,
            truncated: false,
            fragmented: false,
        }
    }

    /// Detect layers of a frame captured with the given pcap link type
    pub fn detect(frame: &[u8], linktype: u32) -> Self {
        let mut offsets = Self::unknown();
        if linktype != LINKTYPE_ETHERNET {
            return offsets;
        }

        let Some(eth) = ethernet::parse(frame) else {
            return offsets;
        };
        offsets.ethernet = Some(Span::new(0, eth.payload_offset));
        if eth.ethertype != EtherType::IPv4 {
            return offsets;
        }

        let ip_offset = eth.payload_offset;
        let Some(ip) = ipv4::parse(&frame[ip_offset..]) else {
            return offsets;
        };
        offsets.ip = Some(Span::new(ip_offset, ip.header_len));
        offsets.fragmented = ip.is_fragment();

        let datagram_end = ip_offset + ip.total_length;
        offsets.truncated = frame.len() < datagram_end;
        let available_end = datagram_end.min(frame.len());

        let Some(kind) = TransportKind::from_protocol(ip.protocol) else {
            return offsets;
        };
        if !ip.carries_transport_header() {
            return offsets;
        }

        let transport_offset = ip_offset + ip.header_len;
        let Some(segment) = frame.get(transport_offset..available_end) else {
            return offsets;
        };
        let Some(view) = transport::parse(kind, segment) else {
            return offsets;
        };

        let application_offset = transport_offset + view.header_len;
        offsets.transport = Some((kind, Span::new(transport_offset, view.header_len)));
        offsets.application = ApplicationStart::Known(application_offset);
        offsets.application_len = available_end.saturating_sub(application_offset);
        offsets
    }

    /// Range of captured application bytes, if known
    pub fn application_range(&self) -> Option<Range<usize>> {
        self.application
            .offset()
            .map(|start| start..start + self.application_len)
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.map(|(kind, _)| kind)
    }

    /// Transport header plus captured payload
    pub fn segment_range(&self) -> Option<Range<usize>> {
        let (_, span) = self.transport?;
        Some(span.offset..span.end() + self.application_len)
    }
}
