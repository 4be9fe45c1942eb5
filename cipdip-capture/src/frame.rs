//! Captured frame records

use bytes::Bytes;
use cipdip_core::enip_ports;
use cipdip_packet::layers::LayerOffsets;
use cipdip_packet::transport::{self, TransportKind};
use serde::Serialize;
use std::time::Duration;

/// Request-like or response-like, from the ENIP server port heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Sent towards the server port
    Request,
    /// Sent from the server port
    Response,
    Unknown,
}

/// Ports that identify the ENIP server side of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    /// Explicit messaging, TCP and UDP
    pub explicit: u16,
    /// Implicit I/O, UDP only
    pub implicit_io: u16,
}

impl Default for ServerPorts {
    fn default() -> Self {
        Self {
            explicit: enip_ports::EXPLICIT,
            implicit_io: enip_ports::IMPLICIT_IO,
        }
    }
}

impl ServerPorts {
    fn is_server_port(&self, kind: TransportKind, port: u16) -> bool {
        port == self.explicit || (kind == TransportKind::Udp && port == self.implicit_io)
    }

    /// Destination on a server port wins over source, so I/O traffic between
    /// two 2222 endpoints counts as requests.
    pub fn classify(&self, kind: TransportKind, source_port: u16, destination_port: u16) -> Direction {
        if self.is_server_port(kind, destination_port) {
            Direction::Request
        } else if self.is_server_port(kind, source_port) {
            Direction::Response
        } else {
            Direction::Unknown
        }
    }

    /// Direction of a raw frame given its detected layers
    pub fn classify_frame(&self, raw: &[u8], layers: &LayerOffsets) -> Direction {
        let Some((kind, span)) = layers.transport else {
            return Direction::Unknown;
        };
        match raw.get(span.range()).and_then(|header| transport::parse(kind, header)) {
            Some(view) => self.classify(kind, view.source_port, view.destination_port),
            None => Direction::Unknown,
        }
    }
}

/// One frame of a loaded capture
///
/// Created once by the reader and never mutated; rewriting produces a new
/// record through [`FrameRecord::with_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// On-disk position, starting at 0
    pub sequence_index: u64,
    /// Original timestamp since the Unix epoch
    pub captured_at: Duration,
    pub raw: Bytes,
    pub layers: LayerOffsets,
    pub direction: Direction,
    /// Length of the frame on the wire (may exceed `raw.len()`)
    pub original_len: u32,
    /// pcap link type the frame was captured with
    pub linktype: u32,
}

impl FrameRecord {
    pub fn new(
        sequence_index: u64,
        captured_at: Duration,
        raw: Bytes,
        original_len: u32,
        linktype: u32,
        ports: &ServerPorts,
    ) -> Self {
        let layers = LayerOffsets::detect(&raw, linktype);
        let direction = ports.classify_frame(&raw, &layers);
        Self {
            sequence_index,
            captured_at,
            raw,
            layers,
            direction,
            original_len,
            linktype,
        }
    }

    /// A new record carrying `raw`, with identity and timing kept
    ///
    /// Layers are detected again; direction stays as originally classified.
    pub fn with_bytes(&self, raw: Vec<u8>) -> Self {
        let raw = Bytes::from(raw);
        let layers = LayerOffsets::detect(&raw, self.linktype);
        Self {
            sequence_index: self.sequence_index,
            captured_at: self.captured_at,
            original_len: self.original_len.max(raw.len() as u32),
            raw,
            layers,
            direction: self.direction,
            linktype: self.linktype,
        }
    }

    /// The capture holds fewer bytes than were on the wire
    pub fn is_snap_truncated(&self) -> bool {
        (self.raw.len() as u32) < self.original_len || self.layers.truncated
    }

    /// Captured application payload, if located
    pub fn application_payload(&self) -> Option<&[u8]> {
        self.layers
            .application_range()
            .and_then(|range| self.raw.get(range))
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
