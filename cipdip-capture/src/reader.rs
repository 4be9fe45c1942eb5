//! Capture file reader (classic pcap and pcapng)
//!
//! The whole file is loaded into memory and parsed with `pcap-parser`.
//! Frames keep their on-disk order as `sequence_index`; timestamps are never
//! used for ordering.

use crate::frame::{FrameRecord, ServerPorts};
use bytes::Bytes;
use cipdip_core::{Error, Result};
use cipdip_packet::LINKTYPE_ETHERNET;
use nom::Needed;
use pcap_parser::{Block, PcapError};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const PCAP_MAGIC_USEC: u32 = 0xA1B2_C3D4;
const PCAP_MAGIC_NSEC: u32 = 0xA1B2_3C4D;
const PCAPNG_MAGIC: u32 = 0x0A0D_0D0A;

/// Container format of a capture file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Pcap { big_endian: bool, nanosecond: bool },
    PcapNg,
}

impl CaptureFormat {
    /// Identify the format from the first four bytes
    pub fn sniff(data: &[u8]) -> Result<Self> {
        let magic: [u8; 4] = data
            .get(0..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::UnsupportedFormat(format!("file too short ({} bytes)", data.len())))?;

        let be = u32::from_be_bytes(magic);
        let le = u32::from_le_bytes(magic);
        match (be, le) {
            (PCAPNG_MAGIC, _) => Ok(CaptureFormat::PcapNg),
            (PCAP_MAGIC_USEC, _) => Ok(CaptureFormat::Pcap { big_endian: true, nanosecond: false }),
            (PCAP_MAGIC_NSEC, _) => Ok(CaptureFormat::Pcap { big_endian: true, nanosecond: true }),
            (_, PCAP_MAGIC_USEC) => Ok(CaptureFormat::Pcap { big_endian: false, nanosecond: false }),
            (_, PCAP_MAGIC_NSEC) => Ok(CaptureFormat::Pcap { big_endian: false, nanosecond: true }),
            _ => Err(Error::UnsupportedFormat(format!("unknown magic {:02x?}", magic))),
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFormat::Pcap { nanosecond: true, .. } => write!(f, "pcap (ns)"),
            CaptureFormat::Pcap { .. } => write!(f, "pcap"),
            CaptureFormat::PcapNg => write!(f, "pcapng"),
        }
    }
}

/// Reads capture files into ordered [`FrameRecord`]s
#[derive(Debug, Clone, Default)]
pub struct CaptureReader {
    ports: ServerPorts,
}

impl CaptureReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use non-default ENIP server ports for direction classification
    pub fn with_server_ports(mut self, ports: ServerPorts) -> Self {
        self.ports = ports;
        self
    }

    /// Load and parse a capture file
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<FrameRecord>> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let frames = self.parse(&data)?;
        info!(path = %path.display(), frames = frames.len(), "Loaded capture");
        Ok(frames)
    }

    /// Parse an in-memory capture
    pub fn parse(&self, data: &[u8]) -> Result<Vec<FrameRecord>> {
        let format = CaptureFormat::sniff(data)?;
        debug!(%format, bytes = data.len(), "Parsing capture");

        match format {
            CaptureFormat::Pcap { big_endian, nanosecond } => self.parse_pcap(data, big_endian, nanosecond),
            CaptureFormat::PcapNg => self.parse_pcapng(data),
        }
    }

    fn parse_pcap(&self, data: &[u8], big_endian: bool, nanosecond: bool) -> Result<Vec<FrameRecord>> {
        let (mut rest, header) = pcap_parser::parse_pcap_header(data).map_err(|e| parse_error(data, data, e))?;
        let linktype = header.network.0 as u32;
        if linktype != LINKTYPE_ETHERNET {
            warn!(linktype, "Non-Ethernet link type, layers will be unknown");
        }

        let mut frames = Vec::new();
        while !rest.is_empty() {
            let parsed = if big_endian {
                pcap_parser::parse_pcap_frame_be(rest)
            } else {
                pcap_parser::parse_pcap_frame(rest)
            };
            let (next, block) = parsed.map_err(|e| parse_error(data, rest, e))?;

            let fraction = u64::from(block.ts_usec);
            let nanos = if nanosecond { fraction } else { fraction * 1_000 };
            let captured_at = Duration::from_secs(u64::from(block.ts_sec)) + Duration::from_nanos(nanos);

            frames.push(FrameRecord::new(
                frames.len() as u64,
                captured_at,
                Bytes::copy_from_slice(block.data),
                block.origlen,
                linktype,
                &self.ports,
            ));
            rest = next;
        }

        Ok(frames)
    }

    fn parse_pcapng(&self, data: &[u8]) -> Result<Vec<FrameRecord>> {
        let mut rest = data;
        let mut big_endian = false;
        let mut interfaces: Vec<InterfaceTiming> = Vec::new();
        let mut frames = Vec::new();

        while !rest.is_empty() {
            let at_section = rest.len() >= 4 && u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) == PCAPNG_MAGIC;
            if at_section {
                let (next, shb) = pcap_parser::parse_sectionheaderblock(rest).map_err(|e| parse_error(data, rest, e))?;
                big_endian = shb.big_endian();
                interfaces.clear();
                rest = next;
                continue;
            }

            let parsed = if big_endian {
                pcap_parser::parse_block_be(rest)
            } else {
                pcap_parser::parse_block_le(rest)
            };
            let (next, block) = parsed.map_err(|e| parse_error(data, rest, e))?;

            match block {
                Block::InterfaceDescription(idb) => {
                    interfaces.push(InterfaceTiming {
                        linktype: idb.linktype.0 as u32,
                        units_per_second: units_per_second(idb.if_tsresol),
                        offset_secs: idb.if_tsoffset,
                    });
                }
                Block::EnhancedPacket(epb) => {
                    let iface = interfaces.get(epb.if_id as usize).copied().ok_or_else(|| {
                        Error::malformed(format!("packet references unknown interface {}", epb.if_id))
                    })?;
                    let ticks = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                    let caplen = (epb.caplen as usize).min(epb.data.len());

                    frames.push(FrameRecord::new(
                        frames.len() as u64,
                        iface.timestamp(ticks),
                        Bytes::copy_from_slice(&epb.data[..caplen]),
                        epb.origlen,
                        iface.linktype,
                        &self.ports,
                    ));
                }
                Block::SimplePacket(spb) => {
                    let iface = interfaces
                        .first()
                        .copied()
                        .ok_or_else(|| Error::malformed("simple packet block before any interface"))?;
                    let len = (spb.origlen as usize).min(spb.data.len());

                    // SPBs carry no timestamp
                    frames.push(FrameRecord::new(
                        frames.len() as u64,
                        Duration::ZERO,
                        Bytes::copy_from_slice(&spb.data[..len]),
                        spb.origlen,
                        iface.linktype,
                        &self.ports,
                    ));
                }
                _ => {}
            }
            rest = next;
        }

        Ok(frames)
    }
}

#[derive(Debug, Clone, Copy)]
struct InterfaceTiming {
    linktype: u32,
    units_per_second: u64,
    offset_secs: i64,
}

impl InterfaceTiming {
    fn timestamp(&self, ticks: u64) -> Duration {
        let secs = ticks / self.units_per_second;
        let remainder = ticks % self.units_per_second;
        let nanos = (u128::from(remainder) * 1_000_000_000 / u128::from(self.units_per_second)) as u64;
        let base = Duration::from_secs(secs).saturating_add(Duration::from_nanos(nanos));

        // Out-of-range timestamps clamp instead of failing the whole capture
        if self.offset_secs >= 0 {
            base.saturating_add(Duration::from_secs(self.offset_secs as u64))
        } else {
            base.saturating_sub(Duration::from_secs(self.offset_secs.unsigned_abs()))
        }
    }
}

/// Timestamp units per second for an `if_tsresol` value
///
/// MSB set: negative power of two; otherwise negative power of ten.
fn units_per_second(tsresol: u8) -> u64 {
    let exponent = u32::from(tsresol & 0x7F);
    let units = if tsresol & 0x80 != 0 {
        2u64.checked_pow(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    units.unwrap_or(1_000_000).max(1)
}

fn parse_error(data: &[u8], at: &[u8], err: nom::Err<PcapError<&[u8]>>) -> Error {
    let offset = data.len() - at.len();
    match err {
        nom::Err::Incomplete(needed) => Error::TruncatedCapture {
            offset,
            needed: match needed {
                Needed::Size(n) => n.get(),
                Needed::Unknown => 0,
            },
        },
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            Error::malformed(format!("at byte {}: {:?}", offset, e))
        }
    }
}
