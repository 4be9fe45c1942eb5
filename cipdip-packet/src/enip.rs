//! EtherNet/IP encapsulation header
//!
//! 24-byte little-endian header that prefixes every ENIP message:
//!
//! ```text
//! command(2) length(2) session(4) status(4) sender_context(8) options(4)
//! ```
//!
//! The replay path only needs to recognise the header; CIP payload after it
//! is treated as opaque bytes.

use bytes::{BufMut, BytesMut};
use cipdip_core::{Error, Result};
use std::fmt;

/// Encapsulation header size
pub const HEADER_SIZE: usize = 24;

/// Encapsulation commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Nop,
    ListServices,
    ListIdentity,
    ListInterfaces,
    RegisterSession,
    UnregisterSession,
    SendRRData,
    SendUnitData,
    IndicateStatus,
    Cancel,
    Unknown(u16),
}

impl Command {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Command::Nop,
            0x0004 => Command::ListServices,
            0x0063 => Command::ListIdentity,
            0x0064 => Command::ListInterfaces,
            0x0065 => Command::RegisterSession,
            0x0066 => Command::UnregisterSession,
            0x006F => Command::SendRRData,
            0x0070 => Command::SendUnitData,
            0x0072 => Command::IndicateStatus,
            0x0073 => Command::Cancel,
            other => Command::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Command::Nop => 0x0000,
            Command::ListServices => 0x0004,
            Command::ListIdentity => 0x0063,
            Command::ListInterfaces => 0x0064,
            Command::RegisterSession => 0x0065,
            Command::UnregisterSession => 0x0066,
            Command::SendRRData => 0x006F,
            Command::SendUnitData => 0x0070,
            Command::IndicateStatus => 0x0072,
            Command::Cancel => 0x0073,
            Command::Unknown(other) => other,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Command::Unknown(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(value) => write!(f, "Unknown(0x{:04X})", value),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Decoded encapsulation header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulationHeader {
    pub command: Command,
    /// Length of the data following the header
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub options: u32,
}

impl EncapsulationHeader {
    pub fn new(command: Command, length: u16, session_handle: u32) -> Self {
        Self {
            command,
            length,
            session_handle,
            status: 0,
            sender_context: [0; 8],
            options: 0,
        }
    }

    /// Parse the header from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::PacketParsing(format!(
                "ENIP header needs {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        let mut sender_context = [0u8; 8];
        sender_context.copy_from_slice(&data[12..20]);

        Ok(Self {
            command: Command::from_u16(u16::from_le_bytes([data[0], data[1]])),
            length: u16::from_le_bytes([data[2], data[3]]),
            session_handle: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            status: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            sender_context,
            options: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);

        buf.put_u16_le(self.command.to_u16());
        buf.put_u16_le(self.length);
        buf.put_u32_le(self.session_handle);
        buf.put_u32_le(self.status);
        buf.put_slice(&self.sender_context);
        buf.put_u32_le(self.options);

        buf.to_vec()
    }
}

/// Whether `payload` begins with a plausible ENIP encapsulation header
///
/// A match needs a full header, a known command and zero options.
pub fn matches_signature(payload: &[u8]) -> bool {
    match EncapsulationHeader::parse(payload) {
        Ok(header) => header.command.is_known() && header.options == 0,
        Err(_) => false,
    }
}
