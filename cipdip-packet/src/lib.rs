//! Frame views and builders for CIPDIP replay
//!
//! Captured frames are handled as raw byte buffers. The modules here locate
//! and patch fields at their offsets rather than decoding whole packets, so a
//! frame that is rewritten keeps every byte that was not deliberately changed.
//!
//! - [`layers`] - Ethernet/IPv4/TCP/UDP offset detection
//! - [`ethernet`], [`ipv4`], [`transport`] - field accessors and setters
//! - [`checksum`] - RFC 1071 checksums, full and incremental
//! - [`enip`] - EtherNet/IP encapsulation header and signature match
//! - [`arp`] - ARP requests and reply matching
//! - [`builder`] - fluent frame construction

pub mod arp;
pub mod builder;
pub mod checksum;
pub mod enip;
pub mod ethernet;
pub mod ipv4;
pub mod layers;
pub mod transport;

pub use builder::PacketBuilder;
pub use checksum::{internet_checksum, transport_checksum};
pub use ethernet::EtherType;
pub use layers::{ApplicationStart, LayerOffsets, Span, LINKTYPE_ETHERNET};
pub use transport::TransportKind;
