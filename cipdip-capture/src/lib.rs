//! Capture input and output for CIPDIP replay
//!
//! - [`reader`] loads pcap and pcapng files into ordered [`FrameRecord`]s
//! - [`writer`] emits classic pcap
//! - [`live`] wraps libpcap for read-only capture on a background thread
//! - [`interface`] enumerates interfaces and picks an egress interface
//!
//! ```no_run
//! use cipdip_capture::CaptureReader;
//!
//! # fn main() -> cipdip_core::Result<()> {
//! let frames = CaptureReader::new().load("pcaps/forward_open.pcap")?;
//! for frame in &frames {
//!     println!("#{} {:?} {} bytes", frame.sequence_index, frame.direction, frame.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod filters;
pub mod frame;
pub mod interface;
pub mod live;
pub mod reader;
pub mod stats;
pub mod writer;

pub use frame::{Direction, FrameRecord, ServerPorts};
pub use interface::{list_capture_interfaces, list_interfaces, EgressResolver, SubnetEgressResolver};
pub use live::{CaptureState, LiveCapture, LiveCaptureConfig};
pub use reader::{CaptureFormat, CaptureReader};
pub use stats::{CaptureStats, StatsAccumulator};
pub use writer::PcapWriter;
