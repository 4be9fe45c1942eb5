//! CIP/ENIP capture replay engine
//!
//! Takes a loaded capture, checks that the live target answers ARP, rewrites
//! addressing with checksums kept valid, and retransmits the frames with the
//! chosen pacing while a drift monitor watches the target's MAC.
//!
//! ```no_run
//! use cipdip_core::Interface;
//! use cipdip_replay::{
//!     DatalinkSink, PnetArpProbe, ReplayComponents, ReplayConfig, ReplayEngine,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> cipdip_core::Result<()> {
//! let config = ReplayConfig {
//!     input: Some("pcaps/forward_open.pcap".into()),
//!     server_ip: Some("10.0.0.20".parse().unwrap()),
//!     ..Default::default()
//! };
//! let interface = Interface::by_name("eth0")?;
//! let engine = ReplayEngine::new(config)?;
//! let report = engine
//!     .execute(ReplayComponents {
//!         probe: Some(Arc::new(PnetArpProbe::new(interface.clone()))),
//!         sink: Box::new(DatalinkSink::open(&interface)?),
//!         tap: None,
//!     })
//!     .await;
//! println!("{} frames sent", report.stats.frames_sent);
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod config;
pub mod drift;
pub mod engine;
pub mod mutate;
pub mod pacing;
pub mod report;
pub mod resolver;
pub mod responses;
pub mod rewrite;
pub mod transmit;

pub use binding::{BindingCell, BindingSource, TargetBinding};
pub use config::{ReplayConfig, ReplayMode};
pub use drift::{DriftMonitor, DriftPolicy};
pub use engine::{ReplayComponents, ReplayEngine, RunReport};
pub use mutate::{MutationPolicy, Mutator};
pub use pacing::{PacingMode, PacingPlan};
pub use report::{render_markdown, render_text, ReportAggregator, RunEvent, RunState, RunStats};
pub use resolver::{LinkProbe, LivenessResolver, PnetArpProbe};
pub use responses::{PcapResponseTap, ResponseTap};
pub use rewrite::{RewritePolicy, Rewriter};
pub use transmit::{DatalinkSink, FrameSink, TransmitOutcome, Transmitter};
