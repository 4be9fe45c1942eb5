//! Response capture while a run transmits
//!
//! Replies are only counted; pairing them with requests is left to whoever
//! reads the report.

use crate::report::{ReportAggregator, RunEvent};
use crate::config::ReplayConfig;
use cipdip_capture::LiveCapture;
use cipdip_core::Result;
use std::sync::Arc;
use tracing::debug;

/// Read-only observer of reply traffic
pub trait ResponseTap: Send {
    /// Begin counting replies into `aggregator`
    fn start(&mut self, aggregator: Arc<ReportAggregator>) -> Result<()>;

    fn stop(&mut self);
}

/// libpcap capture filtered to traffic coming from the server ports
pub struct PcapResponseTap {
    capture: LiveCapture,
}

impl PcapResponseTap {
    pub fn new(interface: &str, filter: impl Into<String>) -> Self {
        let mut capture = LiveCapture::new(interface);
        capture.set_filter(filter);
        Self { capture }
    }

    /// Tap for replies from the run's live server
    pub fn for_config(interface: &str, config: &ReplayConfig) -> Self {
        Self::new(interface, config.response_filter())
    }
}

impl ResponseTap for PcapResponseTap {
    fn start(&mut self, aggregator: Arc<ReportAggregator>) -> Result<()> {
        self.capture.start(move |frame| {
            aggregator.record(RunEvent::ResponseCaptured {
                bytes: frame.len(),
            });
        })
    }

    fn stop(&mut self) {
        if let Err(e) = self.capture.stop() {
            debug!(error = %e, "Response capture did not stop cleanly");
        }
        let stats = self.capture.stats();
        debug!(
            interface = %self.capture.interface(),
            packets = stats.packets_received,
            packets_per_second = stats.packets_per_second(),
            errors = stats.errors,
            "Response capture finished"
        );
    }
}
