//! Live packet capture on a background thread (libpcap)

use crate::stats::{CaptureStats, StatsAccumulator};
use cipdip_core::{Error, Result};
use parking_lot::RwLock;
use pcap::{Active, Capture, Device};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const DEFAULT_SNAPLEN: i32 = 65535;

/// Read timeout; bounds how long `stop()` waits for the thread
const DEFAULT_TIMEOUT_MS: i32 = 100;

#[derive(Debug, Clone)]
pub struct LiveCaptureConfig {
    pub snaplen: i32,
    pub timeout_ms: i32,
    pub promiscuous: bool,
    pub immediate_mode: bool,
    /// Only deliver frames received by the interface, not ones it sent
    pub inbound_only: bool,
}

impl Default for LiveCaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            promiscuous: false,
            immediate_mode: true,
            inbound_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Running,
}

/// Read-only capture handle on one interface
pub struct LiveCapture {
    interface: String,
    config: LiveCaptureConfig,
    filter: Option<String>,
    state: Arc<RwLock<CaptureState>>,
    stats: StatsAccumulator,
    worker: Option<JoinHandle<()>>,
}

impl LiveCapture {
    pub fn new(interface: &str) -> Self {
        Self::with_config(interface, LiveCaptureConfig::default())
    }

    pub fn with_config(interface: &str, config: LiveCaptureConfig) -> Self {
        Self {
            interface: interface.to_string(),
            config,
            filter: None,
            state: Arc::new(RwLock::new(CaptureState::Stopped)),
            stats: StatsAccumulator::new(),
            worker: None,
        }
    }

    /// BPF filter applied when the capture starts
    pub fn set_filter(&mut self, bpf: impl Into<String>) {
        let bpf = bpf.into();
        debug!(filter = %bpf, "Setting BPF filter");
        self.filter = Some(bpf);
    }

    fn open(&self) -> Result<Capture<Active>> {
        let device = Device::from(self.interface.as_str());
        let mut capture = Capture::from_device(device)
            .map_err(|e| Error::Capture(format!("Failed to create capture: {}", e)))?
            .promisc(self.config.promiscuous)
            .snaplen(self.config.snaplen)
            .timeout(self.config.timeout_ms)
            .immediate_mode(self.config.immediate_mode)
            .open()
            .map_err(|e| Error::Capture(format!("Failed to open capture on {}: {}", self.interface, e)))?;

        if self.config.inbound_only {
            if let Err(e) = capture.direction(pcap::Direction::In) {
                warn!(interface = %self.interface, error = %e, "Cannot restrict capture direction");
            }
        }

        if let Some(filter) = &self.filter {
            capture
                .filter(filter, true)
                .map_err(|e| Error::Capture(format!("Failed to apply filter '{}': {}", filter, e)))?;
        }

        Ok(capture)
    }

    /// Open the device and deliver each frame to `callback` until stopped
    ///
    /// Open and filter errors are returned here; read errors end the thread.
    pub fn start<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        if *self.state.read() != CaptureState::Stopped {
            return Err(Error::Capture("Capture already running".to_string()));
        }

        let mut capture = self.open()?;
        *self.state.write() = CaptureState::Running;
        info!(interface = %self.interface, filter = ?self.filter, "Live capture started");

        let state = Arc::clone(&self.state);
        let stats = self.stats.clone();
        let interface = self.interface.clone();

        self.worker = Some(thread::spawn(move || {
            while *state.read() == CaptureState::Running {
                match capture.next_packet() {
                    Ok(packet) => {
                        stats.record_packet(packet.data.len());
                        callback(packet.data);
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        stats.record_error();
                        error!(interface = %interface, error = %e, "Live capture read failed");
                        break;
                    }
                }
            }
            *state.write() = CaptureState::Stopped;
            debug!(interface = %interface, "Capture thread finished");
        }));

        Ok(())
    }

    /// Signal the thread to stop and wait for it
    pub fn stop(&mut self) -> Result<()> {
        *self.state.write() = CaptureState::Stopped;
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| Error::Capture("Capture thread panicked".to_string()))?;
            info!(interface = %self.interface, "Live capture stopped");
        }
        Ok(())
    }

    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;

    #[test]
    fn test_config_default() {
        let config = LiveCaptureConfig::default();
        assert_eq!(config.snaplen, DEFAULT_SNAPLEN);
        assert!(config.inbound_only);
        assert!(!config.promiscuous);
    }

    #[test]
    fn test_new_capture_is_stopped() {
        let mut capture = LiveCapture::new("lo");
        capture.set_filter(filters::response_filter(None, 44818, 2222));
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert_eq!(capture.stats().packets_received, 0);
        assert!(capture.stop().is_ok());
    }

    #[test]
    fn test_start_on_missing_device_fails() {
        let mut capture = LiveCapture::new("nonexistent_interface_xyz");
        assert!(capture.start(|_| {}).is_err());
        assert_eq!(capture.state(), CaptureState::Stopped);
    }
}
