//! Live capture counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of a live capture's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Read errors other than timeouts
    pub errors: u64,
    pub duration: Duration,
}

impl CaptureStats {
    pub fn packets_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.packets_received as f64 / secs
        } else {
            0.0
        }
    }
}

/// Lock-free counters shared between the capture thread and its owner
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    started: Instant,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            packets: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn record_packet(&self, len: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            packets_received: self.packets.load(Ordering::Relaxed),
            bytes_received: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duration: self.started.elapsed(),
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
