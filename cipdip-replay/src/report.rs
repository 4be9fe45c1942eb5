//! Run statistics and the Report Aggregator
//!
//! Every counter change goes through [`ReportAggregator::record`], which is
//! serialised by a mutex. The send loop, the drift monitor and the response
//! capture thread all write concurrently; readers take snapshots with
//! [`ReportAggregator::summary`] at any time.

use crate::binding::{BindingSource, TargetBinding};
use chrono::{DateTime, Utc};
use cipdip_core::MacAddr;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

/// Lifecycle of a replay run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Preflighted,
    Transmitting,
    Completed,
    Aborted,
}

/// Outcome of the liveness check, as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub target: Ipv4Addr,
    pub mac: MacAddr,
    pub interface: String,
    pub resolved_at: DateTime<Utc>,
    pub source: BindingSource,
}

impl From<&TargetBinding> for ResolutionRecord {
    fn from(binding: &TargetBinding) -> Self {
        Self {
            target: binding.target_ip,
            mac: binding.resolved_mac,
            interface: binding.interface_name.clone(),
            resolved_at: binding.resolved_at,
            source: binding.source,
        }
    }
}

/// Something that happened during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateChanged(RunState),
    Planned { frames: u64, duration: Duration },
    Resolved(ResolutionRecord),
    ResolutionFailed { target: Ipv4Addr, reason: String },
    FrameSent { bytes: usize, rewritten: bool, mutated: bool },
    SendFailed { sequence_index: u64, reason: String },
    DriftDetected { previous: MacAddr, current: MacAddr, rebound: bool },
    ResponseCaptured { bytes: usize },
    ResponseCaptureFailed(String),
    Aborted(String),
}

/// Counters and outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub frames_planned: u64,
    pub frames_sent: u64,
    pub frames_rewritten: u64,
    pub frames_mutated: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
    pub resolution_failures: u64,
    pub drift_events: u64,
    pub responses_captured: u64,
    pub response_capture_errors: u64,
    pub planned_duration_ms: u64,
    /// Most recent successful resolution
    pub resolution: Option<ResolutionRecord>,
    pub abort_reason: Option<String>,
    /// Last few per-frame send errors
    pub recent_errors: Vec<String>,
}

const MAX_RECENT_ERRORS: usize = 16;

impl RunStats {
    fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            state: RunState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            frames_planned: 0,
            frames_sent: 0,
            frames_rewritten: 0,
            frames_mutated: 0,
            send_failures: 0,
            bytes_sent: 0,
            resolution_failures: 0,
            drift_events: 0,
            responses_captured: 0,
            response_capture_errors: 0,
            planned_duration_ms: 0,
            resolution: None,
            abort_reason: None,
            recent_errors: Vec::new(),
        }
    }

    fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::StateChanged(state) => {
                self.state = state;
                if matches!(state, RunState::Completed | RunState::Aborted) {
                    self.finished_at = Some(Utc::now());
                }
            }
            RunEvent::Planned { frames, duration } => {
                self.frames_planned = frames;
                self.planned_duration_ms = duration.as_millis() as u64;
            }
            RunEvent::Resolved(record) => self.resolution = Some(record),
            RunEvent::ResolutionFailed { .. } => self.resolution_failures += 1,
            RunEvent::FrameSent { bytes, rewritten, mutated } => {
                self.frames_sent += 1;
                self.bytes_sent += bytes as u64;
                self.frames_rewritten += u64::from(rewritten);
                self.frames_mutated += u64::from(mutated);
            }
            RunEvent::SendFailed { sequence_index, reason } => {
                self.send_failures += 1;
                self.push_error(format!("frame {}: {}", sequence_index, reason));
            }
            RunEvent::DriftDetected { .. } => self.drift_events += 1,
            RunEvent::ResponseCaptured { .. } => self.responses_captured += 1,
            RunEvent::ResponseCaptureFailed(reason) => {
                self.response_capture_errors += 1;
                self.push_error(format!("response capture: {}", reason));
            }
            RunEvent::Aborted(reason) => {
                self.state = RunState::Aborted;
                self.finished_at = Some(Utc::now());
                self.abort_reason = Some(reason);
            }
        }
    }

    fn push_error(&mut self, message: String) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.remove(0);
        }
        self.recent_errors.push(message);
    }

    /// Run ended without an abort
    pub fn is_success(&self) -> bool {
        matches!(self.state, RunState::Completed | RunState::Preflighted)
    }
}

/// Single synchronized writer for [`RunStats`]
#[derive(Debug)]
pub struct ReportAggregator {
    stats: Mutex<RunStats>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(RunStats::new()),
        }
    }

    /// Apply one event
    pub fn record(&self, event: RunEvent) {
        trace!(?event, "Run event");
        self.stats.lock().apply(event);
    }

    /// Point-in-time copy, safe while the run is in progress
    pub fn summary(&self) -> RunStats {
        self.stats.lock().clone()
    }

    pub fn state(&self) -> RunState {
        self.stats.lock().state
    }
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Markdown report body
pub fn render_markdown(stats: &RunStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# CIP replay report\n");
    let _ = writeln!(out, "- Run: `{}`", stats.run_id);
    let _ = writeln!(out, "- State: **{:?}**", stats.state);
    let _ = writeln!(out, "- Started: {}", stats.started_at.to_rfc3339());
    if let Some(finished) = stats.finished_at {
        let _ = writeln!(out, "- Finished: {}", finished.to_rfc3339());
    }
    if let Some(reason) = &stats.abort_reason {
        let _ = writeln!(out, "- Abort reason: {}", reason);
    }

    let _ = writeln!(out, "\n## Target\n");
    match &stats.resolution {
        Some(res) => {
            let _ = writeln!(
                out,
                "`{}` is at `{}` via `{}` ({:?}, {})",
                res.target,
                res.mac,
                res.interface,
                res.source,
                res.resolved_at.to_rfc3339()
            );
        }
        None => {
            let _ = writeln!(out, "No link-layer resolution.");
        }
    }

    let _ = writeln!(out, "\n## Counters\n");
    let _ = writeln!(out, "| Counter | Value |");
    let _ = writeln!(out, "|---|---|");
    for (name, value) in counters(stats) {
        let _ = writeln!(out, "| {} | {} |", name, value);
    }

    if !stats.recent_errors.is_empty() {
        let _ = writeln!(out, "\n## Recent errors\n");
        for err in &stats.recent_errors {
            let _ = writeln!(out, "- {}", err);
        }
    }
    out
}

/// Plain text report body
pub fn render_text(stats: &RunStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CIP replay report");
    let _ = writeln!(out, "run:    {}", stats.run_id);
    let _ = writeln!(out, "state:  {:?}", stats.state);
    if let Some(reason) = &stats.abort_reason {
        let _ = writeln!(out, "abort:  {}", reason);
    }
    if let Some(res) = &stats.resolution {
        let _ = writeln!(out, "target: {} at {} via {}", res.target, res.mac, res.interface);
    }
    for (name, value) in counters(stats) {
        let _ = writeln!(out, "{:<26}{}", format!("{}:", name), value);
    }
    for err in &stats.recent_errors {
        let _ = writeln!(out, "error: {}", err);
    }
    out
}

fn counters(stats: &RunStats) -> [(&'static str, u64); 11] {
    [
        ("frames planned", stats.frames_planned),
        ("frames sent", stats.frames_sent),
        ("frames rewritten", stats.frames_rewritten),
        ("frames mutated", stats.frames_mutated),
        ("send failures", stats.send_failures),
        ("bytes sent", stats.bytes_sent),
        ("resolution failures", stats.resolution_failures),
        ("drift events", stats.drift_events),
        ("responses captured", stats.responses_captured),
        ("response capture errors", stats.response_capture_errors),
        ("planned duration ms", stats.planned_duration_ms),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_follow_events() {
        let agg = ReportAggregator::new();
        agg.record(RunEvent::Planned { frames: 3, duration: Duration::from_millis(60) });
        agg.record(RunEvent::FrameSent { bytes: 60, rewritten: true, mutated: false });
        agg.record(RunEvent::FrameSent { bytes: 100, rewritten: false, mutated: true });
        agg.record(RunEvent::SendFailed { sequence_index: 2, reason: "ENOBUFS".into() });

        let stats = agg.summary();
        assert_eq!(stats.frames_planned, 3);
        assert_eq!(stats.planned_duration_ms, 60);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_rewritten, 1);
        assert_eq!(stats.frames_mutated, 1);
        assert_eq!(stats.bytes_sent, 160);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.recent_errors, vec!["frame 2: ENOBUFS".to_string()]);
    }

    #[test]
    fn test_concurrent_records_not_lost() {
        let agg = Arc::new(ReportAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        agg.record(RunEvent::ResponseCaptured { bytes: 1 });
                        agg.record(RunEvent::FrameSent { bytes: 1, rewritten: false, mutated: false });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = agg.summary();
        assert_eq!(stats.responses_captured, 8000);
        assert_eq!(stats.frames_sent, 8000);
    }

    #[test]
    fn test_abort_sets_state_and_reason() {
        let agg = ReportAggregator::new();
        agg.record(RunEvent::StateChanged(RunState::Transmitting));
        agg.record(RunEvent::Aborted("cancelled".into()));

        let stats = agg.summary();
        assert_eq!(stats.state, RunState::Aborted);
        assert_eq!(stats.abort_reason.as_deref(), Some("cancelled"));
        assert!(stats.finished_at.is_some());
        assert!(!stats.is_success());
    }

    #[test]
    fn test_recent_errors_bounded() {
        let agg = ReportAggregator::new();
        for i in 0..40 {
            agg.record(RunEvent::SendFailed { sequence_index: i, reason: "x".into() });
        }
        let stats = agg.summary();
        assert_eq!(stats.send_failures, 40);
        assert_eq!(stats.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(stats.recent_errors.last().unwrap(), "frame 39: x");
    }

    #[test]
    fn test_renderers() {
        let agg = ReportAggregator::new();
        agg.record(RunEvent::FrameSent { bytes: 64, rewritten: true, mutated: false });
        agg.record(RunEvent::StateChanged(RunState::Completed));
        let stats = agg.summary();

        let md = render_markdown(&stats);
        assert!(md.starts_with("# CIP replay report"));
        assert!(md.contains("| frames sent | 1 |"));
        assert!(md.contains("No link-layer resolution."));

        let text = render_text(&stats);
        assert!(text.contains("state:  Completed"));
        assert!(text.contains("frames sent:"));
    }

    #[test]
    fn test_stats_serialize() {
        let stats = ReportAggregator::new().summary();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["frames_sent"], 0);
    }
}
