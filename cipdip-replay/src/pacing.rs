//! Pacing plan
//!
//! The plan is fixed before the first frame goes out: every inter-frame gap is
//! known up front, so the total duration can be reported by a preflight run.

use cipdip_capture::FrameRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on one realtime gap
pub const DEFAULT_MAX_GAP: Duration = Duration::from_secs(5);

/// How gaps between frames are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacingMode {
    /// Constant gap between frames
    Fixed { interval_ms: u64 },
    /// Original capture deltas divided by `scale` and capped at `max_gap_ms`
    Realtime { scale: f64, max_gap_ms: u64 },
    /// No gap at all
    #[default]
    Burst,
}

impl PacingMode {
    pub fn realtime() -> Self {
        PacingMode::Realtime {
            scale: 1.0,
            max_gap_ms: DEFAULT_MAX_GAP.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacingPlan {
    mode: PacingMode,
    /// Wait before each planned frame; the first is always zero
    gaps: Vec<Duration>,
}

impl PacingPlan {
    /// Plan the first `limit` frames (all of them if `None`)
    pub fn build(frames: &[FrameRecord], mode: PacingMode, limit: Option<usize>) -> Self {
        let count = limit.map_or(frames.len(), |limit| limit.min(frames.len()));
        let planned = &frames[..count];

        let gaps = planned
            .iter()
            .enumerate()
            .map(|(i, frame)| match (i, mode) {
                (0, _) | (_, PacingMode::Burst) => Duration::ZERO,
                (_, PacingMode::Fixed { interval_ms }) => Duration::from_millis(interval_ms),
                (_, PacingMode::Realtime { scale, max_gap_ms }) => {
                    realtime_gap(planned[i - 1].captured_at, frame.captured_at, scale, max_gap_ms)
                }
            })
            .collect();

        Self { mode, gaps }
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn gap_before(&self, index: usize) -> Duration {
        self.gaps.get(index).copied().unwrap_or_default()
    }

    /// Sum of all gaps
    pub fn total_duration(&self) -> Duration {
        self.gaps.iter().sum()
    }
}

fn realtime_gap(previous: Duration, current: Duration, scale: f64, max_gap_ms: u64) -> Duration {
    let delta = current.saturating_sub(previous);
    let scaled = if scale > 0.0 && scale.is_finite() && scale != 1.0 {
        Duration::try_from_secs_f64(delta.as_secs_f64() / scale).unwrap_or(Duration::MAX)
    } else {
        delta
    };
    scaled.min(Duration::from_millis(max_gap_ms))
}
