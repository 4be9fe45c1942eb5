//! Payload fuzzing for DPI stress runs
//!
//! Deliberately produces malformed application data. It is kept apart from
//! [`Rewriter`](crate::rewrite::Rewriter) so the rewriter can guarantee
//! well-formed output; the two are only chained by the transmitter.

use cipdip_capture::FrameRecord;
use cipdip_core::{Error, Result};
use cipdip_packet::{ipv4, transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MAX_FLIPS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPolicy {
    /// Probability that a given frame is corrupted, 0.0..=1.0
    pub rate: f64,
    /// Fixed seed for reproducible corruption
    pub seed: Option<u64>,
    /// Repair the transport checksum after corrupting
    #[serde(default)]
    pub fix_checksums: bool,
}

impl MutationPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(Error::invalid_parameter(
                "mutate-rate",
                format!("{} is outside 0.0..=1.0", self.rate),
            ));
        }
        Ok(())
    }
}

pub struct Mutator {
    policy: MutationPolicy,
    rng: StdRng,
}

impl Mutator {
    pub fn new(policy: MutationPolicy) -> Result<Self> {
        policy.validate()?;
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { policy, rng })
    }

    /// Corrupt a few application bytes of `record`, or `None` if this frame
    /// is left alone
    pub fn mutate(&mut self, record: &FrameRecord) -> Option<FrameRecord> {
        let range = record.layers.application_range().filter(|r| !r.is_empty())?;
        if !self.rng.gen_bool(self.policy.rate) {
            return None;
        }

        let mut raw = record.raw.to_vec();
        let flips = self.rng.gen_range(1..=MAX_FLIPS.min(range.len()));
        for _ in 0..flips {
            let at = self.rng.gen_range(range.clone());
            raw[at] ^= self.rng.gen_range(1..=u8::MAX);
        }

        if self.policy.fix_checksums && !record.is_snap_truncated() && !record.layers.fragmented {
            repair_checksum(record, &mut raw);
        }

        Some(record.with_bytes(raw))
    }
}

fn repair_checksum(record: &FrameRecord, raw: &mut [u8]) {
    let (Some(ip_span), Some(kind), Some(segment)) = (
        record.layers.ip,
        record.layers.transport_kind(),
        record.layers.segment_range(),
    ) else {
        return;
    };
    if let Some(ip) = ipv4::parse(&raw[ip_span.offset..]) {
        transport::recompute_checksum(kind, ip.source, ip.destination, &mut raw[segment]);
    }
}
