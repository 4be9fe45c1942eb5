//! Paced frame transmission
//!
//! The send loop owns the egress sender for the whole run. Before each frame
//! it waits for that frame's deadline or for cancellation, whichever comes
//! first; a send that has started is always allowed to finish.

use crate::binding::BindingCell;
use crate::mutate::Mutator;
use crate::pacing::PacingPlan;
use crate::report::{ReportAggregator, RunEvent};
use crate::rewrite::Rewriter;
use async_trait::async_trait;
use cipdip_capture::FrameRecord;
use cipdip_core::{Error, Interface, Result};
use pnet_datalink::DataLinkSender;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Where replayed frames go
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// Raw Ethernet sender on one interface
pub struct DatalinkSink {
    tx: Box<dyn DataLinkSender>,
    interface: String,
}

impl DatalinkSink {
    pub fn new(tx: Box<dyn DataLinkSender>, interface: impl Into<String>) -> Self {
        Self {
            tx,
            interface: interface.into(),
        }
    }

    pub fn open(interface: &Interface) -> Result<Self> {
        Ok(Self::new(interface.open_sender()?, interface.name.clone()))
    }
}

#[async_trait]
impl FrameSink for DatalinkSink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        match self.tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::Io(e)),
            None => Err(Error::Interface(format!("Send buffer full on {}", self.interface))),
        }
    }
}

/// How the send loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    Completed,
    Cancelled,
}

pub struct Transmitter {
    rewriter: Rewriter,
    mutator: Option<Mutator>,
    bindings: BindingCell,
    aggregator: Arc<ReportAggregator>,
}

impl Transmitter {
    pub fn new(rewriter: Rewriter, bindings: BindingCell, aggregator: Arc<ReportAggregator>) -> Self {
        Self {
            rewriter,
            mutator: None,
            bindings,
            aggregator,
        }
    }

    pub fn with_mutator(mut self, mutator: Mutator) -> Self {
        self.mutator = Some(mutator);
        self
    }

    /// Send the planned prefix of `frames` in order
    ///
    /// Per-frame failures are recorded and skipped. Only cancellation ends
    /// the loop early.
    pub async fn run(
        &mut self,
        plan: &PacingPlan,
        frames: &[FrameRecord],
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> TransmitOutcome {
        let mut deadline = Instant::now();
        info!(frames = plan.len(), mode = ?plan.mode(), "Transmitting");

        for (index, record) in frames.iter().take(plan.len()).enumerate() {
            deadline += plan.gap_before(index);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(frame = record.sequence_index, sent = index, "Transmission cancelled");
                    return TransmitOutcome::Cancelled;
                }
                _ = sleep_until(deadline) => {}
            }

            self.send_one(record, sink).await;
        }

        debug!(frames = plan.len(), "Transmission finished");
        TransmitOutcome::Completed
    }

    async fn send_one(&mut self, record: &FrameRecord, sink: &mut dyn FrameSink) {
        let binding = self.bindings.current();
        let rewritten = match self.rewriter.rewrite(record, binding.as_deref()) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!(frame = record.sequence_index, error = %e, "Rewrite failed, frame skipped");
                self.aggregator.record(RunEvent::SendFailed {
                    sequence_index: record.sequence_index,
                    reason: e.to_string(),
                });
                return;
            }
        };
        let was_rewritten = rewritten.raw != record.raw;

        let (frame, mutated) = match self.mutator.as_mut().and_then(|m| m.mutate(&rewritten)) {
            Some(mutated) => (mutated, true),
            None => (rewritten, false),
        };

        match sink.send(&frame.raw).await {
            Ok(()) => {
                trace!(
                    frame = record.sequence_index,
                    bytes = frame.len(),
                    rewritten = was_rewritten,
                    mutated,
                    "Frame sent"
                );
                self.aggregator.record(RunEvent::FrameSent {
                    bytes: frame.len(),
                    rewritten: was_rewritten,
                    mutated,
                });
            }
            Err(e) => {
                warn!(frame = record.sequence_index, error = %e, "Send failed");
                self.aggregator.record(RunEvent::SendFailed {
                    sequence_index: record.sequence_index,
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingSource, TargetBinding};
    use crate::pacing::PacingMode;
    use crate::rewrite::RewritePolicy;
    use bytes::Bytes;
    use cipdip_capture::ServerPorts;
    use cipdip_core::MacAddr;
    use cipdip_packet::{ethernet, EtherType, PacketBuilder, LINKTYPE_ETHERNET};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    const LIVE: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 50);

    #[derive(Default)]
    struct Recording {
        sent: Vec<Vec<u8>>,
        fail_every: Option<usize>,
        attempts: usize,
    }

    #[async_trait]
    impl FrameSink for Recording {
        async fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.attempts += 1;
            if self.fail_every.is_some_and(|n| self.attempts % n == 0) {
                return Err(Error::Io(std::io::Error::other("ENOBUFS")));
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }
    }

    fn frames(count: u16) -> Vec<FrameRecord> {
        (0..count)
            .map(|i| {
                let raw = PacketBuilder::new()
                    .ethernet(MacAddr::new([2, 0, 0, 0, 0, 1]), MacAddr::new([2, 0, 0, 0, 0, 2]), EtherType::IPv4)
                    .ipv4(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 20))
                    .identification(i)
                    .udp(51000, 2222)
                    .payload(vec![0xAB; 20])
                    .build()
                    .unwrap();
                FrameRecord::new(
                    u64::from(i),
                    Duration::from_millis(u64::from(i) * 10),
                    Bytes::from(raw),
                    0,
                    LINKTYPE_ETHERNET,
                    &ServerPorts::default(),
                )
            })
            .collect()
    }

    fn transmitter(policy: RewritePolicy, bindings: BindingCell) -> (Transmitter, Arc<ReportAggregator>) {
        let aggregator = Arc::new(ReportAggregator::new());
        let tx = Transmitter::new(Rewriter::new(policy).unwrap(), bindings, Arc::clone(&aggregator));
        (tx, aggregator)
    }

    #[tokio::test]
    async fn test_sends_in_order() {
        let input = frames(5);
        let plan = PacingPlan::build(&input, PacingMode::Burst, None);
        let (mut tx, aggregator) = transmitter(RewritePolicy::default(), BindingCell::new(None));
        let mut sink = Recording::default();

        let outcome = tx.run(&plan, &input, &mut sink, &CancellationToken::new()).await;
        assert_eq!(outcome, TransmitOutcome::Completed);
        let expected: Vec<Vec<u8>> = input.iter().map(|f| f.raw.to_vec()).collect();
        assert_eq!(sink.sent, expected);

        let stats = aggregator.summary();
        assert_eq!(stats.frames_sent, 5);
        assert_eq!(stats.frames_rewritten, 0);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_run() {
        let input = frames(6);
        let plan = PacingPlan::build(&input, PacingMode::Burst, None);
        let (mut tx, aggregator) = transmitter(RewritePolicy::default(), BindingCell::new(None));
        let mut sink = Recording {
            fail_every: Some(3),
            ..Default::default()
        };

        assert_eq!(
            tx.run(&plan, &input, &mut sink, &CancellationToken::new()).await,
            TransmitOutcome::Completed
        );
        let stats = aggregator.summary();
        assert_eq!(stats.frames_sent, 4);
        assert_eq!(stats.send_failures, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_frame() {
        let input = frames(3);
        let plan = PacingPlan::build(&input, PacingMode::Burst, None);
        let (mut tx, aggregator) = transmitter(RewritePolicy::default(), BindingCell::new(None));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut sink = Recording::default();
        assert_eq!(tx.run(&plan, &input, &mut sink, &cancel).await, TransmitOutcome::Cancelled);
        assert!(sink.sent.is_empty());
        assert_eq!(aggregator.summary().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_rewrites_against_current_binding() {
        let live_mac = MacAddr::new([0x00, 0x1d, 0x9c, 0, 0, 7]);
        let bindings = BindingCell::new(Some(TargetBinding::new(
            LIVE,
            live_mac,
            "eth0",
            Duration::from_secs(30),
            BindingSource::Arp,
        )));
        let policy = RewritePolicy {
            dst_ip: Some(IpAddr::V4(LIVE)),
            ..Default::default()
        };
        let input = frames(2);
        let plan = PacingPlan::build(&input, PacingMode::Burst, None);
        let (mut tx, aggregator) = transmitter(policy, bindings);
        let mut sink = Recording::default();

        tx.run(&plan, &input, &mut sink, &CancellationToken::new()).await;
        assert!(sink.sent.iter().all(|f| ethernet::destination(f) == Some(live_mac)));
        assert_eq!(aggregator.summary().frames_rewritten, 2);
    }

    #[tokio::test]
    async fn test_fixed_interval_is_honoured() {
        let input = frames(4);
        let plan = PacingPlan::build(&input, PacingMode::Fixed { interval_ms: 20 }, None);
        let (mut tx, _) = transmitter(RewritePolicy::default(), BindingCell::new(None));

        let started = std::time::Instant::now();
        tx.run(&plan, &input, &mut Recording::default(), &CancellationToken::new())
            .await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
