//! Replay orchestration
//!
//! [`ReplayEngine`] takes a validated [`ReplayConfig`] through the whole run:
//! load, filter, plan, pre-check the rewrite on the planned frames, resolve
//! the target, then transmit with the drift monitor and response capture
//! running alongside.
//! Every outcome, including aborts, ends in a [`RunReport`].

use crate::binding::{BindingCell, BindingSource, TargetBinding};
use crate::config::ReplayConfig;
use crate::drift::DriftMonitor;
use crate::mutate::Mutator;
use crate::pacing::PacingPlan;
use crate::report::{ReportAggregator, ResolutionRecord, RunEvent, RunState, RunStats};
use crate::resolver::{LinkProbe, LivenessResolver, DEFAULT_STALE_AFTER};
use crate::responses::ResponseTap;
use crate::rewrite::Rewriter;
use crate::transmit::{FrameSink, TransmitOutcome, Transmitter};
use cipdip_capture::{CaptureReader, Direction, FrameRecord};
use cipdip_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Live collaborators of a run
pub struct ReplayComponents {
    /// Link probe for resolution and drift monitoring
    pub probe: Option<Arc<dyn LinkProbe>>,
    pub sink: Box<dyn FrameSink>,
    pub tap: Option<Box<dyn ResponseTap>>,
}

/// Final statistics and, for aborted runs, the reason
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStats,
    pub failure: Option<Error>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<RunStats> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

pub struct ReplayEngine {
    config: ReplayConfig,
    aggregator: Arc<ReportAggregator>,
    cancel: CancellationToken,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            aggregator: Arc::new(ReportAggregator::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Live view of the run's statistics
    pub fn aggregator(&self) -> Arc<ReportAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Cancelling this token stops the run before its next frame
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn load_frames(&self) -> Result<Vec<FrameRecord>> {
        let path = self.config.resolve_input()?;
        CaptureReader::new()
            .with_server_ports(self.config.server_ports())
            .load(path)
    }

    /// Load the configured capture and run it
    pub async fn execute(&self, components: ReplayComponents) -> RunReport {
        match self.load_frames() {
            Ok(frames) => self.run(frames, components).await,
            Err(e) => self.abort(e),
        }
    }

    /// Run already-loaded frames
    pub async fn run(&self, frames: Vec<FrameRecord>, components: ReplayComponents) -> RunReport {
        let config = &self.config;
        let total = frames.len();
        let frames: Vec<FrameRecord> = if config.include_responses {
            frames
        } else {
            frames
                .into_iter()
                .filter(|frame| frame.direction != Direction::Response)
                .collect()
        };
        debug!(total, kept = frames.len(), include_responses = config.include_responses, "Frames selected");

        let plan = PacingPlan::build(&frames, config.pacing, config.limit);
        let planned = &frames[..plan.len()];

        let rewriter = match Rewriter::new(config.rewrite.clone()).and_then(|r| r.check(planned).map(|()| r)) {
            Ok(rewriter) => rewriter,
            Err(e) => return self.abort(e),
        };
        let mutator = match config.mutation.clone().map(Mutator::new).transpose() {
            Ok(mutator) => mutator,
            Err(e) => return self.abort(e),
        };

        self.aggregator.record(RunEvent::Planned {
            frames: plan.len() as u64,
            duration: plan.total_duration(),
        });
        info!(
            frames = plan.len(),
            duration_ms = plan.total_duration().as_millis() as u64,
            "Replay planned"
        );

        let stale_after = match config.arp_refresh_ms {
            0 => DEFAULT_STALE_AFTER,
            ms => Duration::from_millis(ms),
        };
        let resolver = components.probe.map(|probe| {
            LivenessResolver::new(probe, config.arp_timeout(), config.arp_retries).with_stale_after(stale_after)
        });
        let bindings = BindingCell::new(None);

        match self.preflight(resolver.as_ref(), stale_after, &bindings).await {
            Ok(true) => {}
            Ok(false) => return self.abort(Error::Interrupted("cancelled during preflight".to_string())),
            Err(e) => return self.abort(e),
        }
        self.aggregator.record(RunEvent::StateChanged(RunState::Preflighted));

        if config.preflight_only {
            info!("Preflight only, nothing sent");
            return self.report(None);
        }

        let run_token = self.cancel.child_token();
        let drift_task = match (config.drift_policy(), resolver, config.arp_target()) {
            (Some(policy), Some(resolver), Some(target)) => {
                let monitor = DriftMonitor::new(resolver, target, bindings.clone(), self.aggregator(), policy);
                Some(tokio::spawn(monitor.run(run_token.clone())))
            }
            (Some(_), _, _) => {
                warn!("Drift monitoring needs a link probe and a target, disabled");
                None
            }
            _ => None,
        };

        let mut tap = None;
        if let Some(mut candidate) = components.tap.filter(|_| config.include_responses) {
            match candidate.start(self.aggregator()) {
                Ok(()) => tap = Some(candidate),
                Err(e) => {
                    warn!(error = %e, "Response capture unavailable");
                    self.aggregator.record(RunEvent::ResponseCaptureFailed(e.to_string()));
                }
            }
        }

        self.aggregator.record(RunEvent::StateChanged(RunState::Transmitting));
        let mut transmitter = Transmitter::new(rewriter, bindings, self.aggregator());
        if let Some(mutator) = mutator {
            warn!("Payload mutation enabled, frames will carry corrupted data");
            transmitter = transmitter.with_mutator(mutator);
        }
        let mut sink = components.sink;
        let outcome = transmitter.run(&plan, &frames, sink.as_mut(), &run_token).await;

        run_token.cancel();
        let drift_result = match drift_task {
            Some(task) => task
                .await
                .unwrap_or_else(|e| Err(Error::Interrupted(format!("drift monitor task failed: {}", e)))),
            None => Ok(()),
        };
        if let Some(mut tap) = tap {
            tap.stop();
        }

        match (drift_result, outcome) {
            (Err(e), _) => self.abort(e),
            (Ok(()), TransmitOutcome::Cancelled) => self.abort(Error::Interrupted("replay cancelled".to_string())),
            (Ok(()), TransmitOutcome::Completed) => {
                self.aggregator.record(RunEvent::StateChanged(RunState::Completed));
                let report = self.report(None);
                info!(
                    sent = report.stats.frames_sent,
                    rewritten = report.stats.frames_rewritten,
                    failures = report.stats.send_failures,
                    "Replay completed"
                );
                report
            }
        }
    }

    /// Resolve the target before anything is sent
    ///
    /// Returns `Ok(false)` if cancelled while waiting.
    async fn preflight(
        &self,
        resolver: Option<&LivenessResolver>,
        stale_after: Duration,
        bindings: &BindingCell,
    ) -> Result<bool> {
        let config = &self.config;
        let Some(target) = config.arp_target() else {
            debug!("No ARP target, skipping resolution");
            return Ok(true);
        };
        let Some(resolver) = resolver else {
            if config.arp_required || config.preflight_only {
                return Err(Error::Interface(format!("No link probe available to resolve {}", target)));
            }
            debug!(%target, "No link probe, skipping resolution");
            return Ok(true);
        };

        info!(
            %target,
            interface = %resolver.interface_name(),
            timeout_ms = config.arp_timeout_ms,
            retries = config.arp_retries,
            "Resolving target"
        );
        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(false),
            resolved = resolver.resolve(target) => resolved,
        };

        match resolved {
            Ok(binding) => {
                self.aggregator.record(RunEvent::Resolved(ResolutionRecord::from(&binding)));
                bindings.replace(binding);
                Ok(true)
            }
            Err(e) => {
                self.aggregator.record(RunEvent::ResolutionFailed {
                    target,
                    reason: e.to_string(),
                });
                if config.arp_required || config.preflight_only {
                    return Err(e);
                }

                match config.arp_fallback_mac.or(config.rewrite.dst_mac) {
                    Some(mac) => {
                        warn!(%target, %mac, error = %e, "Resolution failed, using fallback MAC");
                        let binding = TargetBinding::new(
                            target,
                            mac,
                            resolver.interface_name(),
                            stale_after,
                            BindingSource::Fallback,
                        );
                        self.aggregator.record(RunEvent::Resolved(ResolutionRecord::from(&binding)));
                        bindings.replace(binding);
                    }
                    None => warn!(%target, error = %e, "Resolution failed, frames keep their captured MACs"),
                }
                Ok(true)
            }
        }
    }

    fn abort(&self, e: Error) -> RunReport {
        match &e {
            Error::Interrupted(_) => warn!(reason = %e, "Replay aborted"),
            e if e.is_pre_transmission() => error!(error = %e, "Replay rejected before sending"),
            e => error!(error = %e, "Replay aborted"),
        }
        self.aggregator.record(RunEvent::Aborted(e.to_string()));
        self.report(Some(e))
    }

    fn report(&self, failure: Option<Error>) -> RunReport {
        RunReport {
            stats: self.aggregator.summary(),
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::PacingMode;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cipdip_capture::ServerPorts;
    use cipdip_core::MacAddr;
    use cipdip_packet::{EtherType, PacketBuilder, LINKTYPE_ETHERNET};
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send(&mut self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct Silent;

    #[async_trait]
    impl LinkProbe for Silent {
        async fn probe(&self, _target: Ipv4Addr, _timeout: Duration) -> Result<Option<MacAddr>> {
            Ok(None)
        }

        fn interface_name(&self) -> &str {
            "test0"
        }
    }

    fn frame(src_port: u16, dst_port: u16, seq: u64) -> FrameRecord {
        let raw = PacketBuilder::new()
            .ethernet(MacAddr::new([2, 0, 0, 0, 0, 1]), MacAddr::new([2, 0, 0, 0, 0, 2]), EtherType::IPv4)
            .ipv4(Ipv4Addr::new(192, 168, 1, 10), SERVER)
            .tcp(src_port, dst_port, 1, 1, 0x18)
            .payload(vec![0; 24])
            .build()
            .unwrap();
        FrameRecord::new(seq, Duration::ZERO, Bytes::from(raw), 0, LINKTYPE_ETHERNET, &ServerPorts::default())
    }

    fn config() -> ReplayConfig {
        ReplayConfig {
            input: Some(PathBuf::from("unused.pcap")),
            pacing: PacingMode::Burst,
            ..Default::default()
        }
    }

    fn components(probe: Option<Arc<dyn LinkProbe>>) -> ReplayComponents {
        ReplayComponents {
            probe,
            sink: Box::new(NullSink),
            tap: None,
        }
    }

    #[tokio::test]
    async fn test_responses_filtered_by_default() {
        let frames = vec![frame(51000, 44818, 0), frame(44818, 51000, 1), frame(51000, 44818, 2)];

        let engine = ReplayEngine::new(config()).unwrap();
        let report = engine.run(frames.clone(), components(None)).await;
        assert_eq!(report.stats.frames_planned, 2);
        assert_eq!(report.stats.state, RunState::Completed);

        let engine = ReplayEngine::new(ReplayConfig {
            include_responses: true,
            ..config()
        })
        .unwrap();
        assert_eq!(engine.run(frames, components(None)).await.stats.frames_sent, 3);
    }

    #[tokio::test]
    async fn test_required_resolution_failure_aborts_before_sending() {
        let engine = ReplayEngine::new(ReplayConfig {
            server_ip: Some(SERVER),
            arp_required: true,
            arp_timeout_ms: 10,
            arp_retries: 0,
            ..config()
        })
        .unwrap();
        let report = engine.run(vec![frame(51000, 44818, 0)], components(Some(Arc::new(Silent)))).await;

        assert!(matches!(report.failure, Some(Error::TargetUnreachable { .. })));
        assert_eq!(report.stats.state, RunState::Aborted);
        assert_eq!(report.stats.frames_sent, 0);
        assert_eq!(report.stats.resolution_failures, 1);
    }

    #[tokio::test]
    async fn test_optional_resolution_uses_fallback_mac() {
        let fallback = MacAddr::new([0x02, 0xfa, 0x11, 0xba, 0xc4, 0x00]);
        let engine = ReplayEngine::new(ReplayConfig {
            server_ip: Some(SERVER),
            arp_timeout_ms: 10,
            arp_retries: 0,
            arp_fallback_mac: Some(fallback),
            ..config()
        })
        .unwrap();
        let report = engine.run(vec![frame(51000, 44818, 0)], components(Some(Arc::new(Silent)))).await;

        assert!(report.is_success());
        let resolution = report.stats.resolution.unwrap();
        assert_eq!(resolution.mac, fallback);
        assert_eq!(resolution.source, BindingSource::Fallback);
        assert_eq!(report.stats.frames_sent, 1);
    }

    #[tokio::test]
    async fn test_unsupported_rewrite_reported_before_sending() {
        let full = frame(51000, 44818, 0);
        let snapped = FrameRecord::new(
            0,
            Duration::ZERO,
            full.raw.slice(..40),
            full.raw.len() as u32,
            LINKTYPE_ETHERNET,
            &ServerPorts::default(),
        );
        let mut config = config();
        config.rewrite.dst_port = Some(44819);

        let report = ReplayEngine::new(config)
            .unwrap()
            .run(vec![snapped], components(None))
            .await;
        assert!(matches!(report.failure, Some(Error::UnsupportedRewrite(_))));
        assert_eq!(report.stats.frames_planned, 0);
        assert_eq!(report.stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_unsendable_frame_past_limit_is_ignored() {
        let full = frame(51000, 44818, 1);
        let snapped = FrameRecord::new(
            1,
            Duration::ZERO,
            full.raw.slice(..40),
            full.raw.len() as u32,
            LINKTYPE_ETHERNET,
            &ServerPorts::default(),
        );
        let mut config = config();
        config.rewrite.dst_port = Some(44819);
        config.limit = Some(1);

        let report = ReplayEngine::new(config)
            .unwrap()
            .run(vec![frame(51000, 44818, 0), snapped], components(None))
            .await;
        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.stats.frames_planned, 1);
        assert_eq!(report.stats.frames_sent, 1);
        assert_eq!(report.stats.frames_rewritten, 1);
    }

    #[tokio::test]
    async fn test_missing_input_aborts_with_io_error() {
        let engine = ReplayEngine::new(config()).unwrap();
        let report = engine.execute(components(None)).await;
        assert!(matches!(report.failure, Some(Error::Io(_))));
        assert_eq!(report.stats.state, RunState::Aborted);
    }
}
