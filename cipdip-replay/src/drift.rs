//! Drift monitoring during a run
//!
//! Re-resolves the target on a fixed interval and compares the answer with
//! the current binding. What happens on a mismatch is decided by
//! [`DriftPolicy`]: rebind, abort, or only record it.

use crate::binding::BindingCell;
use crate::report::{ReportAggregator, ResolutionRecord, RunEvent};
use crate::resolver::LivenessResolver;
use cipdip_core::{Error, MacAddr, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftPolicy {
    pub interval: Duration,
    /// Install the new binding and keep going
    pub auto_rewrite: bool,
    /// Abort the run on drift, or on a failed re-resolution when
    /// `auto_rewrite` is also set
    pub drift_fail: bool,
}

pub struct DriftMonitor {
    resolver: LivenessResolver,
    target: Ipv4Addr,
    bindings: BindingCell,
    aggregator: Arc<ReportAggregator>,
    policy: DriftPolicy,
}

impl DriftMonitor {
    pub fn new(
        resolver: LivenessResolver,
        target: Ipv4Addr,
        bindings: BindingCell,
        aggregator: Arc<ReportAggregator>,
        policy: DriftPolicy,
    ) -> Self {
        Self {
            resolver,
            target,
            bindings,
            aggregator,
            policy,
        }
    }

    /// Tick until `cancel` fires or a fatal drift is seen
    ///
    /// On a fatal outcome the token is cancelled before returning so the
    /// send loop stops at its next frame.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let result = self.watch(&cancel).await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    }

    async fn watch(&self, cancel: &CancellationToken) -> Result<()> {
        info!(
            target = %self.target,
            interval_ms = self.policy.interval.as_millis() as u64,
            auto_rewrite = self.policy.auto_rewrite,
            drift_fail = self.policy.drift_fail,
            "Drift monitor started"
        );

        // Last unbound MAC already reported, so one change counts once
        let mut reported: Option<MacAddr> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Drift monitor stopped");
                    return Ok(());
                }
                _ = sleep(self.policy.interval) => {}
            }

            let fresh = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                fresh = self.resolver.resolve(self.target) => fresh,
            };

            match fresh {
                Ok(binding) => {
                    let Some(current) = self.bindings.current() else {
                        info!(target = %self.target, mac = %binding.resolved_mac, "Target bound by drift monitor");
                        self.aggregator.record(RunEvent::Resolved(ResolutionRecord::from(&binding)));
                        self.bindings.replace(binding);
                        continue;
                    };
                    if current.resolved_mac == binding.resolved_mac {
                        reported = None;
                        continue;
                    }

                    let previous = current.resolved_mac;
                    let new_mac = binding.resolved_mac;
                    if self.policy.auto_rewrite {
                        warn!(target = %self.target, %previous, current = %new_mac, "Target drifted, rebinding");
                        self.aggregator.record(RunEvent::Resolved(ResolutionRecord::from(&binding)));
                        self.bindings.replace(binding);
                        self.aggregator.record(RunEvent::DriftDetected {
                            previous,
                            current: new_mac,
                            rebound: true,
                        });
                        continue;
                    }

                    if reported == Some(new_mac) {
                        continue;
                    }
                    reported = Some(new_mac);
                    warn!(target = %self.target, %previous, current = %new_mac, "Target drifted");
                    self.aggregator.record(RunEvent::DriftDetected {
                        previous,
                        current: new_mac,
                        rebound: false,
                    });
                    if self.policy.drift_fail {
                        return Err(Error::TargetDrifted {
                            previous,
                            current: Some(new_mac),
                        });
                    }
                }
                Err(e) => {
                    warn!(target = %self.target, error = %e, "Re-resolution failed");
                    self.aggregator.record(RunEvent::ResolutionFailed {
                        target: self.target,
                        reason: e.to_string(),
                    });
                    if !(self.policy.auto_rewrite && self.policy.drift_fail) {
                        continue;
                    }
                    if let Some(current) = self.bindings.current() {
                        return Err(Error::TargetDrifted {
                            previous: current.resolved_mac,
                            current: None,
                        });
                    }
                }
            }
        }
    }
}
