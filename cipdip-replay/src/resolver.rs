//! Liveness resolution of the replay target
//!
//! [`LivenessResolver`] races one ARP probe per attempt against a fixed
//! timeout and retries a bounded number of times with no backoff. The probe
//! itself is behind [`LinkProbe`] so tests can script answers without a NIC.

use crate::binding::{BindingSource, TargetBinding};
use async_trait::async_trait;
use cipdip_core::{Error, Interface, MacAddr, Result};
use cipdip_packet::arp;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default binding lifetime when no refresh interval is configured
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Upper bound on one blocking receive call inside a probe
const RECEIVE_SLICE: Duration = Duration::from_millis(50);

/// One link-layer address request
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// Ask for `target`'s MAC and wait at most `timeout` for the answer
    ///
    /// `Ok(None)` means nobody answered in time.
    async fn probe(&self, target: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>>;

    /// Interface the probe is sent on
    fn interface_name(&self) -> &str;
}

/// Bounded, fast-fail target resolution
#[derive(Clone)]
pub struct LivenessResolver {
    probe: Arc<dyn LinkProbe>,
    timeout: Duration,
    retries: u32,
    stale_after: Duration,
}

impl LivenessResolver {
    pub fn new(probe: Arc<dyn LinkProbe>, timeout: Duration, retries: u32) -> Self {
        Self {
            probe,
            timeout,
            retries,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Lifetime stamped on bindings this resolver produces
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Attempts made before giving up
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Worst-case time spent in [`resolve`](Self::resolve)
    pub fn max_wait(&self) -> Duration {
        self.timeout.saturating_mul(self.attempts())
    }

    pub fn interface_name(&self) -> &str {
        self.probe.interface_name()
    }

    /// Resolve `target` to a fresh binding
    ///
    /// Fails with [`Error::TargetUnreachable`] after `retries + 1` silent
    /// attempts. Probe I/O errors are returned as-is without retrying.
    pub async fn resolve(&self, target: Ipv4Addr) -> Result<TargetBinding> {
        let attempts = self.attempts();

        for attempt in 1..=attempts {
            trace!(%target, attempt, "ARP probe");
            match tokio::time::timeout(self.timeout, self.probe.probe(target, self.timeout)).await {
                Ok(Ok(Some(mac))) => {
                    info!(
                        %target,
                        %mac,
                        interface = %self.probe.interface_name(),
                        attempt,
                        "Target resolved"
                    );
                    return Ok(TargetBinding::new(
                        target,
                        mac,
                        self.probe.interface_name(),
                        self.stale_after,
                        BindingSource::Arp,
                    ));
                }
                Ok(Ok(None)) | Err(_) => {
                    debug!(%target, attempt, attempts, "No ARP reply");
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        warn!(%target, attempts, "Target unreachable");
        Err(Error::TargetUnreachable { target, attempts })
    }
}

/// ARP over a pnet datalink channel
///
/// Each probe opens its own channel, so it never shares a handle with the
/// transmitter's sender.
#[derive(Debug, Clone)]
pub struct PnetArpProbe {
    interface: Interface,
    sender_ip: Option<Ipv4Addr>,
}

impl PnetArpProbe {
    pub fn new(interface: Interface) -> Self {
        Self {
            interface,
            sender_ip: None,
        }
    }

    /// Sender protocol address for requests; defaults to the interface's IPv4
    pub fn with_sender_ip(mut self, sender_ip: Ipv4Addr) -> Self {
        self.sender_ip = Some(sender_ip);
        self
    }

    fn probe_blocking(
        interface: &Interface,
        sender_ip: Option<Ipv4Addr>,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<MacAddr>> {
        let (mut tx, mut rx) = interface.open_channel(Some(timeout.min(RECEIVE_SLICE)))?;
        let sender_ip = sender_ip
            .or_else(|| interface.ipv4())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let request = arp::request_frame(interface.mac_address, sender_ip, target);

        match tx.send_to(&request, None) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(Error::Io(e)),
            None => return Err(Error::Interface(format!("Send buffer full on {}", interface.name))),
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match rx.next() {
                Ok(frame) => {
                    if let Some(mac) = arp::reply_mac(frame, target) {
                        return Ok(Some(mac));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl LinkProbe for PnetArpProbe {
    async fn probe(&self, target: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>> {
        let interface = self.interface.clone();
        let sender_ip = self.sender_ip;
        tokio::task::spawn_blocking(move || Self::probe_blocking(&interface, sender_ip, target, timeout))
            .await
            .map_err(|e| Error::Interface(format!("ARP probe task failed: {}", e)))?
    }

    fn interface_name(&self) -> &str {
        &self.interface.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const TARGET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 20);
    const MAC: MacAddr = MacAddr::new([0x00, 0x1d, 0x9c, 0xaa, 0xbb, 0xcc]);

    /// Answers from a script; an exhausted script never answers
    struct Scripted {
        answers: Mutex<VecDeque<Result<Option<MacAddr>>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Option<MacAddr>>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LinkProbe for Scripted {
        async fn probe(&self, _target: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>> {
            *self.calls.lock() += 1;
            let next = self.answers.lock().pop_front();
            match next {
                Some(answer) => answer,
                None => {
                    tokio::time::sleep(timeout * 10).await;
                    Ok(None)
                }
            }
        }

        fn interface_name(&self) -> &str {
            "test0"
        }
    }

    #[tokio::test]
    async fn test_first_attempt_answers() {
        let probe = Arc::new(Scripted::new(vec![Ok(Some(MAC))]));
        let resolver = LivenessResolver::new(probe.clone(), Duration::from_millis(50), 2);

        let binding = resolver.resolve(TARGET).await.unwrap();
        assert_eq!(binding.resolved_mac, MAC);
        assert_eq!(binding.interface_name, "test0");
        assert_eq!(binding.source, BindingSource::Arp);
        assert_eq!(*probe.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_silence() {
        let probe = Arc::new(Scripted::new(vec![Ok(None), Ok(None), Ok(Some(MAC))]));
        let resolver = LivenessResolver::new(probe.clone(), Duration::from_millis(20), 2);

        assert_eq!(resolver.resolve(TARGET).await.unwrap().resolved_mac, MAC);
        assert_eq!(*probe.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_bounded() {
        let probe = Arc::new(Scripted::new(vec![]));
        let resolver = LivenessResolver::new(probe.clone(), Duration::from_millis(30), 1);
        assert_eq!(resolver.max_wait(), Duration::from_millis(60));

        let started = Instant::now();
        let err = resolver.resolve(TARGET).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::TargetUnreachable { target, attempts: 2 } if target == TARGET));
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(500));
        assert_eq!(*probe.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_probe_error_is_not_retried() {
        let probe = Arc::new(Scripted::new(vec![Err(Error::Interface("down".into()))]));
        let resolver = LivenessResolver::new(probe.clone(), Duration::from_millis(20), 3);

        assert!(matches!(resolver.resolve(TARGET).await, Err(Error::Interface(_))));
        assert_eq!(*probe.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_stale_after_is_stamped() {
        let probe = Arc::new(Scripted::new(vec![Ok(Some(MAC))]));
        let resolver = LivenessResolver::new(probe, Duration::from_millis(20), 0)
            .with_stale_after(Duration::from_millis(250));
        assert_eq!(resolver.resolve(TARGET).await.unwrap().stale_after, Duration::from_millis(250));
    }
}
