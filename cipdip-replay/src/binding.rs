//! Current target binding
//!
//! A [`TargetBinding`] is immutable. The drift monitor installs a new one by
//! swapping it into the [`BindingCell`]; the send loop reads whichever binding
//! is current when it rewrites a frame, so a frame never sees a mix of two.

use chrono::{DateTime, Utc};
use cipdip_core::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How a binding's MAC was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// ARP reply on the egress interface
    Arp,
    /// Operator-supplied MAC after resolution failed with ARP optional
    Fallback,
}

/// Result of resolving the live target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBinding {
    pub target_ip: Ipv4Addr,
    pub resolved_mac: MacAddr,
    pub resolved_at: DateTime<Utc>,
    pub interface_name: String,
    /// Age after which the binding should be refreshed
    pub stale_after: Duration,
    pub source: BindingSource,
}

impl TargetBinding {
    pub fn new(
        target_ip: Ipv4Addr,
        resolved_mac: MacAddr,
        interface_name: impl Into<String>,
        stale_after: Duration,
        source: BindingSource,
    ) -> Self {
        Self {
            target_ip,
            resolved_mac,
            resolved_at: Utc::now(),
            interface_name: interface_name.into(),
            stale_after,
            source,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::MAX);
        self.resolved_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Holder of the one current binding
#[derive(Debug, Clone)]
pub struct BindingCell {
    tx: Arc<watch::Sender<Option<Arc<TargetBinding>>>>,
}

impl BindingCell {
    pub fn new(initial: Option<TargetBinding>) -> Self {
        let (tx, _rx) = watch::channel(initial.map(Arc::new));
        Self { tx: Arc::new(tx) }
    }

    /// The binding in force right now
    pub fn current(&self) -> Option<Arc<TargetBinding>> {
        self.tx.borrow().clone()
    }

    /// Install `binding`, returning the one it replaced
    pub fn replace(&self, binding: TargetBinding) -> Option<Arc<TargetBinding>> {
        self.tx.send_replace(Some(Arc::new(binding)))
    }

    /// Observe binding changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TargetBinding>>> {
        self.tx.subscribe()
    }
}
