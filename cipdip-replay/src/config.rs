//! Replay configuration
//!
//! One struct carries every setting a run needs. It is built by the CLI,
//! checked once by [`ReplayConfig::validate`] and echoed into the run summary.

use crate::drift::DriftPolicy;
use crate::mutate::MutationPolicy;
use crate::pacing::PacingMode;
use crate::rewrite::RewritePolicy;
use cipdip_capture::{filters, ServerPorts};
use cipdip_core::{Error, MacAddr, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ARP_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_ARP_RETRIES: u32 = 2;
pub const MAX_ARP_RETRIES: u32 = 10;
pub const DEFAULT_PRESET_DIR: &str = "pcaps";

/// Replay variants the CLI accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Frame-for-frame replay of the capture
    #[default]
    Raw,
    /// Regenerate application traffic from the capture
    App,
    /// Hand the capture to an external replay tool
    Tcpreplay,
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayMode::Raw => write!(f, "raw"),
            ReplayMode::App => write!(f, "app"),
            ReplayMode::Tcpreplay => write!(f, "tcpreplay"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub input: Option<PathBuf>,
    pub preset: Option<String>,
    pub preset_dir: PathBuf,
    pub mode: ReplayMode,

    /// Live server; default ARP target and response filter host
    pub server_ip: Option<Ipv4Addr>,
    pub server_port: u16,
    pub udp_port: u16,
    /// Sender address used in ARP requests
    pub client_ip: Option<Ipv4Addr>,
    pub interface: Option<String>,

    pub pacing: PacingMode,
    pub include_responses: bool,
    pub limit: Option<usize>,
    pub preflight_only: bool,

    pub arp_target: Option<Ipv4Addr>,
    pub arp_timeout_ms: u64,
    pub arp_retries: u32,
    pub arp_required: bool,
    /// MAC used when resolution fails and is not required
    pub arp_fallback_mac: Option<MacAddr>,

    /// Drift monitor interval; 0 disables it
    pub arp_refresh_ms: u64,
    pub arp_auto_rewrite: bool,
    pub arp_drift_fail: bool,

    pub rewrite: RewritePolicy,
    pub mutation: Option<MutationPolicy>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        let ports = ServerPorts::default();
        Self {
            input: None,
            preset: None,
            preset_dir: PathBuf::from(DEFAULT_PRESET_DIR),
            mode: ReplayMode::Raw,
            server_ip: None,
            server_port: ports.explicit,
            udp_port: ports.implicit_io,
            client_ip: None,
            interface: None,
            pacing: PacingMode::default(),
            include_responses: false,
            limit: None,
            preflight_only: false,
            arp_target: None,
            arp_timeout_ms: DEFAULT_ARP_TIMEOUT_MS,
            arp_retries: DEFAULT_ARP_RETRIES,
            arp_required: false,
            arp_fallback_mac: None,
            arp_refresh_ms: 0,
            arp_auto_rewrite: false,
            arp_drift_fail: false,
            rewrite: RewritePolicy::default(),
            mutation: None,
        }
    }
}

impl ReplayConfig {
    /// Every check that can be made without touching the capture or network
    pub fn validate(&self) -> Result<()> {
        if self.mode != ReplayMode::Raw {
            return Err(Error::NotImplemented(format!("--mode {} is not handled by the replay engine", self.mode)));
        }

        if self.input.is_none() && self.preset.is_none() {
            return Err(Error::invalid_parameter("input", "either --input or --preset is required"));
        }

        if self.arp_timeout_ms == 0 {
            return Err(Error::invalid_parameter("arp-timeout-ms", "must be greater than 0"));
        }
        if self.arp_retries > MAX_ARP_RETRIES {
            return Err(Error::invalid_parameter(
                "arp-retries",
                format!("{} exceeds the maximum of {}", self.arp_retries, MAX_ARP_RETRIES),
            ));
        }
        if (self.arp_auto_rewrite || self.arp_drift_fail) && self.arp_refresh_ms == 0 {
            return Err(Error::invalid_parameter(
                "arp-refresh-ms",
                "--arp-auto-rewrite and --arp-drift-fail need a refresh interval",
            ));
        }
        if self.preflight_only && self.arp_target().is_none() {
            return Err(Error::invalid_parameter(
                "preflight-only",
                "needs --arp-target, --server-ip or an IPv4 --rewrite-dst-ip",
            ));
        }
        if self.arp_required && self.arp_target().is_none() {
            return Err(Error::invalid_parameter("arp-required", "no ARP target could be determined"));
        }

        if let PacingMode::Realtime { scale, .. } = self.pacing {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(Error::invalid_parameter("realtime-scale", "must be a positive number"));
            }
        }

        if self.server_port == 0 {
            return Err(Error::invalid_parameter("server-port", "cannot be 0"));
        }
        if self.udp_port == 0 {
            return Err(Error::invalid_parameter("udp-port", "cannot be 0"));
        }

        if let Some(mutation) = &self.mutation {
            mutation.validate()?;
        }
        self.rewrite.validate()
    }

    /// Capture file this run replays
    ///
    /// `--input` wins over `--preset`. A preset names `<preset_dir>/<name>.pcap`
    /// or, failing that, `.pcapng`.
    pub fn resolve_input(&self) -> Result<PathBuf> {
        if let Some(input) = &self.input {
            if let Some(preset) = &self.preset {
                warn!(input = %input.display(), preset = %preset, "Both --input and --preset given, using --input");
            }
            return Ok(input.clone());
        }

        let preset = self
            .preset
            .as_deref()
            .ok_or_else(|| Error::invalid_parameter("input", "either --input or --preset is required"))?;
        preset_path(&self.preset_dir, preset)
    }

    /// Address resolved before and during the run
    pub fn arp_target(&self) -> Option<Ipv4Addr> {
        self.arp_target
            .or(match self.rewrite.dst_ip {
                Some(IpAddr::V4(addr)) => Some(addr),
                _ => None,
            })
            .or(self.server_ip)
    }

    /// Host that answers the replayed requests: the rewritten destination,
    /// else the captured server, else the ARP target
    pub fn live_server(&self) -> Option<Ipv4Addr> {
        match self.rewrite.dst_ip {
            Some(IpAddr::V4(addr)) => Some(addr),
            _ => self.server_ip.or(self.arp_target),
        }
    }

    /// BPF filter matching replies from the live server
    pub fn response_filter(&self) -> String {
        filters::response_filter(
            self.live_server(),
            self.rewrite.dst_port.unwrap_or(self.server_port),
            self.udp_port,
        )
    }

    pub fn server_ports(&self) -> ServerPorts {
        ServerPorts {
            explicit: self.server_port,
            implicit_io: self.udp_port,
        }
    }

    pub fn arp_timeout(&self) -> Duration {
        Duration::from_millis(self.arp_timeout_ms)
    }

    /// Drift monitoring settings, if a refresh interval is set
    pub fn drift_policy(&self) -> Option<DriftPolicy> {
        (self.arp_refresh_ms > 0).then(|| DriftPolicy {
            interval: Duration::from_millis(self.arp_refresh_ms),
            auto_rewrite: self.arp_auto_rewrite,
            drift_fail: self.arp_drift_fail,
        })
    }
}

fn preset_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::invalid_parameter("preset", format!("'{}' is not a preset name", name)));
    }

    ["pcap", "pcapng"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", name, ext)))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            Error::invalid_parameter("preset", format!("no capture named '{}' in {}", name, dir.display()))
        })
}
