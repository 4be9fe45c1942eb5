//! CLI argument parsing
//!
//! Flags map one-to-one onto [`ReplayConfig`]; [`Cli::into_config`] does the
//! translation and runs the static checks so bad flag combinations fail
//! before any capture is read or interface opened.

use cipdip_capture::ServerPorts;
use cipdip_core::{Error, MacAddr, Result};
use cipdip_replay::config::{DEFAULT_ARP_RETRIES, DEFAULT_ARP_TIMEOUT_MS, DEFAULT_PRESET_DIR};
use cipdip_replay::pacing::DEFAULT_MAX_GAP;
use cipdip_replay::{MutationPolicy, PacingMode, ReplayConfig, ReplayMode, RewritePolicy};
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cipdip")]
#[command(version, about = "Replay CIP/ENIP captures against a live target", long_about = None)]
pub struct Cli {
    /// Capture file to replay (pcap or pcapng)
    #[arg(long, value_name = "PATH", required_unless_present_any = ["preset", "list_interfaces"])]
    pub input: Option<PathBuf>,

    /// Named capture under --preset-dir
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Directory holding preset captures
    #[arg(long, value_name = "DIR", default_value = DEFAULT_PRESET_DIR)]
    pub preset_dir: PathBuf,

    /// Replay mode
    #[arg(long, value_enum, default_value_t = ModeArg::Raw)]
    pub mode: ModeArg,

    /// Live server address; default ARP target
    #[arg(long, value_name = "IP")]
    pub server_ip: Option<Ipv4Addr>,

    /// Explicit messaging port
    #[arg(long, value_name = "PORT", default_value_t = ServerPorts::default().explicit)]
    pub server_port: u16,

    /// Implicit I/O port
    #[arg(long, value_name = "PORT", default_value_t = ServerPorts::default().implicit_io)]
    pub udp_port: u16,

    /// Local address used as the ARP sender
    #[arg(long, value_name = "IP")]
    pub client_ip: Option<Ipv4Addr>,

    /// Egress interface (detected from the target's subnet when omitted)
    #[arg(short = 'I', long = "iface", value_name = "NAME")]
    pub interface: Option<String>,

    /// Send frames at a fixed interval
    #[arg(long, value_name = "MS", conflicts_with = "realtime")]
    pub interval_ms: Option<u64>,

    /// Reproduce the capture's own timing
    #[arg(long)]
    pub realtime: bool,

    /// Divide captured gaps by this factor
    #[arg(long, value_name = "FACTOR", requires = "realtime")]
    pub realtime_scale: Option<f64>,

    /// Longest single gap in realtime mode
    #[arg(long, value_name = "MS", requires = "realtime")]
    pub max_gap_ms: Option<u64>,

    /// Also replay server-to-client frames and count live responses
    #[arg(long)]
    pub include_responses: bool,

    /// Replay at most this many frames
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Write a report file (Markdown if it ends in .md)
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Resolve the target and stop without sending
    #[arg(long)]
    pub preflight_only: bool,

    /// Directory for run artifacts
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Address to resolve before sending
    #[arg(long, value_name = "IP")]
    pub arp_target: Option<Ipv4Addr>,

    #[arg(long, value_name = "MS", default_value_t = DEFAULT_ARP_TIMEOUT_MS)]
    pub arp_timeout_ms: u64,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_ARP_RETRIES)]
    pub arp_retries: u32,

    /// Abort when the target does not answer
    #[arg(long)]
    pub arp_required: bool,

    /// MAC to use when resolution fails
    #[arg(long, value_name = "MAC")]
    pub arp_fallback_mac: Option<MacAddr>,

    /// Re-bind to the target's new MAC when it changes mid-run
    #[arg(long)]
    pub arp_auto_rewrite: bool,

    /// Drift check interval, 0 disables
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub arp_refresh_ms: u64,

    /// Abort when the target's MAC changes mid-run
    #[arg(long)]
    pub arp_drift_fail: bool,

    #[arg(long, value_name = "IP")]
    pub rewrite_src_ip: Option<IpAddr>,

    #[arg(long, value_name = "IP")]
    pub rewrite_dst_ip: Option<IpAddr>,

    #[arg(long, value_name = "PORT")]
    pub rewrite_src_port: Option<u16>,

    #[arg(long, value_name = "PORT")]
    pub rewrite_dst_port: Option<u16>,

    #[arg(long, value_name = "MAC")]
    pub rewrite_src_mac: Option<MacAddr>,

    #[arg(long, value_name = "MAC")]
    pub rewrite_dst_mac: Option<MacAddr>,

    /// Only rewrite frames carrying ENIP
    #[arg(long)]
    pub rewrite_only_enip: bool,

    /// Corrupt application bytes in this fraction of frames
    #[arg(long, value_name = "RATE")]
    pub mutate_rate: Option<f64>,

    #[arg(long, value_name = "SEED", requires = "mutate_rate")]
    pub mutate_seed: Option<u64>,

    /// Repair transport checksums after corrupting
    #[arg(long, requires = "mutate_rate")]
    pub mutate_fix_checksums: bool,

    /// List usable interfaces and exit
    #[arg(long)]
    pub list_interfaces: bool,

    /// Verbose output (-v, -vv, -vvv for increasing verbosity)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Raw,
    App,
    Tcpreplay,
}

impl From<ModeArg> for ReplayMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Raw => ReplayMode::Raw,
            ModeArg::App => ReplayMode::App,
            ModeArg::Tcpreplay => ReplayMode::Tcpreplay,
        }
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pacing(&self) -> Result<PacingMode> {
        match (self.interval_ms, self.realtime) {
            (Some(_), true) => Err(Error::invalid_parameter(
                "interval-ms",
                "--interval-ms and --realtime are mutually exclusive",
            )),
            (Some(interval_ms), false) => Ok(PacingMode::Fixed { interval_ms }),
            (None, true) => Ok(PacingMode::Realtime {
                scale: self.realtime_scale.unwrap_or(1.0),
                max_gap_ms: self.max_gap_ms.unwrap_or(DEFAULT_MAX_GAP.as_millis() as u64),
            }),
            (None, false) => Ok(PacingMode::Burst),
        }
    }

    pub fn rewrite_policy(&self) -> RewritePolicy {
        RewritePolicy {
            src_ip: self.rewrite_src_ip,
            dst_ip: self.rewrite_dst_ip,
            src_port: self.rewrite_src_port,
            dst_port: self.rewrite_dst_port,
            src_mac: self.rewrite_src_mac,
            dst_mac: self.rewrite_dst_mac,
            enip_only: self.rewrite_only_enip,
        }
    }

    /// Translate and validate
    pub fn into_config(&self) -> Result<ReplayConfig> {
        let config = ReplayConfig {
            input: self.input.clone(),
            preset: self.preset.clone(),
            preset_dir: self.preset_dir.clone(),
            mode: self.mode.into(),
            server_ip: self.server_ip,
            server_port: self.server_port,
            udp_port: self.udp_port,
            client_ip: self.client_ip,
            interface: self.interface.clone(),
            pacing: self.pacing()?,
            include_responses: self.include_responses,
            limit: self.limit,
            preflight_only: self.preflight_only,
            arp_target: self.arp_target,
            arp_timeout_ms: self.arp_timeout_ms,
            arp_retries: self.arp_retries,
            arp_required: self.arp_required,
            arp_fallback_mac: self.arp_fallback_mac,
            arp_refresh_ms: self.arp_refresh_ms,
            arp_auto_rewrite: self.arp_auto_rewrite,
            arp_drift_fail: self.arp_drift_fail,
            rewrite: self.rewrite_policy(),
            mutation: self.mutate_rate.map(|rate| MutationPolicy {
                rate,
                seed: self.mutate_seed,
                fix_checksums: self.mutate_fix_checksums,
            }),
        };
        config.validate()?;
        Ok(config)
    }
}
