//! Checksum-preserving address rewriting
//!
//! The rewriter substitutes MAC, IPv4 and port fields and repairs every
//! checksum those fields feed. It never touches application bytes or any
//! length field. Requests are rewritten as configured; responses get the
//! source and destination roles swapped so the server stays on one side.

use crate::binding::TargetBinding;
use cipdip_capture::{Direction, FrameRecord};
use cipdip_core::{Error, MacAddr, Result};
use cipdip_packet::checksum::incremental_update;
use cipdip_packet::transport::{self, TransportKind};
use cipdip_packet::{enip, ethernet, ipv4};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use tracing::trace;

/// Replacement addressing for replayed frames
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewritePolicy {
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    /// Only rewrite frames whose payload starts with an ENIP header
    #[serde(default)]
    pub enip_only: bool,
}

impl RewritePolicy {
    /// No field is replaced
    pub fn is_empty(&self) -> bool {
        self.src_ip.is_none()
            && self.dst_ip.is_none()
            && self.src_port.is_none()
            && self.dst_port.is_none()
            && self.src_mac.is_none()
            && self.dst_mac.is_none()
    }

    fn touches_network_layer(&self) -> bool {
        self.src_ip.is_some() || self.dst_ip.is_some() || self.src_port.is_some() || self.dst_port.is_some()
    }

    /// Static checks that need no capture
    pub fn validate(&self) -> Result<()> {
        for (name, ip) in [("rewrite-src-ip", self.src_ip), ("rewrite-dst-ip", self.dst_ip)] {
            if let Some(IpAddr::V6(addr)) = ip {
                return Err(Error::unsupported_rewrite(format!(
                    "{} {} is IPv6; replayed traffic is IPv4",
                    name, addr
                )));
            }
        }
        for (name, port) in [("rewrite-src-port", self.src_port), ("rewrite-dst-port", self.dst_port)] {
            if port == Some(0) {
                return Err(Error::unsupported_rewrite(format!("{} cannot be 0", name)));
            }
        }
        Ok(())
    }
}

fn v4(ip: Option<IpAddr>) -> Option<Ipv4Addr> {
    match ip {
        Some(IpAddr::V4(addr)) => Some(addr),
        _ => None,
    }
}

/// Replacement fields in the frame's own orientation
#[derive(Debug, Clone, Copy, Default)]
struct Substitution {
    src_ip: Option<Ipv4Addr>,
    dst_ip: Option<Ipv4Addr>,
    src_port: Option<u16>,
    dst_port: Option<u16>,
    src_mac: Option<MacAddr>,
    dst_mac: Option<MacAddr>,
}

/// Applies a validated [`RewritePolicy`]
#[derive(Debug, Clone)]
pub struct Rewriter {
    policy: RewritePolicy,
}

impl Rewriter {
    pub fn new(policy: RewritePolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &RewritePolicy {
        &self.policy
    }

    /// Reject frames this policy cannot rewrite without corrupting them
    ///
    /// Runs over the whole plan before anything is sent.
    pub fn check(&self, frames: &[FrameRecord]) -> Result<()> {
        if !self.policy.touches_network_layer() {
            return Ok(());
        }
        frames
            .iter()
            .filter(|record| self.applies_to(record))
            .try_for_each(check_frame)
    }

    /// Rewrite one frame against the current binding
    ///
    /// Returns a new record; `record` is never modified. A frame the policy
    /// does not select comes back byte-identical.
    pub fn rewrite(&self, record: &FrameRecord, binding: Option<&TargetBinding>) -> Result<FrameRecord> {
        if self.policy.is_empty() || !self.applies_to(record) {
            return Ok(record.clone());
        }
        if self.policy.touches_network_layer() {
            check_frame(record)?;
        }

        let sub = self.orient(record.direction, binding);
        let mut raw = record.raw.to_vec();
        let mut changed = false;

        if record.layers.ethernet.is_some() {
            if let Some(mac) = sub.dst_mac.filter(|mac| ethernet::destination(&raw) != Some(*mac)) {
                ethernet::set_destination(&mut raw, mac);
                changed = true;
            }
            if let Some(mac) = sub.src_mac.filter(|mac| ethernet::source(&raw) != Some(*mac)) {
                ethernet::set_source(&mut raw, mac);
                changed = true;
            }
        }

        let Some(ip_span) = record.layers.ip else {
            return Ok(finish(record, raw, changed));
        };
        let Some(ip) = ipv4::parse(&raw[ip_span.offset..]) else {
            return Ok(finish(record, raw, changed));
        };

        let new_src = sub.src_ip.unwrap_or(ip.source);
        let new_dst = sub.dst_ip.unwrap_or(ip.destination);
        let ip_changed = new_src != ip.source || new_dst != ip.destination;
        if ip_changed {
            let header = &mut raw[ip_span.range()];
            ipv4::set_source(header, new_src);
            ipv4::set_destination(header, new_dst);
            ipv4::recompute_checksum(header);
            changed = true;
        }

        let Some((kind, span)) = record.layers.transport else {
            return Ok(finish(record, raw, changed));
        };
        let Some(view) = raw.get(span.range()).and_then(|header| transport::parse(kind, header)) else {
            return Ok(finish(record, raw, changed));
        };

        let new_sport = sub.src_port.unwrap_or(view.source_port);
        let new_dport = sub.dst_port.unwrap_or(view.destination_port);
        let ports_changed = new_sport != view.source_port || new_dport != view.destination_port;
        if ports_changed {
            let header = &mut raw[span.range()];
            transport::set_source_port(header, new_sport);
            transport::set_destination_port(header, new_dport);
            changed = true;
        }

        if ip_changed || ports_changed {
            let complete = !record.layers.truncated && !record.layers.fragmented && !record.is_snap_truncated();
            if complete {
                if let Some(segment) = record.layers.segment_range() {
                    transport::recompute_checksum(kind, new_src, new_dst, &mut raw[segment]);
                }
            } else {
                let old = pseudo_fields(ip.source, ip.destination, view.source_port, view.destination_port);
                let new = pseudo_fields(new_src, new_dst, new_sport, new_dport);
                patch_checksum(&mut raw, kind, span.offset, &old, &new);
            }
        }

        trace!(frame = record.sequence_index, ip_changed, ports_changed, "Frame rewritten");
        Ok(finish(record, raw, changed))
    }

    fn applies_to(&self, record: &FrameRecord) -> bool {
        !self.policy.enip_only || record.application_payload().is_some_and(enip::matches_signature)
    }

    fn orient(&self, direction: Direction, binding: Option<&TargetBinding>) -> Substitution {
        let policy = &self.policy;
        let server_mac = policy
            .dst_mac
            .or_else(|| policy.dst_ip.and(binding.map(|b| b.resolved_mac)));

        let request = Substitution {
            src_ip: v4(policy.src_ip),
            dst_ip: v4(policy.dst_ip),
            src_port: policy.src_port,
            dst_port: policy.dst_port,
            src_mac: policy.src_mac,
            dst_mac: server_mac,
        };

        match direction {
            Direction::Response => Substitution {
                src_ip: request.dst_ip,
                dst_ip: request.src_ip,
                src_port: request.dst_port,
                dst_port: request.src_port,
                src_mac: request.dst_mac,
                dst_mac: request.src_mac,
            },
            Direction::Request | Direction::Unknown => request,
        }
    }
}

fn finish(record: &FrameRecord, raw: Vec<u8>, changed: bool) -> FrameRecord {
    if changed {
        record.with_bytes(raw)
    } else {
        record.clone()
    }
}

/// Fields of the pseudo-header and header that addressing rewrites touch
fn pseudo_fields(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&src.octets());
    out[4..8].copy_from_slice(&dst.octets());
    out[8..10].copy_from_slice(&sport.to_be_bytes());
    out[10..12].copy_from_slice(&dport.to_be_bytes());
    out
}

/// Incremental transport checksum update for a segment not fully captured
fn patch_checksum(raw: &mut [u8], kind: TransportKind, header_offset: usize, old: &[u8], new: &[u8]) {
    let at = header_offset + kind.checksum_offset();
    let current = u16::from_be_bytes([raw[at], raw[at + 1]]);
    if kind == TransportKind::Udp && current == 0 {
        return;
    }
    let mut updated = incremental_update(current, old, new);
    if kind == TransportKind::Udp && updated == 0 {
        updated = 0xFFFF;
    }
    raw[at..at + 2].copy_from_slice(&updated.to_be_bytes());
}

/// Per-frame conditions under which an address rewrite is refused
fn check_frame(record: &FrameRecord) -> Result<()> {
    let Some(ip_span) = record.layers.ip else {
        return Ok(());
    };
    let Some(ip) = ipv4::parse(&record.raw[ip_span.offset..]) else {
        return Ok(());
    };
    let Some(kind) = TransportKind::from_protocol(ip.protocol) else {
        return Ok(());
    };

    match record.layers.transport {
        None if ip.carries_transport_header() => Err(Error::unsupported_rewrite(format!(
            "frame #{}: {:?} header not captured, its checksum cannot be updated",
            record.sequence_index, kind
        ))),
        Some((TransportKind::Udp, span)) if !record.layers.truncated && !record.layers.fragmented => {
            let udp_len = usize::from(u16::from_be_bytes([record.raw[span.offset + 4], record.raw[span.offset + 5]]));
            let ip_payload = ip.total_length - ip.header_len;
            if udp_len != ip_payload {
                return Err(Error::unsupported_rewrite(format!(
                    "frame #{}: UDP length {} disagrees with IP payload length {}",
                    record.sequence_index, udp_len, ip_payload
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
