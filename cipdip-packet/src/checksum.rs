//! Checksum calculations for network packets
//!
//! Internet Checksum (RFC 1071) as used by the IPv4 header and by the TCP
//! and UDP pseudo-header checksums.

use std::net::Ipv4Addr;

/// Accumulates `data` as big-endian 16-bit words onto `initial`.
///
/// The result is folded to 16 bits but not complemented, so partial sums
/// (pseudo-header, then segment) can be chained.
pub fn ones_complement_sum(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }

    // Odd trailing byte is padded with zero on the right
    if let Some(&byte) = chunks.remainder().first() {
        sum += u32::from(byte) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum
}

/// Calculates the Internet Checksum as defined in RFC 1071.
///
/// # Examples
///
/// ```
/// use cipdip_packet::checksum::internet_checksum;
///
/// let data = vec![0x45, 0x00, 0x00, 0x3c];
/// let checksum = internet_checksum(&data);
/// assert_ne!(checksum, 0);
/// ```
pub fn internet_checksum(data: &[u8]) -> u16 {
    !(ones_complement_sum(data, 0) as u16)
}

/// Calculates the TCP or UDP checksum including the IPv4 pseudo-header.
///
/// `segment` is the transport header plus payload with the checksum field
/// already zeroed.
pub fn transport_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut pseudo_header = [0u8; 12];
    pseudo_header[0..4].copy_from_slice(&src_ip.octets());
    pseudo_header[4..8].copy_from_slice(&dst_ip.octets());
    pseudo_header[9] = protocol;
    pseudo_header[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let sum = ones_complement_sum(&pseudo_header, 0);
    !(ones_complement_sum(segment, sum) as u16)
}

/// Incrementally updates `checksum` after `old` bytes were replaced by `new`
/// (RFC 1624, eqn. 3: `HC' = ~(~HC + ~m + m')`).
///
/// Both slices must have the same even length. Used when the covered data is
/// not fully present in the frame (snap-truncated captures, first fragments).
pub fn incremental_update(checksum: u16, old: &[u8], new: &[u8]) -> u16 {
    let mut sum = u32::from(!checksum);

    for chunk in old.chunks_exact(2) {
        sum += u32::from(!u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    for chunk in new.chunks_exact(2) {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Validates data whose checksum field is included in `data`.
pub fn validate_checksum(data: &[u8]) -> bool {
    let result = internet_checksum(data);
    result == 0 || result == 0xFFFF
}
