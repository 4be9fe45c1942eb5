//! BPF filter builders for the replay path

use std::net::Ipv4Addr;

/// Replies from an ENIP server: explicit messaging over TCP/UDP plus UDP I/O
///
/// When `server` is known the filter is narrowed to that host.
pub fn response_filter(server: Option<Ipv4Addr>, explicit_port: u16, implicit_io_port: u16) -> String {
    let ports = format!(
        "(tcp src port {p} or udp src port {p} or udp src port {io})",
        p = explicit_port,
        io = implicit_io_port
    );
    match server {
        Some(ip) => format!("src host {} and {}", ip, ports),
        None => ports,
    }
}
