//! Link-layer interface handle

use crate::{Error, MacAddr, Result};
use ipnetwork::IpNetwork;
use pnet_datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Network interface used for replay egress or probing
#[derive(Debug, Clone)]
pub struct Interface {
    /// Interface name (e.g., "eth0", "en0")
    pub name: String,
    /// Interface index
    pub index: u32,
    /// MAC address
    pub mac_address: MacAddr,
    /// IPv4 networks assigned to the interface
    pub ipv4_networks: Vec<(Ipv4Addr, u8)>,
    /// Is interface up?
    pub is_up: bool,
    pub is_loopback: bool,
}

impl Interface {
    /// Create a new interface with no addresses
    pub fn new(name: String, index: u32, mac_address: MacAddr) -> Self {
        Self {
            name,
            index,
            mac_address,
            ipv4_networks: Vec::new(),
            is_up: true,
            is_loopback: false,
        }
    }

    /// Attach an IPv4 address with its prefix length
    pub fn with_ipv4(mut self, addr: Ipv4Addr, prefix: u8) -> Self {
        self.ipv4_networks.push((addr, prefix));
        self
    }

    fn from_pnet(iface: &NetworkInterface) -> Self {
        let mac_address = iface
            .mac
            .map(|mac| MacAddr([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]))
            .unwrap_or_default();

        let ipv4_networks = iface
            .ips
            .iter()
            .filter_map(|network| match network {
                IpNetwork::V4(v4) => Some((v4.ip(), v4.prefix())),
                IpNetwork::V6(_) => None,
            })
            .collect();

        Self {
            name: iface.name.clone(),
            index: iface.index,
            mac_address,
            ipv4_networks,
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
        }
    }

    fn pnet_by_name(name: &str) -> Result<NetworkInterface> {
        pnet_datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    /// Get interface by name
    pub fn by_name(name: &str) -> Result<Self> {
        Ok(Self::from_pnet(&Self::pnet_by_name(name)?))
    }

    /// List all available interfaces
    pub fn list_all() -> Vec<Self> {
        pnet_datalink::interfaces()
            .iter()
            .map(Self::from_pnet)
            .collect()
    }

    /// First IPv4 address of this interface
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4_networks.first().map(|(addr, _)| *addr)
    }

    /// True if `target` falls inside one of the interface's IPv4 networks
    pub fn is_on_link(&self, target: Ipv4Addr) -> bool {
        self.ipv4_networks.iter().any(|(addr, prefix)| {
            let mask = if *prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from((*prefix).min(32)))
            };
            u32::from(*addr) & mask == u32::from(target) & mask
        })
    }

    /// Open a persistent sender for this interface
    ///
    /// The returned handle is owned by a single writer for its lifetime.
    pub fn open_sender(&self) -> Result<Box<dyn DataLinkSender>> {
        let (tx, _) = self.open_channel(None)?;
        Ok(tx)
    }

    /// Open a send/receive channel; `read_timeout` bounds every receive call
    pub fn open_channel(
        &self,
        read_timeout: Option<Duration>,
    ) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)> {
        let iface = Self::pnet_by_name(&self.name)?;
        let config = pnet_datalink::Config {
            read_timeout,
            ..Default::default()
        };

        match pnet_datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
            Ok(_) => Err(Error::Interface("Unsupported channel type".to_string())),
            Err(e) => Err(Error::Interface(format!(
                "Failed to open channel on {}: {}",
                self.name, e
            ))),
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv4() {
            Some(ip) => write!(f, "{} ({}, {})", self.name, self.mac_address, ip),
            None => write!(f, "{} ({})", self.name, self.mac_address),
        }
    }
}
