//! Interface enumeration and egress resolution
//!
//! Egress selection is a subnet match over the host's interfaces; nothing
//! here shells out to routing tools.

use cipdip_core::{Error, Interface, Result};
use std::net::Ipv4Addr;
use tracing::debug;

/// Resolves which interface traffic to a target should leave through
pub trait EgressResolver: Send + Sync {
    fn resolve_egress(&self, target: Ipv4Addr) -> Result<Interface>;
}

/// All interfaces reported by the OS
pub fn list_interfaces() -> Result<Vec<Interface>> {
    let interfaces = Interface::list_all();
    if interfaces.is_empty() {
        return Err(Error::Interface(
            "No network interfaces found. Are you running with sufficient privileges?".to_string(),
        ));
    }
    Ok(interfaces)
}

/// Interfaces that can carry replay traffic
pub fn list_capture_interfaces() -> Result<Vec<Interface>> {
    Ok(list_interfaces()?
        .into_iter()
        .filter(is_usable)
        .collect())
}

fn is_usable(iface: &Interface) -> bool {
    iface.is_up && !iface.is_loopback && !iface.mac_address.is_zero()
}

/// Picks the usable interface whose IPv4 subnet contains the target,
/// falling back to the first usable interface with an IPv4 address
#[derive(Debug, Clone)]
pub struct SubnetEgressResolver {
    interfaces: Vec<Interface>,
}

impl SubnetEgressResolver {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    pub fn from_system() -> Result<Self> {
        Ok(Self::new(list_capture_interfaces()?))
    }
}

impl EgressResolver for SubnetEgressResolver {
    fn resolve_egress(&self, target: Ipv4Addr) -> Result<Interface> {
        let usable = || self.interfaces.iter().filter(|iface| is_usable(iface));

        if let Some(iface) = usable().find(|iface| iface.is_on_link(target)) {
            debug!(%target, interface = %iface.name, "Egress by subnet match");
            return Ok(iface.clone());
        }

        usable()
            .find(|iface| iface.ipv4().is_some())
            .cloned()
            .map(|iface| {
                debug!(%target, interface = %iface.name, "Egress by first usable interface");
                iface
            })
            .ok_or_else(|| Error::Interface(format!("No usable interface to reach {}", target)))
    }
}
