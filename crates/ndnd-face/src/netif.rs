//! Network-interface observer events and local-address selection.
//!
//! The daemon is told about kernel interfaces by an external observer
//! (netlink on Linux, configuration in tests). The monitor here is the
//! distribution point: it keeps the last known picture of each
//! interface and fans events out to transports and strategies.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;

use tokio::sync::broadcast;

use ndnd_fw::InterfaceState;

/// Snapshot of one kernel network interface.
#[derive(Debug, Clone)]
pub struct NetifInfo {
    pub name: String,
    pub mtu: u32,
    pub state: InterfaceState,
    pub v4_addresses: Vec<Ipv4Addr>,
    pub v6_addresses: Vec<Ipv6Addr>,
    pub supports_multicast: bool,
    pub is_loopback: bool,
}

impl NetifInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtu: 1500,
            state: InterfaceState::Unknown,
            v4_addresses: Vec::new(),
            v6_addresses: Vec::new(),
            supports_multicast: true,
            is_loopback: false,
        }
    }
}

/// Events the observer publishes.
#[derive(Debug, Clone)]
pub enum NetifEvent {
    Added(NetifInfo),
    Removed(String),
    StateChanged {
        interface: String,
        old: InterfaceState,
        new: InterfaceState,
    },
    AddressAdded {
        interface: String,
        address: IpAddr,
    },
    AddressRemoved {
        interface: String,
        address: IpAddr,
    },
}

/// Pick a local address of the wanted family from an interface.
///
/// Loopback and multicast addresses never qualify; for IPv6,
/// link-local addresses are also skipped. The first suitable address
/// wins.
#[must_use]
pub fn pick_local_address(info: &NetifInfo, want_v6: bool) -> Option<IpAddr> {
    if want_v6 {
        info.v6_addresses
            .iter()
            .find(|a| !a.is_loopback() && !a.is_multicast() && !is_unicast_link_local(a))
            .copied()
            .map(IpAddr::V6)
    } else {
        info.v4_addresses
            .iter()
            .find(|a| !a.is_loopback() && !a.is_multicast())
            .copied()
            .map(IpAddr::V4)
    }
}

fn is_unicast_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Fan-out point for interface events, with a registry of the last
/// known interface snapshots.
#[derive(Debug)]
pub struct NetifMonitor {
    tx: broadcast::Sender<NetifEvent>,
    interfaces: Mutex<HashMap<String, NetifInfo>>,
}

impl Default for NetifMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetifMonitor {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            interfaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetifEvent> {
        self.tx.subscribe()
    }

    /// Current snapshot of an interface, if known.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NetifInfo> {
        self.interfaces.lock().expect("netif registry lock").get(name).cloned()
    }

    /// Feed an event into the registry and broadcast it.
    pub fn publish(&self, event: NetifEvent) {
        {
            let mut interfaces = self.interfaces.lock().expect("netif registry lock");
            match &event {
                NetifEvent::Added(info) => {
                    interfaces.insert(info.name.clone(), info.clone());
                }
                NetifEvent::Removed(name) => {
                    interfaces.remove(name);
                }
                NetifEvent::StateChanged { interface, new, .. } => {
                    if let Some(info) = interfaces.get_mut(interface) {
                        info.state = *new;
                    }
                }
                NetifEvent::AddressAdded { interface, address } => {
                    if let Some(info) = interfaces.get_mut(interface) {
                        match address {
                            IpAddr::V4(a) => info.v4_addresses.push(*a),
                            IpAddr::V6(a) => info.v6_addresses.push(*a),
                        }
                    }
                }
                NetifEvent::AddressRemoved { interface, address } => {
                    if let Some(info) = interfaces.get_mut(interface) {
                        match address {
                            IpAddr::V4(a) => info.v4_addresses.retain(|x| x != a),
                            IpAddr::V6(a) => info.v6_addresses.retain(|x| x != a),
                        }
                    }
                }
            }
        }
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}
