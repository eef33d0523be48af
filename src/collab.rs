//! Collaborator interfaces: link-layer I/O, interface table, and routing
//! table. These are consumed by the forwarding engine but implemented
//! outside it (spec.md §6) — production code backs them with a real NIC
//! and a configured routing table; tests back them with fixtures.

use std::net::Ipv4Addr;

/// An immutable network interface, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub name: &'static str,
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
}

/// A routing table entry: destination prefix/mask, gateway, and the
/// interface to transmit on. `gateway` of `0.0.0.0` means "destination is
/// directly reachable" — resolve the destination address itself via ARP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: &'static str,
}

impl Route {
    /// The address ARP resolution should target for this route.
    pub fn next_hop(&self, destination: Ipv4Addr) -> Ipv4Addr {
        if self.gateway == Ipv4Addr::UNSPECIFIED {
            destination
        } else {
            self.gateway
        }
    }

    fn mask_len(&self) -> u32 {
        u32::from(self.mask).count_ones()
    }
}

/// Non-blocking link-layer transmit, named by interface.
pub trait LinkLayer: Send + Sync {
    fn send_frame(&self, interface: &str, frame: &[u8]);
}

/// Read-only interface lookups.
pub trait InterfaceTable: Send + Sync {
    fn by_name(&self, name: &str) -> Option<Interface>;
    fn by_local_ip(&self, ip: Ipv4Addr) -> Option<Interface>;
    fn all(&self) -> Vec<Interface>;
}

/// Longest-prefix-match routing lookup.
pub trait RouteTable: Send + Sync {
    fn lookup(&self, dst: Ipv4Addr) -> Option<Route>;
}

/// A fixed-table implementation of [`InterfaceTable`] and [`RouteTable`],
/// suitable for both production config-file loading and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTables {
    interfaces: Vec<Interface>,
    routes: Vec<Route>,
}

impl StaticTables {
    pub fn new(interfaces: Vec<Interface>, routes: Vec<Route>) -> Self {
        StaticTables { interfaces, routes }
    }
}

impl InterfaceTable for StaticTables {
    fn by_name(&self, name: &str) -> Option<Interface> {
        self.interfaces.iter().copied().find(|i| i.name == name)
    }

    fn by_local_ip(&self, ip: Ipv4Addr) -> Option<Interface> {
        self.interfaces.iter().copied().find(|i| i.ip == ip)
    }

    fn all(&self) -> Vec<Interface> {
        self.interfaces.clone()
    }
}

impl RouteTable for StaticTables {
    /// Longest-prefix match: the candidate route with the most specific
    /// (longest) mask among those whose network contains `dst`.
    fn lookup(&self, dst: Ipv4Addr) -> Option<Route> {
        let dst_bits = u32::from(dst);
        self.routes
            .iter()
            .filter(|r| {
                let mask_bits = u32::from(r.mask);
                let net_bits = u32::from(r.destination);
                (dst_bits & mask_bits) == (net_bits & mask_bits)
            })
            .max_by_key(|r| r.mask_len())
            .copied()
    }
}
