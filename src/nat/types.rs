//! NAT data model (spec.md §3): mappings, TCP connection state, and the
//! held-SYN record for the unsolicited-inbound-SYN rule (spec.md §4.7.3).

use std::net::Ipv4Addr;
use std::time::Instant;

/// What a mapping's `aux` identifier means: a TCP port or an ICMP echo id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatKind {
    Icmp,
    Tcp,
}

/// TCP connection state tracked per remote endpoint under a mapping
/// (spec.md §4.7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    SynSent,
    SynReceived,
    Established,
    FinWait,
    Closed,
}

/// One remote endpoint's connection state under a NAT mapping.
#[derive(Debug, Clone)]
pub struct TcpConnection {
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub state: TcpState,
    pub last_updated: Instant,
}

/// A bidirectional NAT binding: (internal-IP, internal-aux) ↔
/// (external-aux). `external_aux` is always the router's own external IP's
/// port/id; the external IP itself is carried per-connection since one
/// mapping may field many remote peers (e.g. one TCP listener socket).
#[derive(Debug, Clone)]
pub struct NatMapping {
    pub internal_ip: Ipv4Addr,
    pub internal_aux: u16,
    pub external_aux: u16,
    pub kind: NatKind,
    pub last_updated: Instant,
    pub connections: Vec<TcpConnection>,
}

impl NatMapping {
    pub(super) fn new(internal_ip: Ipv4Addr, internal_aux: u16, external_aux: u16, kind: NatKind, now: Instant) -> Self {
        NatMapping { internal_ip, internal_aux, external_aux, kind, last_updated: now, connections: Vec::new() }
    }
}

/// An unsolicited external SYN held pending a matching internal SYN
/// (spec.md §4.7.3, §8 scenario 6). Carries a deep copy of the Ethernet
/// frame that arrived, so it can be translated and released verbatim if
/// matched, or turned into ICMP port-unreachable if it times out.
#[derive(Debug, Clone)]
pub struct HeldSyn {
    pub external_aux: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub frame: Vec<u8>,
    pub ingress_interface: String,
    pub received_at: Instant,
}
