//! ARP cache data model (spec.md §3): entries, pending packets, requests.

use std::net::Ipv4Addr;
use std::time::Instant;

/// An IPv4→MAC binding. `valid` tracks whether the binding should still be
/// trusted; an invalid slot is free for reuse by [`super::ArpCache::insert`].
#[derive(Debug, Clone, Copy)]
pub(super) struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
    pub added_at: Instant,
    pub valid: bool,
}

impl ArpEntry {
    pub fn empty(now: Instant) -> Self {
        ArpEntry { ip: Ipv4Addr::UNSPECIFIED, mac: [0; 6], added_at: now, valid: false }
    }
}

/// A deep copy of a frame awaiting ARP resolution, plus the egress
/// interface it should be transmitted on once resolved. `original_src_mac`
/// is the link-layer source address of the frame as it arrived on ingress
/// — kept separately from `frame` (whose own Ethernet source is stamped
/// with the egress interface's MAC, ready to be overwritten once the next
/// hop's MAC is known) so a failed resolution can still address an ICMP
/// host-unreachable back to the true original sender.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub frame: Vec<u8>,
    pub egress_interface: String,
    pub original_src_mac: [u8; 6],
}

/// Bookkeeping for one unresolved next-hop IP: the frames waiting on it,
/// when the last ARP probe went out, and how many have gone out so far.
#[derive(Debug, Clone)]
pub struct ArpRequest {
    pub target_ip: Ipv4Addr,
    pub pending: Vec<PendingPacket>,
    pub last_sent: Option<Instant>,
    pub attempts: u8,
}

impl ArpRequest {
    pub(super) fn new(target_ip: Ipv4Addr) -> Self {
        ArpRequest { target_ip, pending: Vec::new(), last_sent: None, attempts: 0 }
    }
}
