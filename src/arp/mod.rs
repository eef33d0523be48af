//! ARP cache, request queue, and the ARP request handler (spec.md §4.2,
//! §4.3). A single mutex guards both the entry array and the request
//! queue (spec.md §5); the public API is structured so no method calls
//! another while already holding that lock, which gives callers the
//! effect of the original's recursive mutex without needing one — `queue`
//! followed by an immediate probe (spec.md §4.8) is two separate calls,
//! not one held lock spanning both.

mod types;

pub use types::{ArpRequest, PendingPacket};
use types::ArpEntry;

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::clock::Clock;
use crate::collab::{InterfaceTable, LinkLayer};
use crate::net::arp_wire::{ArpPacket, ARP_OP_REQUEST};
use crate::net::ethernet::{EthernetFrame, BROADCAST_MAC, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::net::icmp::{IcmpPacket, CODE_HOST_UNREACHABLE, ICMP_DEST_UNREACHABLE};
use crate::net::ipv4::{Ipv4Packet, PROTOCOL_ICMP};

/// Fixed capacity of the ARP entry array (spec.md §3, design constant).
pub const ARP_CACHE_CAPACITY: usize = 100;

/// Number of unanswered probes before a request is escalated to ICMP
/// host-unreachable (spec.md §4.3).
pub const ARP_MAX_ATTEMPTS: u8 = 5;

struct Inner {
    entries: Vec<ArpEntry>,
    requests: Vec<ArpRequest>,
}

/// Concurrent, bounded cache of IPv4→MAC bindings plus the in-flight ARP
/// request queue. Owns all its entries and requests; every accessor hands
/// back a detached copy, never a reference into guarded state.
pub struct ArpCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    retry_interval: Duration,
    max_attempts: u8,
    clock: Arc<dyn Clock>,
    link_layer: Arc<dyn LinkLayer>,
    interfaces: Arc<dyn InterfaceTable>,
}

impl ArpCache {
    pub fn new(
        clock: Arc<dyn Clock>,
        link_layer: Arc<dyn LinkLayer>,
        interfaces: Arc<dyn InterfaceTable>,
        ttl: Duration,
        retry_interval: Duration,
        max_attempts: u8,
    ) -> Self {
        let now = clock.now();
        ArpCache {
            inner: Mutex::new(Inner {
                entries: vec![ArpEntry::empty(now); ARP_CACHE_CAPACITY],
                requests: Vec::new(),
            }),
            ttl,
            retry_interval,
            max_attempts,
            clock,
            link_layer,
            interfaces,
        }
    }

    /// `lookup(ip) -> Option<MAC>`: a detached copy of the MAC if a valid,
    /// unexpired entry matches.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<[u8; 6]> {
        let now = self.clock.now();
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .find(|e| e.valid && e.ip == ip && now.saturating_duration_since(e.added_at) <= self.ttl)
            .map(|e| e.mac)
    }

    /// `insert(ip, mac) -> Option<Request>`: installs the binding
    /// (refreshing `added_at`), and if a pending request existed for `ip`,
    /// removes it from the queue and returns it so the caller can drain
    /// its pending packets.
    pub fn insert(&self, ip: Ipv4Addr, mac: [u8; 6]) -> Option<ArpRequest> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        if let Some(existing) = inner.entries.iter_mut().find(|e| e.valid && e.ip == ip) {
            existing.mac = mac;
            existing.added_at = now;
        } else if let Some(slot) = inner.entries.iter_mut().find(|e| !e.valid) {
            *slot = ArpEntry { ip, mac, added_at: now, valid: true };
        } else {
            let victim = rand::thread_rng().gen_range(0..inner.entries.len());
            inner.entries[victim] = ArpEntry { ip, mac, added_at: now, valid: true };
        }

        if let Some(pos) = inner.requests.iter().position(|r| r.target_ip == ip) {
            Some(inner.requests.remove(pos))
        } else {
            None
        }
    }

    /// `queue(ip, frame, iface, original_src_mac)`: finds or creates a
    /// request for `ip` and appends a pending packet to it. `original_src_mac`
    /// is the ingress frame's true source MAC, kept alongside `frame` so a
    /// failed resolution can still address an ICMP host-unreachable back to
    /// the real sender rather than the egress interface's own MAC. Returns
    /// `true` if this created a new request (the caller should immediately
    /// probe — spec.md §4.8).
    pub fn queue(&self, ip: Ipv4Addr, frame: Vec<u8>, egress_interface: String, original_src_mac: [u8; 6]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let is_new = !inner.requests.iter().any(|r| r.target_ip == ip);
        let req = match inner.requests.iter_mut().find(|r| r.target_ip == ip) {
            Some(r) => r,
            None => {
                inner.requests.push(ArpRequest::new(ip));
                inner.requests.last_mut().unwrap()
            }
        };
        req.pending.push(PendingPacket { frame, egress_interface, original_src_mac });
        is_new
    }

    /// `destroy(request)`: unlinks a request by target IP if still queued.
    pub fn destroy(&self, ip: Ipv4Addr) -> Option<ArpRequest> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.iter().position(|r| r.target_ip == ip).map(|pos| inner.requests.remove(pos))
    }

    /// Apply the retry rule (spec.md §4.3) to the single request for `ip`,
    /// if any. Used by the egress path to fire the first probe immediately
    /// instead of waiting for the next sweep tick.
    pub fn handle_request_now(&self, ip: Ipv4Addr) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.requests.iter().position(|r| r.target_ip == ip) {
            self.apply_retry_rule(&mut inner, pos, now);
        }
    }

    /// Called once per second: invalidates entries older than the TTL and
    /// applies the retry rule to every outstanding request.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        for entry in inner.entries.iter_mut() {
            if entry.valid && now.saturating_duration_since(entry.added_at) > self.ttl {
                entry.valid = false;
            }
        }

        let mut i = 0;
        while i < inner.requests.len() {
            if self.apply_retry_rule(&mut inner, i, now) {
                // request was destroyed in place; don't advance past the
                // element that slid into this slot.
            } else {
                i += 1;
            }
        }
    }

    /// Applies the retry rule to `inner.requests[idx]`. Returns `true` if
    /// the request was removed (escalated past max attempts).
    fn apply_retry_rule(&self, inner: &mut std::sync::MutexGuard<'_, Inner>, idx: usize, now: Instant) -> bool {
        if inner.requests[idx].attempts >= self.max_attempts {
            let req = inner.requests.remove(idx);
            self.send_host_unreachable(&req);
            return true;
        }

        let should_send = match inner.requests[idx].last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.retry_interval,
        };

        if should_send {
            self.broadcast_probe(&inner.requests[idx]);
            inner.requests[idx].last_sent = Some(now);
            inner.requests[idx].attempts += 1;
        }

        false
    }

    fn broadcast_probe(&self, req: &ArpRequest) {
        let Some(first) = req.pending.first() else { return };
        let Some(iface) = self.interfaces.by_name(&first.egress_interface) else { return };

        let arp = ArpPacket::build(
            ARP_OP_REQUEST,
            &iface.mac,
            &iface.ip.octets(),
            &[0; 6],
            &req.target_ip.octets(),
        );
        let frame = EthernetFrame::build(&iface.mac, &BROADCAST_MAC, ETHERTYPE_ARP, &arp);
        self.link_layer.send_frame(iface.name, &frame);
        log::debug!("ARP: probe #{} for {} on {}", req.attempts + 1, req.target_ip, iface.name);
    }

    fn send_host_unreachable(&self, req: &ArpRequest) {
        log::warn!("ARP: giving up on {} after {} attempts", req.target_ip, req.attempts);
        for pending in &req.pending {
            let Some(eth) = EthernetFrame::parse(&pending.frame) else { continue };
            let Some(original_ip) = Ipv4Packet::parse(eth.payload) else { continue };
            let Some(iface) = self.interfaces.by_name(&pending.egress_interface) else { continue };

            let icmp = IcmpPacket::build_error(ICMP_DEST_UNREACHABLE, CODE_HOST_UNREACHABLE, eth.payload);
            let ip_packet = Ipv4Packet::build(iface.ip.octets(), original_ip.src_ip, 64, PROTOCOL_ICMP, &icmp);
            let frame = EthernetFrame::build(&iface.mac, &pending.original_src_mac, ETHERTYPE_IPV4, &ip_packet);
            self.link_layer.send_frame(iface.name, &frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::collab::{Interface, StaticTables};
    use std::sync::Mutex as StdMutex;

    struct RecordingLink {
        sent: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingLink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingLink { sent: StdMutex::new(Vec::new()) })
        }
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl LinkLayer for RecordingLink {
        fn send_frame(&self, interface: &str, frame: &[u8]) {
            self.sent.lock().unwrap().push((interface.to_string(), frame.to_vec()));
        }
    }

    fn fixture() -> (Arc<FakeClock>, Arc<RecordingLink>, ArpCache) {
        let clock = FakeClock::new();
        let link = RecordingLink::new();
        let tables = Arc::new(StaticTables::new(
            vec![Interface { name: "eth2", mac: [2; 6], ip: Ipv4Addr::new(192, 168, 1, 1) }],
            vec![],
        ));
        let cache = ArpCache::new(
            clock.clone(),
            link.clone(),
            tables,
            Duration::from_secs(15),
            Duration::from_secs(1),
            ARP_MAX_ATTEMPTS,
        );
        (clock, link, cache)
    }

    #[test]
    fn lookup_miss_then_insert_then_hit() {
        let (_clock, _link, cache) = fixture();
        let ip = Ipv4Addr::new(192, 168, 1, 2);
        assert!(cache.lookup(ip).is_none());
        assert!(cache.insert(ip, [9; 6]).is_none());
        assert_eq!(cache.lookup(ip), Some([9; 6]));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (clock, _link, cache) = fixture();
        let ip = Ipv4Addr::new(192, 168, 1, 2);
        cache.insert(ip, [9; 6]);
        clock.advance(Duration::from_secs(16));
        assert!(cache.lookup(ip).is_none());
        cache.sweep();
        assert!(cache.lookup(ip).is_none());
    }

    #[test]
    fn at_most_one_request_per_target() {
        let (_clock, _link, cache) = fixture();
        let ip = Ipv4Addr::new(192, 168, 1, 2);
        let first = cache.queue(ip, vec![0; 60], "eth2".into(), [0xAA; 6]);
        let second = cache.queue(ip, vec![1; 60], "eth2".into(), [0xAA; 6]);
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn insert_drains_matching_request() {
        let (_clock, _link, cache) = fixture();
        let ip = Ipv4Addr::new(192, 168, 1, 2);
        cache.queue(ip, vec![0; 60], "eth2".into(), [0xAA; 6]);
        cache.queue(ip, vec![1; 60], "eth2".into(), [0xAA; 6]);
        let req = cache.insert(ip, [7; 6]).expect("request should drain");
        assert_eq!(req.pending.len(), 2);
        assert!(cache.destroy(ip).is_none());
    }

    #[test]
    fn sweep_retries_at_one_second_then_gives_up_after_five() {
        let (clock, link, cache) = fixture();
        let ip = Ipv4Addr::new(192, 168, 1, 2);
        cache.queue(ip, vec![0; 60], "eth2".into(), [0xAA; 6]);
        cache.handle_request_now(ip); // attempt 1, immediate
        assert_eq!(link.count(), 1);

        for attempt in 2..=5 {
            clock.advance(Duration::from_secs(1));
            cache.sweep();
            assert_eq!(link.count(), attempt, "attempt {attempt}");
        }

        // request is now at 5 attempts; next sweep escalates to ICMP
        clock.advance(Duration::from_secs(1));
        cache.sweep();
        assert_eq!(link.count(), 6); // the ICMP host-unreachable frame
    }
}
