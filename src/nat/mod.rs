//! NAT mapping table, TCP connection tracker, and the unsolicited-SYN hold
//! queue (spec.md §4.7). A single mutex guards mappings, the free-port
//! pool, and the held-SYN queue (spec.md §5) — the NAT lock is never held
//! while the ARP lock is held, and vice versa; every accessor here returns
//! detached copies.

mod types;

pub use types::{HeldSyn, NatKind, NatMapping, TcpConnection, TcpState};

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::collab::{InterfaceTable, LinkLayer};
use crate::net::ethernet::{EthernetFrame, ETHERTYPE_IPV4};
use crate::net::icmp::{IcmpPacket, CODE_PORT_UNREACHABLE, ICMP_DEST_UNREACHABLE};
use crate::net::ipv4::{Ipv4Packet, PROTOCOL_ICMP};
use crate::net::tcp::TcpFlags;

/// External aux (port/icmp-id) pool lower bound, per spec.md §3.
const EXTERNAL_AUX_MIN: u16 = 1024;

struct Inner {
    mappings: Vec<NatMapping>,
    held_syns: Vec<HeldSyn>,
    next_candidate: u16,
}

pub struct NatTable {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    link_layer: Arc<dyn LinkLayer>,
    interfaces: Arc<dyn InterfaceTable>,
    icmp_idle: Duration,
    tcp_established_idle: Duration,
    tcp_transitory_idle: Duration,
    unsolicited_syn_hold: Duration,
}

impl NatTable {
    pub fn new(
        clock: Arc<dyn Clock>,
        link_layer: Arc<dyn LinkLayer>,
        interfaces: Arc<dyn InterfaceTable>,
        icmp_idle: Duration,
        tcp_established_idle: Duration,
        tcp_transitory_idle: Duration,
        unsolicited_syn_hold: Duration,
    ) -> Self {
        NatTable {
            inner: Mutex::new(Inner { mappings: Vec::new(), held_syns: Vec::new(), next_candidate: EXTERNAL_AUX_MIN }),
            clock,
            link_layer,
            interfaces,
            icmp_idle,
            tcp_established_idle,
            tcp_transitory_idle,
            unsolicited_syn_hold,
        }
    }

    pub fn lookup_internal(&self, internal_ip: Ipv4Addr, internal_aux: u16, kind: NatKind) -> Option<NatMapping> {
        let inner = self.inner.lock().unwrap();
        inner
            .mappings
            .iter()
            .find(|m| m.internal_ip == internal_ip && m.internal_aux == internal_aux && m.kind == kind)
            .cloned()
    }

    pub fn lookup_external(&self, external_aux: u16, kind: NatKind) -> Option<NatMapping> {
        let inner = self.inner.lock().unwrap();
        inner.mappings.iter().find(|m| m.external_aux == external_aux && m.kind == kind).cloned()
    }

    /// Finds the mapping for `(internal_ip, internal_aux, kind)` or
    /// allocates a fresh one from the free-port pool. Returns `None` if a
    /// new mapping is needed but the pool is exhausted (spec.md §7: the
    /// caller drops the frame rather than handing out a duplicate
    /// `external_aux`, which would violate the §3 uniqueness invariant).
    pub fn get_or_create_mapping(&self, internal_ip: Ipv4Addr, internal_aux: u16, kind: NatKind) -> Option<NatMapping> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        if let Some(pos) = inner
            .mappings
            .iter()
            .position(|m| m.internal_ip == internal_ip && m.internal_aux == internal_aux && m.kind == kind)
        {
            inner.mappings[pos].last_updated = now;
            return Some(inner.mappings[pos].clone());
        }

        let external_aux = Self::allocate_external_aux(&mut inner, kind)?;
        let mapping = NatMapping::new(internal_ip, internal_aux, external_aux, kind, now);
        inner.mappings.push(mapping.clone());
        Some(mapping)
    }

    /// Finds the mapping for an internal TCP flow to `(remote_ip,
    /// remote_port)`, or allocates one. When allocating for an outbound SYN
    /// (`is_outbound_syn`), first checks whether an unsolicited external SYN
    /// is being held from that exact remote endpoint (spec.md §4.7.3, §8
    /// scenario 6); if so, the new mapping adopts the held SYN's
    /// `external_aux` instead of drawing a fresh one from the pool, and the
    /// held SYN is returned to the caller to translate and release into the
    /// internal network. Returns `None` if a new mapping is needed but the
    /// pool is exhausted.
    pub fn get_or_create_tcp_mapping(
        &self,
        internal_ip: Ipv4Addr,
        internal_aux: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        is_outbound_syn: bool,
    ) -> Option<(NatMapping, Option<HeldSyn>)> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        if let Some(pos) = inner
            .mappings
            .iter()
            .position(|m| m.internal_ip == internal_ip && m.internal_aux == internal_aux && m.kind == NatKind::Tcp)
        {
            inner.mappings[pos].last_updated = now;
            return Some((inner.mappings[pos].clone(), None));
        }

        let held = if is_outbound_syn {
            inner
                .held_syns
                .iter()
                .position(|h| h.remote_ip == remote_ip && h.remote_port == remote_port)
                .map(|pos| inner.held_syns.remove(pos))
        } else {
            None
        };

        let external_aux = match &held {
            Some(held) => held.external_aux,
            None => Self::allocate_external_aux(&mut inner, NatKind::Tcp)?,
        };

        let mapping = NatMapping::new(internal_ip, internal_aux, external_aux, NatKind::Tcp, now);
        inner.mappings.push(mapping.clone());
        Some((mapping, held))
    }

    /// Draws the next free `external_aux` from the pool for `kind`, or
    /// `None` if every value in `[EXTERNAL_AUX_MIN, u16::MAX]` is already in
    /// use by a mapping of that kind.
    fn allocate_external_aux(inner: &mut Inner, kind: NatKind) -> Option<u16> {
        let span = u32::from(u16::MAX) - u32::from(EXTERNAL_AUX_MIN) + 1;
        for _ in 0..span {
            let candidate = inner.next_candidate;
            inner.next_candidate = if candidate == u16::MAX { EXTERNAL_AUX_MIN } else { candidate + 1 };
            if !inner.mappings.iter().any(|m| m.external_aux == candidate && m.kind == kind) {
                return Some(candidate);
            }
        }
        None
    }

    /// Applies a TCP flag observation to the connection record for
    /// `(remote_ip, remote_port)` under the mapping identified by
    /// `(internal_ip, internal_aux)`, per the state table in spec.md §4.7.3.
    pub fn update_tcp_connection(
        &self,
        internal_ip: Ipv4Addr,
        internal_aux: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        flags: TcpFlags,
        from_internal: bool,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let Some(mapping) = inner
            .mappings
            .iter_mut()
            .find(|m| m.internal_ip == internal_ip && m.internal_aux == internal_aux && m.kind == NatKind::Tcp)
        else {
            return;
        };
        mapping.last_updated = now;

        let conn = match mapping.connections.iter_mut().find(|c| c.remote_ip == remote_ip && c.remote_port == remote_port) {
            Some(c) => c,
            None => {
                mapping.connections.push(TcpConnection {
                    remote_ip,
                    remote_port,
                    state: TcpState::Closed,
                    last_updated: now,
                });
                mapping.connections.last_mut().unwrap()
            }
        };

        conn.last_updated = now;
        conn.state = next_tcp_state(conn.state, flags, from_internal);
    }

    /// Registers an unsolicited external SYN with no existing mapping.
    /// Returns `false` if one is already held for this `external_aux`.
    pub fn hold_unsolicited_syn(
        &self,
        external_aux: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        frame: Vec<u8>,
        ingress_interface: String,
    ) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        if inner.held_syns.iter().any(|h| h.external_aux == external_aux) {
            return false;
        }
        inner.held_syns.push(HeldSyn { external_aux, remote_ip, remote_port, frame, ingress_interface, received_at: now });
        true
    }

    /// Reaps mappings that have gone longer than their state's timeout
    /// since `last_updated`, and expires held SYNs past their hold window,
    /// sending ICMP port-unreachable for each expired one.
    ///
    /// Reaping is based purely on elapsed idle time, not on every
    /// connection having reached `Closed`: a TCP mapping stuck in
    /// `SynSent`/`SynReceived` (the remote never replies, or NAT never
    /// finds a route for it) would otherwise never be reaped, silently
    /// pinning an `external_aux` forever (spec.md §4.7.3's
    /// `tcp_transitory_idle` exists precisely to bound that case).
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        let idle_timeout_for = |m: &NatMapping| -> Duration {
            match m.kind {
                NatKind::Icmp => self.icmp_idle,
                NatKind::Tcp => {
                    if m.connections.iter().any(|c| c.state == TcpState::Established) {
                        self.tcp_established_idle
                    } else {
                        self.tcp_transitory_idle
                    }
                }
            }
        };

        inner.mappings.retain(|m| now.saturating_duration_since(m.last_updated) <= idle_timeout_for(m));

        let mut expired = Vec::new();
        inner.held_syns.retain(|h| {
            if now.saturating_duration_since(h.received_at) > self.unsolicited_syn_hold {
                expired.push(h.clone());
                false
            } else {
                true
            }
        });
        drop(inner);

        for held in expired {
            self.send_port_unreachable(&held);
        }
    }

    fn send_port_unreachable(&self, held: &HeldSyn) {
        log::warn!("NAT: unsolicited SYN from {}:{} timed out waiting for a match", held.remote_ip, held.remote_port);
        let Some(eth) = EthernetFrame::parse(&held.frame) else { return };
        let Some(original_ip) = Ipv4Packet::parse(eth.payload) else { return };
        let Some(iface) = self.interfaces.by_name(&held.ingress_interface) else { return };

        let icmp = IcmpPacket::build_error(ICMP_DEST_UNREACHABLE, CODE_PORT_UNREACHABLE, eth.payload);
        let ip_packet = Ipv4Packet::build(iface.ip.octets(), original_ip.src_ip, 64, PROTOCOL_ICMP, &icmp);
        let frame = EthernetFrame::build(&iface.mac, &eth.src_mac, ETHERTYPE_IPV4, &ip_packet);
        self.link_layer.send_frame(iface.name, &frame);
    }
}

fn next_tcp_state(current: TcpState, flags: TcpFlags, from_internal: bool) -> TcpState {
    if flags.rst {
        return TcpState::Closed;
    }
    match (current, from_internal, flags.syn, flags.ack, flags.fin) {
        (TcpState::Closed, true, true, false, _) => TcpState::SynSent,
        (TcpState::Closed, false, true, false, _) => TcpState::SynReceived,
        (TcpState::SynSent, false, true, true, _) => TcpState::Established,
        (TcpState::SynReceived, true, true, false, _) => TcpState::Established,
        (_, _, _, _, true) if current == TcpState::Established => TcpState::FinWait,
        (TcpState::FinWait, _, _, _, true) => TcpState::Closed,
        (other, _, _, _, _) => other,
    }
}
