//! The forwarding engine: ingress dispatch, ARP handling, the non-NAT IP
//! handler, NAT translation, and egress (spec.md §4.4–§4.8). Stateless
//! beyond the ARP cache and NAT table it owns; every ingress call may run
//! on any thread (spec.md §5).

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::arp::ArpCache;
use crate::clock::Clock;
use crate::collab::{Interface, InterfaceTable, LinkLayer, Route, RouteTable};
use crate::config::Config;
use crate::error::ForwardError;
use crate::nat::{HeldSyn, NatKind, NatMapping, NatTable};
use crate::net::arp_wire::{ArpPacket, ARP_OP_REPLY, ARP_OP_REQUEST};
use crate::net::ethernet::{EthernetFrame, ETHERNET_HEADER_SIZE, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::net::icmp::{
    IcmpPacket, CODE_HOST_UNREACHABLE, CODE_NET_UNREACHABLE, CODE_PORT_UNREACHABLE, CODE_TTL_EXCEEDED,
    ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, ICMP_TIME_EXCEEDED,
};
use crate::net::ipv4::{self, Ipv4Packet, DEFAULT_TTL, PROTOCOL_ICMP, PROTOCOL_TCP, PROTOCOL_UDP};
use crate::net::tcp::{self, TcpHeader};

/// Minimum frame length carrying at least an Ethernet header and a minimal
/// ARP packet (spec.md §4.4).
const MIN_FRAME_LEN: usize = ETHERNET_HEADER_SIZE + 20;

pub struct ForwardingEngine {
    config: Config,
    interfaces: Arc<dyn InterfaceTable>,
    routes: Arc<dyn RouteTable>,
    link_layer: Arc<dyn LinkLayer>,
    arp: ArpCache,
    nat: NatTable,
}

/// Outcome of trying to NAT-translate an outbound internal packet.
enum NatTranslation {
    Translated(Vec<u8>),
    NotApplicable,
    ResourceExhausted,
}

impl ForwardingEngine {
    pub fn new(
        config: Config,
        interfaces: Arc<dyn InterfaceTable>,
        routes: Arc<dyn RouteTable>,
        link_layer: Arc<dyn LinkLayer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let arp = ArpCache::new(
            clock.clone(),
            link_layer.clone(),
            interfaces.clone(),
            config.timeouts.arp_entry_ttl,
            config.timeouts.arp_retry_interval,
            config.timeouts.arp_max_attempts,
        );
        let nat = NatTable::new(
            clock,
            link_layer.clone(),
            interfaces.clone(),
            config.timeouts.icmp_mapping_idle,
            config.timeouts.tcp_established_idle,
            config.timeouts.tcp_transitory_idle,
            config.timeouts.unsolicited_syn_hold,
        );
        ForwardingEngine { config, interfaces, routes, link_layer, arp, nat }
    }

    /// Called once per second by the timer thread (spec.md §5): sweeps the
    /// ARP cache and reaps idle NAT state.
    pub fn tick(&self) {
        self.arp.sweep();
        self.nat.sweep();
    }

    /// Entry point for a received frame (spec.md §4.4).
    pub fn receive_frame(&self, ingress_interface: &str, frame: &[u8]) {
        if let Err(err) = self.try_receive_frame(ingress_interface, frame) {
            log::debug!("dropping frame on {}: {}", ingress_interface, err);
        }
    }

    fn try_receive_frame(&self, ingress_interface: &str, frame: &[u8]) -> Result<(), ForwardError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(ForwardError::FrameTooShort);
        }
        let eth = EthernetFrame::parse(frame).ok_or(ForwardError::FrameTooShort)?;

        match eth.ethertype {
            ETHERTYPE_ARP => {
                self.handle_arp(ingress_interface, &eth);
                Ok(())
            }
            ETHERTYPE_IPV4 => self.handle_ip(ingress_interface, &eth),
            _ => Err(ForwardError::UnsupportedEtherType),
        }
    }

    // ---- §4.5 ARP handler -------------------------------------------------

    fn handle_arp(&self, ingress_interface: &str, eth: &EthernetFrame) {
        let Some(arp) = ArpPacket::parse(eth.payload) else {
            log::debug!("dropping malformed ARP packet on {}", ingress_interface);
            return;
        };

        match arp.operation {
            ARP_OP_REQUEST => {
                let Some(iface) = self.interfaces.by_local_ip(arp.target_ip_addr()) else { return };
                let reply = ArpPacket::build(ARP_OP_REPLY, &iface.mac, &iface.ip.octets(), &arp.sender_mac, &arp.sender_ip);
                let frame = EthernetFrame::build(&iface.mac, &arp.sender_mac, ETHERTYPE_ARP, &reply);
                self.link_layer.send_frame(iface.name, &frame);
            }
            ARP_OP_REPLY => {
                if let Some(request) = self.arp.insert(arp.sender_ip_addr(), arp.sender_mac) {
                    for pending in request.pending {
                        self.release_resolved(pending, arp.sender_mac);
                    }
                }
            }
            _ => log::debug!("dropping ARP packet with unknown operation {} on {}", arp.operation, ingress_interface),
        }
    }

    /// Finishes a pending packet once its next hop's MAC is known
    /// (spec.md §4.5): rewrite Ethernet addressing, decrement TTL, recompute
    /// the IP checksum, transmit.
    fn release_resolved(&self, pending: crate::arp::PendingPacket, next_hop_mac: [u8; 6]) {
        let Some(iface) = self.interfaces.by_name(&pending.egress_interface) else { return };
        let mut frame = pending.frame;
        EthernetFrame::rewrite_macs(&mut frame, &iface.mac, &next_hop_mac);
        if frame.len() >= ETHERNET_HEADER_SIZE + 20 {
            ipv4::decrement_ttl_and_rechecksum(&mut frame[ETHERNET_HEADER_SIZE..]);
        }
        self.link_layer.send_frame(iface.name, &frame);
    }

    // ---- §4.6 / §4.7 IP handling ------------------------------------------

    fn handle_ip(&self, ingress_interface: &str, eth: &EthernetFrame) -> Result<(), ForwardError> {
        let ip = Ipv4Packet::parse(eth.payload).ok_or(ForwardError::MalformedIpv4)?;
        if !ip.verify_checksum(eth.payload) {
            return Err(ForwardError::BadIpv4Checksum);
        }

        if self.config.nat_enabled && self.config.is_internal(ingress_interface) {
            self.handle_nat_internal_to_external(ingress_interface, eth, &ip);
        } else if self.config.nat_enabled && self.config.is_external(ingress_interface) {
            self.handle_nat_external_to_internal(ingress_interface, eth, &ip);
        } else {
            self.handle_ip_non_nat(ingress_interface, eth, &ip);
        }
        Ok(())
    }

    fn handle_ip_non_nat(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        if let Some(_local) = self.interfaces.by_local_ip(Ipv4Addr::from(ip.dst_ip)) {
            self.handle_local_delivery(ingress_interface, eth, ip);
            return;
        }

        if ip.ttl == 0 {
            self.reply_icmp_error(ingress_interface, eth, ip, ICMP_TIME_EXCEEDED, CODE_TTL_EXCEEDED);
            return;
        }

        match self.routes.lookup(Ipv4Addr::from(ip.dst_ip)) {
            None => self.reply_icmp_error(ingress_interface, eth, ip, ICMP_DEST_UNREACHABLE, CODE_NET_UNREACHABLE),
            Some(route) => self.egress(eth.payload.to_vec(), route, eth.src_mac),
        }
    }

    /// Traffic addressed to one of our own interfaces (spec.md §4.6).
    fn handle_local_delivery(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        match ip.protocol {
            PROTOCOL_TCP | PROTOCOL_UDP => {
                self.reply_icmp_error(ingress_interface, eth, ip, ICMP_DEST_UNREACHABLE, CODE_PORT_UNREACHABLE);
            }
            PROTOCOL_ICMP => self.handle_local_icmp(ingress_interface, eth, ip),
            other => log::debug!("dropping local traffic with unsupported protocol {} on {}", other, ingress_interface),
        }
    }

    fn handle_local_icmp(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        let Some(icmp) = IcmpPacket::parse(ip.payload) else { return };
        if icmp.icmp_type != ICMP_ECHO_REQUEST || icmp.code != 0 || ip.tos != 0 || !icmp.verify_checksum(ip.payload) {
            log::debug!("dropping unsupported local ICMP traffic on {}", ingress_interface);
            return;
        }

        let Some(iface) = self.interfaces.by_local_ip(Ipv4Addr::from(ip.dst_ip)) else { return };
        let reply_icmp = IcmpPacket::echo_reply(icmp.identifier, icmp.sequence, icmp.payload);
        let reply_ip = Ipv4Packet::build(iface.ip.octets(), ip.src_ip, DEFAULT_TTL, PROTOCOL_ICMP, &reply_icmp);
        self.send_reply_on_ingress(ingress_interface, eth, &reply_ip);
    }

    fn reply_icmp_error(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet, icmp_type: u8, code: u8) {
        let Some(iface) = self.interfaces.by_name(ingress_interface) else { return };
        let error = IcmpPacket::build_error(icmp_type, code, eth.payload);
        let reply_ip = Ipv4Packet::build(iface.ip.octets(), ip.src_ip, DEFAULT_TTL, PROTOCOL_ICMP, &error);
        self.send_reply_on_ingress(ingress_interface, eth, &reply_ip);
    }

    /// ICMP errors and echo replies go straight back out the interface the
    /// triggering packet arrived on, addressed to its sender — no route
    /// lookup, no ARP (the sender's MAC is already known from the frame).
    fn send_reply_on_ingress(&self, ingress_interface: &str, eth: &EthernetFrame, ip_packet: &[u8]) {
        let Some(iface) = self.interfaces.by_name(ingress_interface) else { return };
        let frame = EthernetFrame::build(&iface.mac, &eth.src_mac, ETHERTYPE_IPV4, ip_packet);
        self.link_layer.send_frame(iface.name, &frame);
    }

    // ---- §4.8 egress with ARP resolution -----------------------------------

    /// `original_src_mac` is the link-layer source address of the frame
    /// that produced `ip_packet` (the real host that sent it, before any
    /// NAT rewrite) — carried through so that, if ARP never resolves, the
    /// eventual ICMP host-unreachable (spec.md §4.3) can be addressed back
    /// to the true sender instead of this router's own egress MAC.
    fn egress(&self, ip_packet: Vec<u8>, route: Route, original_src_mac: [u8; 6]) {
        let Some(ip) = Ipv4Packet::parse(&ip_packet) else { return };
        let next_hop = route.next_hop(Ipv4Addr::from(ip.dst_ip));
        let Some(iface) = self.interfaces.by_name(route.interface) else { return };

        match self.arp.lookup(next_hop) {
            Some(mac) => {
                let mut frame = EthernetFrame::build(&iface.mac, &mac, ETHERTYPE_IPV4, &ip_packet);
                ipv4::decrement_ttl_and_rechecksum(&mut frame[ETHERNET_HEADER_SIZE..]);
                self.link_layer.send_frame(iface.name, &frame);
            }
            None => {
                let frame = EthernetFrame::build(&iface.mac, &[0; 6], ETHERTYPE_IPV4, &ip_packet);
                self.arp.queue(next_hop, frame, route.interface.to_string(), original_src_mac);
                self.arp.handle_request_now(next_hop);
            }
        }
    }

    // ---- §4.7 NAT translation ----------------------------------------------

    fn handle_nat_internal_to_external(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        if self.interfaces.by_local_ip(Ipv4Addr::from(ip.dst_ip)).is_some() {
            self.handle_local_delivery(ingress_interface, eth, ip);
            return;
        }
        if ip.ttl == 0 {
            self.reply_icmp_error(ingress_interface, eth, ip, ICMP_TIME_EXCEEDED, CODE_TTL_EXCEEDED);
            return;
        }

        if !matches!(ip.protocol, PROTOCOL_TCP | PROTOCOL_ICMP) {
            self.handle_ip_non_nat(ingress_interface, eth, ip);
            return;
        }

        // Confirm a route exists before allocating any NAT state (spec.md
        // §4.7: "if destination is ... unroutable externally, fall through
        // to non-NAT handling") — translate_outbound_tcp/icmp draw from the
        // finite external_aux pool and mutate TCP connection state, neither
        // of which should happen for a packet that's about to be dropped.
        let Some(route) = self.routes.lookup(Ipv4Addr::from(ip.dst_ip)) else {
            self.reply_icmp_error(ingress_interface, eth, ip, ICMP_DEST_UNREACHABLE, CODE_NET_UNREACHABLE);
            return;
        };

        let Some(external) = self.interfaces.by_name(&self.config.external_interface) else { return };

        let translated = match ip.protocol {
            PROTOCOL_TCP => self.translate_outbound_tcp(ip, external),
            PROTOCOL_ICMP => self.translate_outbound_icmp(ip, external),
            _ => unreachable!("filtered to TCP/ICMP above"),
        };

        match translated {
            NatTranslation::Translated(bytes) => self.egress(bytes, route, eth.src_mac),
            NatTranslation::NotApplicable => self.handle_ip_non_nat(ingress_interface, eth, ip),
            NatTranslation::ResourceExhausted => log::warn!(
                "NAT: external-aux pool exhausted, dropping outbound flow {}->{} on {}",
                Ipv4Addr::from(ip.src_ip),
                Ipv4Addr::from(ip.dst_ip),
                ingress_interface
            ),
        }
    }

    fn translate_outbound_tcp(&self, ip: &Ipv4Packet, external: Interface) -> NatTranslation {
        let Some(tcp) = TcpHeader::parse(ip.payload) else { return NatTranslation::NotApplicable };
        let is_outbound_syn = tcp.flags.syn && !tcp.flags.ack;

        let Some((mapping, held)) = self.nat.get_or_create_tcp_mapping(
            Ipv4Addr::from(ip.src_ip),
            tcp.src_port,
            Ipv4Addr::from(ip.dst_ip),
            tcp.dst_port,
            is_outbound_syn,
        ) else {
            return NatTranslation::ResourceExhausted;
        };

        self.nat.update_tcp_connection(
            Ipv4Addr::from(ip.src_ip),
            tcp.src_port,
            Ipv4Addr::from(ip.dst_ip),
            tcp.dst_port,
            tcp.flags,
            true,
        );
        if let Some(held) = held {
            self.release_held_syn_into_internal(&mapping, held);
        }

        let mut segment = ip.payload.to_vec();
        TcpHeader::rewrite_src_port(&mut segment, mapping.external_aux);
        tcp::recompute_checksum(external.ip.octets(), ip.dst_ip, &mut segment);
        NatTranslation::Translated(Ipv4Packet::build(external.ip.octets(), ip.dst_ip, ip.ttl, PROTOCOL_TCP, &segment))
    }

    /// When an internal SYN's mapping adopts an unsolicited external SYN
    /// that was being held for the same remote endpoint (spec.md §4.7.3,
    /// §8 scenario 6), release the held frame into the internal network
    /// translated to that mapping.
    fn release_held_syn_into_internal(&self, mapping: &NatMapping, held: HeldSyn) {
        let Some(held_eth) = EthernetFrame::parse(&held.frame) else { return };
        let Some(held_ip) = Ipv4Packet::parse(held_eth.payload) else { return };
        let Some(_) = TcpHeader::parse(held_ip.payload) else { return };

        let mut segment = held_ip.payload.to_vec();
        TcpHeader::rewrite_dst_port(&mut segment, mapping.internal_aux);
        tcp::recompute_checksum(held_ip.src_ip, mapping.internal_ip.octets(), &mut segment);
        let translated = Ipv4Packet::build(held_ip.src_ip, mapping.internal_ip.octets(), held_ip.ttl, PROTOCOL_TCP, &segment);

        match self.routes.lookup(mapping.internal_ip) {
            Some(route) => self.egress(translated, route, held_eth.src_mac),
            None => log::warn!("NAT: no route to release held SYN to {}", mapping.internal_ip),
        }
    }

    fn translate_outbound_icmp(&self, ip: &Ipv4Packet, external: Interface) -> NatTranslation {
        let Some(icmp) = IcmpPacket::parse(ip.payload) else { return NatTranslation::NotApplicable };
        if icmp.icmp_type != ICMP_ECHO_REQUEST {
            return NatTranslation::NotApplicable;
        }
        let Some(mapping) = self.nat.get_or_create_mapping(Ipv4Addr::from(ip.src_ip), icmp.identifier, NatKind::Icmp)
        else {
            return NatTranslation::ResourceExhausted;
        };
        let rewritten = IcmpPacket::echo_request(mapping.external_aux, icmp.sequence, icmp.payload);
        NatTranslation::Translated(Ipv4Packet::build(external.ip.octets(), ip.dst_ip, ip.ttl, PROTOCOL_ICMP, &rewritten))
    }

    fn handle_nat_external_to_internal(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        if ip.ttl == 0 {
            self.reply_icmp_error(ingress_interface, eth, ip, ICMP_TIME_EXCEEDED, CODE_TTL_EXCEEDED);
            return;
        }

        match ip.protocol {
            PROTOCOL_TCP => self.handle_nat_external_tcp(ingress_interface, eth, ip),
            PROTOCOL_ICMP => self.handle_nat_external_icmp(ingress_interface, eth, ip),
            _ => log::debug!("dropping unmapped external protocol {} on {}", ip.protocol, ingress_interface),
        }
    }

    fn handle_nat_external_tcp(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        let Some(tcp) = TcpHeader::parse(ip.payload) else { return };

        let mapping = match self.nat.lookup_external(tcp.dst_port, NatKind::Tcp) {
            Some(mapping) => mapping,
            None => {
                if tcp.flags.syn && !tcp.flags.ack {
                    self.nat.hold_unsolicited_syn(
                        tcp.dst_port,
                        Ipv4Addr::from(ip.src_ip),
                        tcp.src_port,
                        eth_frame_wrapping(eth, ip),
                        ingress_interface.to_string(),
                    );
                } else {
                    log::debug!("dropping external TCP segment with no NAT mapping on {}", ingress_interface);
                }
                return;
            }
        };

        self.nat.update_tcp_connection(
            mapping.internal_ip,
            mapping.internal_aux,
            Ipv4Addr::from(ip.src_ip),
            tcp.src_port,
            tcp.flags,
            false,
        );

        let mut segment = ip.payload.to_vec();
        TcpHeader::rewrite_dst_port(&mut segment, mapping.internal_aux);
        tcp::recompute_checksum(ip.src_ip, mapping.internal_ip.octets(), &mut segment);
        let translated = Ipv4Packet::build(ip.src_ip, mapping.internal_ip.octets(), ip.ttl, PROTOCOL_TCP, &segment);

        match self.routes.lookup(mapping.internal_ip) {
            Some(route) => self.egress(translated, route, eth.src_mac),
            None => log::warn!("NAT: no route back to internal host {}", mapping.internal_ip),
        }
    }

    fn handle_nat_external_icmp(&self, ingress_interface: &str, eth: &EthernetFrame, ip: &Ipv4Packet) {
        let Some(icmp) = IcmpPacket::parse(ip.payload) else { return };
        if icmp.icmp_type != ICMP_ECHO_REPLY {
            return;
        }
        let Some(mapping) = self.nat.lookup_external(icmp.identifier, NatKind::Icmp) else {
            log::debug!("dropping external ICMP reply with no NAT mapping on {}", ingress_interface);
            return;
        };

        let rewritten = IcmpPacket::echo_reply(mapping.internal_aux, icmp.sequence, icmp.payload);
        let translated = Ipv4Packet::build(ip.src_ip, mapping.internal_ip.octets(), ip.ttl, PROTOCOL_ICMP, &rewritten);

        match self.routes.lookup(mapping.internal_ip) {
            Some(route) => self.egress(translated, route, eth.src_mac),
            None => log::warn!("NAT: no route back to internal host {}", mapping.internal_ip),
        }
    }
}

/// Builds a deep-copied Ethernet frame around an IP packet view, for
/// stashing an unsolicited-SYN frame until it is matched or times out.
fn eth_frame_wrapping(eth: &EthernetFrame, ip: &Ipv4Packet) -> Vec<u8> {
    let ip_bytes_len = ip.header_len() + ip.payload.len();
    let mut ip_bytes = Vec::with_capacity(ip_bytes_len);
    ip_bytes.extend_from_slice(&eth.payload[..ip_bytes_len.min(eth.payload.len())]);
    EthernetFrame::build(&eth.src_mac, &eth.dst_mac, ETHERTYPE_IPV4, &ip_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::collab::StaticTables;
    use std::sync::Mutex as StdMutex;

    struct RecordingLink {
        sent: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingLink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingLink { sent: StdMutex::new(Vec::new()) })
        }
        fn frames_on(&self, interface: &str) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().iter().filter(|(i, _)| i == interface).map(|(_, f)| f.clone()).collect()
        }
    }

    impl LinkLayer for RecordingLink {
        fn send_frame(&self, interface: &str, frame: &[u8]) {
            self.sent.lock().unwrap().push((interface.to_string(), frame.to_vec()));
        }
    }

    const ETH1_MAC: [u8; 6] = [1, 1, 1, 1, 1, 1];
    const ETH2_MAC: [u8; 6] = [2, 2, 2, 2, 2, 2];
    const HOST_A_MAC: [u8; 6] = [0xAA; 6];
    const GATEWAY_MAC: [u8; 6] = [0xEE; 6];

    fn fixture() -> (Arc<FakeClock>, Arc<RecordingLink>, ForwardingEngine) {
        let clock = FakeClock::new();
        let link = RecordingLink::new();
        let tables = Arc::new(StaticTables::new(
            vec![
                Interface { name: "eth1", mac: ETH1_MAC, ip: Ipv4Addr::new(10, 0, 0, 1) },
                Interface { name: "eth2", mac: ETH2_MAC, ip: Ipv4Addr::new(192, 168, 1, 1) },
            ],
            vec![Route {
                destination: Ipv4Addr::new(0, 0, 0, 0),
                mask: Ipv4Addr::new(0, 0, 0, 0),
                gateway: Ipv4Addr::new(192, 168, 1, 2),
                interface: "eth2",
            }],
        ));
        let engine = ForwardingEngine::new(Config::default(), tables.clone(), tables, link.clone(), clock.clone());
        (clock, link, engine)
    }

    fn ip_frame(src_mac: [u8; 6], dst_mac: [u8; 6], src_ip: [u8; 4], dst_ip: [u8; 4], ttl: u8, protocol: u8, payload: &[u8]) -> Vec<u8> {
        let ip_packet = Ipv4Packet::build(src_ip, dst_ip, ttl, protocol, payload);
        EthernetFrame::build(&src_mac, &dst_mac, ETHERTYPE_IPV4, &ip_packet)
    }

    #[test]
    fn arp_resolve_then_forward() {
        let (_clock, link, engine) = fixture();
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 0, 2], [203, 0, 113, 9], 10, PROTOCOL_UDP, &[1, 2, 3]);
        engine.receive_frame("eth1", &frame);

        let probes = link.frames_on("eth2");
        assert_eq!(probes.len(), 1);
        let probe = ArpPacket::parse(&EthernetFrame::parse(&probes[0]).unwrap().payload).unwrap();
        assert_eq!(probe.operation, ARP_OP_REQUEST);
        assert_eq!(probe.target_ip_addr(), Ipv4Addr::new(192, 168, 1, 2));

        let arp_reply = ArpPacket::build(ARP_OP_REPLY, &GATEWAY_MAC, &[192, 168, 1, 2], &ETH2_MAC, &[192, 168, 1, 1]);
        let reply_frame = EthernetFrame::build(&GATEWAY_MAC, &ETH2_MAC, ETHERTYPE_ARP, &arp_reply);
        engine.receive_frame("eth2", &reply_frame);

        let forwarded = link.frames_on("eth2");
        let data_frame = forwarded.iter().find(|f| f.len() != probes[0].len()).expect("forwarded data frame");
        let eth = EthernetFrame::parse(data_frame).unwrap();
        assert_eq!(eth.src_mac, ETH2_MAC);
        assert_eq!(eth.dst_mac, GATEWAY_MAC);
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        assert_eq!(ip.ttl, 9);
        assert!(ip.verify_checksum(eth.payload));
    }

    #[test]
    fn arp_timeout_yields_host_unreachable() {
        let (clock, link, engine) = fixture();
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 0, 2], [203, 0, 113, 9], 10, PROTOCOL_UDP, &[9, 9]);
        engine.receive_frame("eth1", &frame);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            engine.tick();
        }

        let frames = link.frames_on("eth2");
        let icmp_frame = frames.last().unwrap();
        let eth = EthernetFrame::parse(icmp_frame).unwrap();
        assert_eq!(eth.dst_mac, HOST_A_MAC);
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        let icmp = IcmpPacket::parse(ip.payload).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_DEST_UNREACHABLE);
        assert_eq!(icmp.code, CODE_HOST_UNREACHABLE);
    }

    #[test]
    fn router_echoes_ping_to_its_own_interface() {
        let (_clock, link, engine) = fixture();
        let echo = IcmpPacket::echo_request(0x55, 1, &[1, 2, 3, 4]);
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 0, 2], [10, 0, 0, 1], 64, PROTOCOL_ICMP, &echo);
        engine.receive_frame("eth1", &frame);

        let replies = link.frames_on("eth1");
        assert_eq!(replies.len(), 1);
        let eth = EthernetFrame::parse(&replies[0]).unwrap();
        assert_eq!(eth.dst_mac, HOST_A_MAC);
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        assert_eq!(ip.src_ip, [10, 0, 0, 1]);
        assert_eq!(ip.dst_ip, [10, 0, 0, 2]);
        assert_eq!(ip.ttl, DEFAULT_TTL);
        let icmp = IcmpPacket::parse(ip.payload).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(icmp.identifier, 0x55);
        assert!(icmp.verify_checksum(ip.payload));
    }

    #[test]
    fn ttl_expiry_on_transit_sends_time_exceeded() {
        let (_clock, link, engine) = fixture();
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 0, 2], [203, 0, 113, 9], 0, PROTOCOL_UDP, &[0; 4]);
        engine.receive_frame("eth1", &frame);

        let replies = link.frames_on("eth1");
        assert_eq!(replies.len(), 1);
        let eth = EthernetFrame::parse(&replies[0]).unwrap();
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        let icmp = IcmpPacket::parse(ip.payload).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_TIME_EXCEEDED);
        assert_eq!(icmp.code, CODE_TTL_EXCEEDED);
        assert!(link.frames_on("eth2").is_empty());
    }

    #[test]
    fn non_nat_tcp_with_route_forwards_instead_of_port_unreachable() {
        let (_clock, link, engine) = fixture();
        let segment = tcp::build_tcp_segment(
            [10, 0, 0, 2],
            [203, 0, 113, 9],
            5555,
            80,
            0,
            0,
            tcp::TcpFlags { syn: true, ..Default::default() },
            0,
            &[],
        );
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 0, 2], [203, 0, 113, 9], 10, PROTOCOL_TCP, &segment);
        engine.receive_frame("eth1", &frame);

        assert!(link.frames_on("eth1").is_empty());
        assert_eq!(link.frames_on("eth2").len(), 1); // ARP probe, not ICMP port-unreachable
    }

    /// spec.md §4.7: an internal packet to an unroutable destination must
    /// fall through to non-NAT handling (here: no route at all, so an ICMP
    /// net-unreachable) *before* any NAT state is touched — no mapping
    /// should be left behind pinning an external_aux for a packet that was
    /// never actually translated.
    #[test]
    fn nat_outbound_with_no_route_does_not_allocate_mapping() {
        let clock = FakeClock::new();
        let link = RecordingLink::new();
        let tables = Arc::new(StaticTables::new(
            vec![
                Interface { name: "eth1", mac: ETH1_MAC, ip: Ipv4Addr::new(10, 0, 1, 1) },
                Interface { name: "eth2", mac: ETH2_MAC, ip: Ipv4Addr::new(76, 1, 2, 3) },
            ],
            vec![],
        ));
        let config = Config {
            nat_enabled: true,
            internal_interface: "eth1".to_string(),
            external_interface: "eth2".to_string(),
            ..Config::default()
        };
        let engine = ForwardingEngine::new(config, tables.clone(), tables, link.clone(), clock);

        let echo = IcmpPacket::echo_request(0x1234, 1, &[1, 2, 3, 4]);
        let frame = ip_frame(HOST_A_MAC, ETH1_MAC, [10, 0, 1, 5], [8, 8, 8, 8], 10, PROTOCOL_ICMP, &echo);
        engine.receive_frame("eth1", &frame);

        let replies = link.frames_on("eth1");
        assert_eq!(replies.len(), 1);
        let eth = EthernetFrame::parse(&replies[0]).unwrap();
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        let icmp = IcmpPacket::parse(ip.payload).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_DEST_UNREACHABLE);
        assert_eq!(icmp.code, CODE_NET_UNREACHABLE);

        assert!(engine.nat.lookup_internal(Ipv4Addr::new(10, 0, 1, 5), 0x1234, NatKind::Icmp).is_none());
    }
}
