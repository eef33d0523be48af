//! Wire codecs: Ethernet, ARP, IPv4, ICMP, TCP.
//!
//! Every parser here validates minimum length and returns a typed,
//! borrowed view over the input; every builder writes network byte order
//! and returns an owned `Vec<u8>`. None of these mutate their input except
//! the explicit in-place helpers (`ipv4::decrement_ttl_and_rechecksum`,
//! `tcp::recompute_checksum`, `ethernet::EthernetFrame::rewrite_macs`),
//! which callers use deliberately when forwarding an owned copy of a frame.

pub mod arp_wire;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
