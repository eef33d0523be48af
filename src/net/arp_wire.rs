//! ARP packet parsing and construction (RFC 826)

use std::net::Ipv4Addr;

/// ARP hardware type for Ethernet
pub const ARP_HTYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4
pub const ARP_PTYPE_IPV4: u16 = 0x0800;

/// ARP operation: request
pub const ARP_OP_REQUEST: u16 = 1;

/// ARP operation: reply
pub const ARP_OP_REPLY: u16 = 2;

/// ARP packet size for Ethernet/IPv4 (no padding)
pub const ARP_PACKET_SIZE: usize = 28;

/// Parsed ARP packet. IPv4 addresses stay in network byte order end to end
/// (4-byte big-endian arrays), matching the wire and avoiding the
/// host/network-order confusion noted against the original implementation.
#[derive(Debug, Clone, Copy)]
pub struct ArpPacket {
    pub htype: u16,
    pub ptype: u16,
    pub hlen: u8,
    pub plen: u8,
    pub operation: u16,
    pub sender_mac: [u8; 6],
    pub sender_ip: [u8; 4],
    pub target_mac: [u8; 6],
    pub target_ip: [u8; 4],
}

impl ArpPacket {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ARP_PACKET_SIZE {
            return None;
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        let operation = u16::from_be_bytes([data[6], data[7]]);

        if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return None;
        }

        let sender_mac = [data[8], data[9], data[10], data[11], data[12], data[13]];
        let sender_ip = [data[14], data[15], data[16], data[17]];
        let target_mac = [data[18], data[19], data[20], data[21], data[22], data[23]];
        let target_ip = [data[24], data[25], data[26], data[27]];

        Some(ArpPacket {
            htype,
            ptype,
            hlen,
            plen,
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn build(
        operation: u16,
        sender_mac: &[u8; 6],
        sender_ip: &[u8; 4],
        target_mac: &[u8; 6],
        target_ip: &[u8; 4],
    ) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ARP_PACKET_SIZE);

        packet.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        packet.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        packet.push(6);
        packet.push(4);
        packet.extend_from_slice(&operation.to_be_bytes());
        packet.extend_from_slice(sender_mac);
        packet.extend_from_slice(sender_ip);
        packet.extend_from_slice(target_mac);
        packet.extend_from_slice(target_ip);

        packet
    }

    pub fn sender_ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.sender_ip)
    }

    pub fn target_ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.target_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_request() {
        let sender_mac = [1, 2, 3, 4, 5, 6];
        let sender_ip = [10, 0, 0, 1];
        let target_ip = [10, 0, 0, 2];
        let built = ArpPacket::build(ARP_OP_REQUEST, &sender_mac, &sender_ip, &[0; 6], &target_ip);
        let parsed = ArpPacket::parse(&built).unwrap();
        assert_eq!(parsed.operation, ARP_OP_REQUEST);
        assert_eq!(parsed.sender_mac, sender_mac);
        assert_eq!(parsed.sender_ip, sender_ip);
        assert_eq!(parsed.target_ip, target_ip);
    }

    #[test]
    fn rejects_non_ethernet_ipv4() {
        let mut packet = ArpPacket::build(ARP_OP_REPLY, &[0; 6], &[0; 4], &[0; 6], &[0; 4]);
        packet[5] = 6; // protocol address length wrong for IPv4
        assert!(ArpPacket::parse(&packet).is_none());
    }

    #[test]
    fn rejects_short_packet() {
        assert!(ArpPacket::parse(&[0u8; 10]).is_none());
    }
}
