//! Ethernet II frame parsing and construction
//!
//! Implements IEEE 802.3 Ethernet II framing used as the outermost layer
//! for every frame the forwarding engine handles.

/// Ethernet frame header size (without VLAN tag)
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Minimum Ethernet frame size (excluding FCS)
pub const ETHERNET_MIN_SIZE: usize = 60;

/// Maximum Ethernet payload size (MTU)
#[allow(dead_code)]
pub const ETHERNET_MTU: usize = 1500;

/// Broadcast MAC address
pub const BROADCAST_MAC: [u8; 6] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// EtherType for ARP
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// EtherType for IPv6 (unsupported, dropped on sight)
#[allow(dead_code)]
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Parsed Ethernet frame
#[derive(Debug, Clone)]
pub struct EthernetFrame<'a> {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: u16,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Parse an Ethernet frame from raw bytes. Returns `None` if the frame
    /// is too short to carry a valid Ethernet header.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < ETHERNET_HEADER_SIZE {
            return None;
        }

        let dst_mac = [data[0], data[1], data[2], data[3], data[4], data[5]];
        let src_mac = [data[6], data[7], data[8], data[9], data[10], data[11]];
        let ethertype = u16::from_be_bytes([data[12], data[13]]);

        Some(EthernetFrame {
            dst_mac,
            src_mac,
            ethertype,
            payload: &data[ETHERNET_HEADER_SIZE..],
        })
    }

    /// Build an Ethernet frame, padding to the minimum frame size.
    pub fn build(src_mac: &[u8; 6], dst_mac: &[u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + payload.len());

        frame.extend_from_slice(dst_mac);
        frame.extend_from_slice(src_mac);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);

        while frame.len() < ETHERNET_MIN_SIZE {
            frame.push(0);
        }

        frame
    }

    /// Overwrite the source and destination MAC fields of an owned frame
    /// buffer in place, leaving the rest of the frame untouched.
    pub fn rewrite_macs(frame: &mut [u8], src_mac: &[u8; 6], dst_mac: &[u8; 6]) {
        if frame.len() < ETHERNET_HEADER_SIZE {
            return;
        }
        frame[0..6].copy_from_slice(dst_mac);
        frame[6..12].copy_from_slice(src_mac);
    }
}

/// Check if a MAC address is the broadcast address
pub fn is_broadcast(mac: &[u8; 6]) -> bool {
    *mac == BROADCAST_MAC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let src = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let dst = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
        let payload = [1, 2, 3, 4];
        let built = EthernetFrame::build(&src, &dst, ETHERTYPE_IPV4, &payload);
        let parsed = EthernetFrame::parse(&built).unwrap();
        assert_eq!(parsed.src_mac, src);
        assert_eq!(parsed.dst_mac, dst);
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
        assert_eq!(&parsed.payload[..4], &payload);
    }

    #[test]
    fn pads_to_minimum_frame_size() {
        let built = EthernetFrame::build(&[0; 6], &[0; 6], ETHERTYPE_ARP, &[]);
        assert_eq!(built.len(), ETHERNET_MIN_SIZE);
    }

    #[test]
    fn rejects_short_frames() {
        assert!(EthernetFrame::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn broadcast_detection() {
        assert!(is_broadcast(&BROADCAST_MAC));
        assert!(!is_broadcast(&[1, 2, 3, 4, 5, 6]));
    }
}
