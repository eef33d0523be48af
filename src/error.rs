//! Internal error taxonomy (spec.md §7). None of these ever propagate out
//! of the forwarding engine to a caller — the engine matches on them and
//! turns each into a drop, a log line, or an ICMP error frame.

use thiserror::Error;

/// Why a frame was dropped or could not be forwarded as-is. Matched
/// internally by [`crate::engine::ForwardingEngine`]; never surfaced.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    #[error("frame too short to be a valid Ethernet+ARP/IP frame")]
    FrameTooShort,
    #[error("unsupported EtherType")]
    UnsupportedEtherType,
    #[error("malformed IPv4 header")]
    MalformedIpv4,
    #[error("IPv4 header checksum mismatch")]
    BadIpv4Checksum,
}
