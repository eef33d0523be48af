//! Router configuration: the two switches from spec.md §6 (NAT on/off,
//! internal/external interface names) plus the named timeout constants.

use std::time::Duration;

/// Runtime configuration for the forwarding engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether NAT translation (spec.md §4.7) is enabled.
    pub nat_enabled: bool,
    /// The interface treated as "internal" when NAT is enabled.
    pub internal_interface: String,
    /// The interface treated as "external" when NAT is enabled.
    pub external_interface: String,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nat_enabled: false,
            internal_interface: "eth1".to_string(),
            external_interface: "eth2".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    pub fn is_internal(&self, interface: &str) -> bool {
        self.nat_enabled && interface == self.internal_interface
    }

    pub fn is_external(&self, interface: &str) -> bool {
        self.nat_enabled && interface == self.external_interface
    }
}

/// Named timeout constants (spec.md §6, §4.7.3).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// ARP cache entry TTL.
    pub arp_entry_ttl: Duration,
    /// Interval between ARP request retries.
    pub arp_retry_interval: Duration,
    /// Number of ARP retries before giving up.
    pub arp_max_attempts: u8,
    /// Idle reap timeout for ICMP NAT mappings with no open connections.
    pub icmp_mapping_idle: Duration,
    /// Idle reap timeout for TCP connections in `ESTABLISHED`.
    pub tcp_established_idle: Duration,
    /// Idle reap timeout for TCP connections in a transitory state.
    pub tcp_transitory_idle: Duration,
    /// How long an unsolicited external SYN is held waiting for a matching
    /// internal SYN before an ICMP port-unreachable is sent.
    pub unsolicited_syn_hold: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            arp_entry_ttl: Duration::from_secs(15),
            arp_retry_interval: Duration::from_secs(1),
            arp_max_attempts: 5,
            icmp_mapping_idle: Duration::from_secs(60),
            tcp_established_idle: Duration::from_secs(7440),
            tcp_transitory_idle: Duration::from_secs(300),
            unsolicited_syn_hold: Duration::from_secs(6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_classification_requires_nat_enabled() {
        let mut config = Config::default();
        assert!(!config.is_internal("eth1"));
        config.nat_enabled = true;
        assert!(config.is_internal("eth1"));
        assert!(config.is_external("eth2"));
        assert!(!config.is_internal("eth2"));
    }
}
