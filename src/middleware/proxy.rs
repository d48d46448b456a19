//! Trusted reverse-proxy ranges.
//!
//! Forwarding headers are only believed when the TCP peer itself sits inside
//! one of these ranges. With no ranges configured, no peer is trusted and the
//! socket address is always the client identity.

use std::net::IpAddr;

use tracing::{debug, warn};

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`"10.0.0.0/8"`, `"::1/128"`) or a bare address.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    #[cfg(test)]
    fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an IP address is contained within this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Set of proxies whose forwarding headers identify the real client.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `peer` is one of the configured proxies.
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(peer))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len(), 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len(), 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len(), 32);
        assert_eq!(CidrRange::parse(" fd00::/8 ").unwrap().prefix_len(), 8);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/abc").is_none());
        assert!(CidrRange::parse("10.0.0.0/8/1").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let range = CidrRange::parse("192.168.1.0/24").unwrap();
        assert!(range.contains(&ip("192.168.1.254")));
        assert!(!range.contains(&ip("192.168.2.1")));
        assert!(!range.contains(&ip("::1")));

        let everything = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(everything.contains(&ip("8.8.8.8")));
    }

    #[test]
    fn test_empty_config_trusts_nobody() {
        let config = TrustedProxyConfig::new(&[]);
        assert!(!config.is_enabled());
        assert!(!config.is_trusted(&ip("127.0.0.1")));
    }

    #[test]
    fn test_config_skips_invalid_entries() {
        let config =
            TrustedProxyConfig::new(&["10.0.0.0/8".to_string(), "garbage".to_string()]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&ip("10.1.2.3")));
        assert!(!config.is_trusted(&ip("172.16.0.1")));
    }
}
