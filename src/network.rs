//! CIDR network descriptors
//!
//! A [`Network`] is a validated base address plus prefix length. Parsing
//! masks off host bits, so `10.1.2.3/8` and `10.0.0.0/8` describe the same
//! network.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// A validated CIDR prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network {
    addr: IpAddr,
    prefix_len: u8,
}

impl Network {
    /// Create a network, masking host bits beyond `prefix_len`
    ///
    /// Returns `None` if the prefix is longer than the address family allows.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        let addr = match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return None;
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix_len)))
            }
            IpAddr::V6(v6) => {
                if prefix_len > 128 {
                    return None;
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix_len)))
            }
        };
        Some(Self { addr, prefix_len })
    }

    /// Network base address (host bits cleared)
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// True for IPv4 networks
    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// True if `ip` falls inside this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(base), IpAddr::V4(ip)) => {
                u32::from(ip) & v4_mask(self.prefix_len) == u32::from(base)
            }
            (IpAddr::V6(base), IpAddr::V6(ip)) => {
                u128::from(ip) & v6_mask(self.prefix_len) == u128::from(base)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Error returned when CIDR text cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParseError(String);

impl fmt::Display for NetworkParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NetworkParseError {}

impl FromStr for Network {
    type Err = NetworkParseError;

    /// Parse `address/prefix` notation
    ///
    /// The prefix must be plain decimal digits. A bare address without a
    /// prefix is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, prefix_str) = s
            .split_once('/')
            .ok_or_else(|| NetworkParseError("missing '/' prefix separator".to_string()))?;

        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| NetworkParseError(format!("invalid IP address {:?}", addr_str)))?;

        if prefix_str.is_empty() || !prefix_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NetworkParseError(format!(
                "invalid prefix length {:?}",
                prefix_str
            )));
        }

        let max_prefix: u8 = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = prefix_str
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= max_prefix)
            .ok_or_else(|| {
                NetworkParseError(format!(
                    "prefix length {} exceeds {} for {}",
                    prefix_str,
                    max_prefix,
                    if addr.is_ipv4() { "IPv4" } else { "IPv6" }
                ))
            })?;

        // Prefix already range-checked above
        Network::new(addr, prefix_len)
            .ok_or_else(|| NetworkParseError(format!("invalid prefix length {}", prefix_len)))
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - prefix_len)
    }
}

fn v6_mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        !0u128 << (128 - prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_cidr() {
        let net: Network = "1.2.3.0/24".parse().unwrap();
        assert_eq!(net.addr(), "1.2.3.0".parse::<IpAddr>().unwrap());
        assert_eq!(net.prefix_len(), 24);
        assert!(net.is_ipv4());
        assert_eq!(net.to_string(), "1.2.3.0/24");
    }

    #[test]
    fn test_parse_ipv6_cidr() {
        let net: Network = "2001:db8::/32".parse().unwrap();
        assert!(!net.is_ipv4());
        assert_eq!(net.prefix_len(), 32);
        assert_eq!(net.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_host_bits_are_masked() {
        let net: Network = "10.1.2.3/8".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");

        let net: Network = "2001:db8:ffff::1/32".parse().unwrap();
        assert_eq!(net.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_zero_and_full_prefixes() {
        assert_eq!("0.0.0.0/0".parse::<Network>().unwrap().prefix_len(), 0);
        assert_eq!("8.8.8.8/32".parse::<Network>().unwrap().to_string(), "8.8.8.8/32");
        assert_eq!("::/0".parse::<Network>().unwrap().prefix_len(), 0);
        assert_eq!("::1/128".parse::<Network>().unwrap().prefix_len(), 128);
    }

    #[test]
    fn test_rejects_malformed_input() {
        for bad in [
            "",
            "1.2.3.0",
            "1.2.3.0/",
            "1.2.3.0/33",
            "1.2.3.0/+24",
            "1.2.3.0/-1",
            "1.2.3.0/ 24",
            "1.2.3/24",
            "256.0.0.0/8",
            "2001:db8::/129",
            "not-an-ip/8",
            "1.2.3.0/24/1",
        ] {
            assert!(bad.parse::<Network>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_contains() {
        let net: Network = "192.168.0.0/16".parse().unwrap();
        assert!(net.contains("192.168.44.1".parse().unwrap()));
        assert!(!net.contains("192.169.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));
    }
}
