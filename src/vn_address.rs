use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::vn_error::TopologyError;

/// IPv4 prefix: a base address plus a contiguous mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet {
    base: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Build from a dotted mask such as `255.255.255.0`
    pub fn new(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, TopologyError> {
        let m = u32::from(mask);
        if m.leading_ones() + m.trailing_zeros() != 32 {
            return Err(TopologyError::InvalidSubnet { base, mask });
        }
        if u32::from(base) & !m != 0 {
            return Err(TopologyError::InvalidSubnet { base, mask });
        }
        Ok(Self {
            base,
            prefix_len: m.leading_ones() as u8,
        })
    }

    pub fn with_prefix(base: Ipv4Addr, prefix_len: u8) -> Result<Self, TopologyError> {
        if prefix_len > 32 {
            return Err(TopologyError::InvalidSubnet {
                base,
                mask: Ipv4Addr::new(255, 255, 255, 255),
            });
        }
        Self::new(base, Ipv4Addr::from(mask_bits(prefix_len)))
    }

    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix_len))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.prefix_len) == u32::from(self.base)
    }

    /// Number of assignable host addresses.
    ///
    /// Network and broadcast addresses are excluded, except on /31 and /32
    /// where every address is usable.
    pub fn host_capacity(&self) -> u32 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            p => ((1u64 << (32 - p)) - 2) as u32,
        }
    }

    /// The `n`-th host address (1-based), or None past the capacity
    pub fn nth_host(&self, n: u32) -> Option<Ipv4Addr> {
        if n == 0 || n > self.host_capacity() {
            return None;
        }
        let offset = if self.prefix_len >= 31 { n - 1 } else { n };
        Some(Ipv4Addr::from(u32::from(self.base) + offset))
    }
}

fn mask_bits(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = String;

    /// Parse CIDR notation, e.g. `10.1.1.0/24`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, len) = s
            .split_once('/')
            .ok_or_else(|| format!("expected CIDR prefix, got '{}'", s))?;
        let base: Ipv4Addr = base
            .trim()
            .parse()
            .map_err(|e| format!("bad prefix base '{}': {}", base, e))?;
        let len: u8 = len
            .trim()
            .parse()
            .map_err(|e| format!("bad prefix length '{}': {}", len, e))?;
        Subnet::with_prefix(base, len).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_from_mask() {
        let s = Subnet::new(Ipv4Addr::new(10, 1, 1, 0), Ipv4Addr::new(255, 255, 255, 0)).unwrap();
        assert_eq!(s.prefix_len(), 24);
        assert_eq!(s.to_string(), "10.1.1.0/24");
        assert!(s.contains(Ipv4Addr::new(10, 1, 1, 200)));
        assert!(!s.contains(Ipv4Addr::new(10, 1, 2, 1)));
    }

    #[test]
    fn test_rejects_non_contiguous_mask() {
        let r = Subnet::new(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 255, 0));
        assert!(matches!(r, Err(TopologyError::InvalidSubnet { .. })));
    }

    #[test]
    fn test_rejects_host_bits_in_base() {
        let r = Subnet::new(Ipv4Addr::new(10, 1, 1, 5), Ipv4Addr::new(255, 255, 255, 0));
        assert!(matches!(r, Err(TopologyError::InvalidSubnet { .. })));
    }

    #[test]
    fn test_host_capacity_and_hosts() {
        let s24: Subnet = "10.1.1.0/24".parse().unwrap();
        assert_eq!(s24.host_capacity(), 254);
        assert_eq!(s24.nth_host(1), Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(s24.nth_host(254), Some(Ipv4Addr::new(10, 1, 1, 254)));
        assert_eq!(s24.nth_host(255), None);
        assert_eq!(s24.nth_host(0), None);

        let s30: Subnet = "192.168.0.4/30".parse().unwrap();
        assert_eq!(s30.host_capacity(), 2);
        assert_eq!(s30.nth_host(2), Some(Ipv4Addr::new(192, 168, 0, 6)));

        let s31: Subnet = "192.168.0.0/31".parse().unwrap();
        assert_eq!(s31.nth_host(1), Some(Ipv4Addr::new(192, 168, 0, 0)));

        let s0: Subnet = "0.0.0.0/0".parse().unwrap();
        assert_eq!(s0.host_capacity(), u32::MAX - 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!("10.1.1.0".parse::<Subnet>().is_err());
        assert!("10.1.1.0/33".parse::<Subnet>().is_err());
        assert!("10.1.1.x/24".parse::<Subnet>().is_err());
    }
}
