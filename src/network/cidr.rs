//! IPv4 CIDR blocks and subdivision.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Smallest block that can hold a subnet (16 addresses).
pub const MIN_SUBNET_PREFIX: u8 = 28;

/// `10.0.0.0/16`
pub const DEFAULT_VPC_CIDR: Ipv4Cidr = Ipv4Cidr {
    address: Ipv4Addr::new(10, 0, 0, 0),
    prefix_len: 16,
};

/// An aligned IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Create a CIDR block. The address must be the network address.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::invalid_cidr(
                format!("{}/{}", address, prefix_len),
                "IPv4 prefix length must be <= 32",
            ));
        }
        let cidr = Self {
            address,
            prefix_len,
        };
        if u32::from(address) & !cidr.mask() != 0 {
            return Err(Error::invalid_cidr(
                cidr.to_string(),
                format!(
                    "host bits are set; the network address is {}",
                    Ipv4Addr::from(u32::from(address) & cidr.mask())
                ),
            ));
        }
        Ok(cidr)
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len)
        }
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len)
    }

    /// Last address in the block
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.address)
    }

    /// Whether `other` lies entirely within this block
    pub fn contains_cidr(&self, other: &Ipv4Cidr) -> bool {
        other.prefix_len >= self.prefix_len && self.contains(other.address)
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other.address) || other.contains(self.address)
    }

    /// Split into `2^new_bits` equal child blocks, in address order.
    pub fn subdivide(&self, new_bits: u8) -> Result<Vec<Ipv4Cidr>> {
        let prefix = self.prefix_len as u32 + new_bits as u32;
        if prefix > 32 {
            return Err(Error::invalid_cidr(
                self.to_string(),
                format!("cannot add {} bits to a /{} block", new_bits, self.prefix_len),
            ));
        }
        let prefix = prefix as u8;
        let step = 1u64 << (32 - prefix);
        let base = u32::from(self.address) as u64;

        (0..(1u64 << new_bits))
            .map(|i| Ipv4Cidr::new(Ipv4Addr::from((base + i * step) as u32), prefix))
            .collect()
    }

    /// The `index`-th child block after adding `new_bits` bits.
    pub fn nth_subnet(&self, new_bits: u8, index: u32) -> Result<Ipv4Cidr> {
        let prefix = self.prefix_len as u32 + new_bits as u32;
        if prefix > 32 {
            return Err(Error::invalid_cidr(
                self.to_string(),
                format!("cannot add {} bits to a /{} block", new_bits, self.prefix_len),
            ));
        }
        let children = 1u64 << new_bits;
        if index as u64 >= children {
            return Err(Error::invalid_cidr(
                self.to_string(),
                format!("subnet index {} out of range for {} children", index, children),
            ));
        }
        let prefix = prefix as u8;
        let step = 1u64 << (32 - prefix as u32);
        let base = u32::from(self.address) as u64;
        Ipv4Cidr::new(Ipv4Addr::from((base + index as u64 * step) as u32), prefix)
    }

    /// Bits needed to split a block into at least `count` pieces.
    pub fn bits_for(count: usize) -> u8 {
        count
            .max(1)
            .checked_next_power_of_two()
            .map_or(usize::BITS, |n| n.trailing_zeros()) as u8
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_cidr(s, "expected a.b.c.d/n notation"))?;

        let address = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| Error::invalid_cidr(s, format!("invalid IPv4 address: {}", e)))?;

        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|e| Error::invalid_cidr(s, format!("invalid prefix length: {}", e)))?;

        Self::new(address, prefix_len)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert_eq!(cidr.prefix_len(), 16);
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
        assert_eq!(cidr.size(), 65536);
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 0, 255, 255));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["10.0.0.0", "10.0.0/16", "10.0.0.0/33", "300.0.0.0/8", "10.0.0.0/x"] {
            assert!(
                matches!(bad.parse::<Ipv4Cidr>(), Err(Error::InvalidCidr { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_host_bits() {
        let err = "10.0.0.1/16".parse::<Ipv4Cidr>().unwrap_err();
        assert!(err.to_string().contains("10.0.0.0"));
    }

    #[test]
    fn test_subdivide() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let halves = cidr.subdivide(1).unwrap();
        assert_eq!(halves.len(), 2);
        assert_eq!(halves[0].to_string(), "10.0.0.0/17");
        assert_eq!(halves[1].to_string(), "10.0.128.0/17");

        let quarters = halves[1].subdivide(2).unwrap();
        assert_eq!(quarters[3].to_string(), "10.0.224.0/19");
        assert!(quarters.iter().all(|q| halves[1].contains_cidr(q)));
    }

    #[test]
    fn test_nth_subnet_matches_subdivide() {
        let cidr: Ipv4Cidr = "172.16.0.0/20".parse().unwrap();
        let all = cidr.subdivide(3).unwrap();
        for (i, child) in all.iter().enumerate() {
            assert_eq!(cidr.nth_subnet(3, i as u32).unwrap(), *child);
        }
        assert!(cidr.nth_subnet(3, 8).is_err());
    }

    #[test]
    fn test_overlaps() {
        let a: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let b: Ipv4Cidr = "10.0.4.0/24".parse().unwrap();
        let c: Ipv4Cidr = "10.1.0.0/16".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_bits_for() {
        assert_eq!(Ipv4Cidr::bits_for(1), 0);
        assert_eq!(Ipv4Cidr::bits_for(2), 1);
        assert_eq!(Ipv4Cidr::bits_for(3), 2);
        assert_eq!(Ipv4Cidr::bits_for(4), 2);
        assert_eq!(Ipv4Cidr::bits_for(5), 3);
        assert_eq!(Ipv4Cidr::bits_for(usize::MAX), usize::BITS as u8);
    }

    #[test]
    fn test_serde_as_string() {
        let cidr: Ipv4Cidr = serde_json::from_str("\"10.0.0.0/16\"").unwrap();
        assert_eq!(serde_json::to_string(&cidr).unwrap(), "\"10.0.0.0/16\"");
    }
}
