use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 CIDR range that mutating requests must originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: u32,
    mask: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid CIDR: {0}")]
pub struct ParseSubnetError(String);

impl FromStr for TrustedSubnet {
    type Err = ParseSubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| ParseSubnetError(s.to_string()))?;

        let addr: Ipv4Addr = addr.parse().map_err(|_| ParseSubnetError(s.to_string()))?;
        let prefix: u32 = prefix.parse().map_err(|_| ParseSubnetError(s.to_string()))?;
        if prefix > 32 {
            return Err(ParseSubnetError(s.to_string()));
        }

        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Ok(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }
}

impl TrustedSubnet {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask == self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_follows_the_mask() {
        let subnet: TrustedSubnet = "192.168.1.0/24".parse().unwrap();

        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 254)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 2, 1)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn zero_prefix_matches_everything() {
        let subnet: TrustedSubnet = "0.0.0.0/0".parse().unwrap();
        assert!(subnet.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn host_prefix_matches_one_address() {
        let subnet: TrustedSubnet = "10.1.2.3/32".parse().unwrap();
        assert!(subnet.contains(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 1, 2, 4)));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for bad in ["192.168.1.0", "192.168.1.0/33", "not-a-net/8", "10.0.0.0/x"] {
            assert!(bad.parse::<TrustedSubnet>().is_err(), "{bad} parsed");
        }
    }
}
