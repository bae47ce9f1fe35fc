use std::net::Ipv4Addr;

use errors::ErrorMetadata;

/// An inclusive range of IPv4 addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IpRange {
    pub first: u32,
    pub last: u32,
}

impl IpRange {
    pub fn single(ip: u32) -> Self {
        Self { first: ip, last: ip }
    }

    pub fn contains(&self, ip: u32) -> bool {
        self.first <= ip && ip <= self.last
    }
}

fn invalid_address(input: &str) -> anyhow::Error {
    ErrorMetadata::bad_request("InvalidAddress", format!("invalid IPv4 address: {input}")).into()
}

/// Parse a dotted-quad IPv4 address into its 32-bit value. Octets outside
/// 0..=255 (and anything that isn't four decimal octets) are rejected.
pub fn parse_ipv4(s: &str) -> anyhow::Result<u32> {
    let addr: Ipv4Addr = s.trim().parse().map_err(|_| invalid_address(s))?;
    Ok(u32::from(addr))
}

/// Format a 32-bit value back into dotted-quad form.
pub fn format_ipv4(ip: u32) -> String {
    Ipv4Addr::from(ip).to_string()
}

/// Convert CIDR notation `a.b.c.d/n` into the closed range
/// `[network, broadcast]`. `n = 0` yields the full address space.
pub fn cidr_range(s: &str) -> anyhow::Result<IpRange> {
    let s = s.trim();
    let (addr_part, len_part) = s.split_once('/').ok_or_else(|| invalid_address(s))?;
    let ip = parse_ipv4(addr_part)?;
    let prefix_len: u32 = len_part.parse().map_err(|_| invalid_address(s))?;
    if prefix_len > 32 {
        return Err(invalid_address(s));
    }
    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    let network = ip & mask;
    let broadcast = network | !mask;
    Ok(IpRange {
        first: network,
        last: broadcast,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let ip = parse_ipv4("203.0.113.7").unwrap();
        assert_eq!(ip, 0xCB00_7107);
        assert_eq!(format_ipv4(ip), "203.0.113.7");
        assert_eq!(parse_ipv4("0.0.0.0").unwrap(), 0);
        assert_eq!(parse_ipv4("255.255.255.255").unwrap(), u32::MAX);
    }

    #[test]
    fn rejects_out_of_range_octets() {
        assert!(parse_ipv4("256.0.0.1").is_err());
        assert!(parse_ipv4("1.2.3").is_err());
        assert!(parse_ipv4("1.2.3.4.5").is_err());
        assert!(parse_ipv4("a.b.c.d").is_err());
    }

    #[test]
    fn cidr_to_range() {
        let r = cidr_range("10.0.0.0/8").unwrap();
        assert_eq!(r.first, parse_ipv4("10.0.0.0").unwrap());
        assert_eq!(r.last, parse_ipv4("10.255.255.255").unwrap());

        let host = cidr_range("203.0.113.7/32").unwrap();
        assert_eq!(host.first, host.last);

        let all = cidr_range("1.2.3.4/0").unwrap();
        assert_eq!(all.first, 0);
        assert_eq!(all.last, u32::MAX);
    }

    #[test]
    fn cidr_masks_host_bits() {
        let r = cidr_range("192.168.1.77/24").unwrap();
        assert_eq!(r.first, parse_ipv4("192.168.1.0").unwrap());
        assert_eq!(r.last, parse_ipv4("192.168.1.255").unwrap());
    }

    #[test]
    fn rejects_bad_prefix_lengths() {
        assert!(cidr_range("10.0.0.0/33").is_err());
        assert!(cidr_range("10.0.0.0/").is_err());
        assert!(cidr_range("10.0.0.0").is_err());
    }
}
