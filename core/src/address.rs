//! Validated addresses, suffix ranges and scan targets.

use crate::error::{Result, ScanError};
use ipnet::IpNet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const DEFAULT_SUFFIX_START: u32 = 1;
pub const DEFAULT_SUFFIX_END: u32 = 254;

/// A single IPv4 or IPv6 host. Only constructed from a syntactically valid literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(IpAddr);

impl Address {
    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// False for addresses no unicast probe can reach (unspecified, multicast, broadcast).
    pub fn is_probeable(&self) -> bool {
        match self.0 {
            IpAddr::V4(v4) => !(v4.is_unspecified() || v4.is_multicast() || v4.is_broadcast()),
            IpAddr::V6(v6) => !(v6.is_unspecified() || v6.is_multicast()),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address(ip)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address(IpAddr::V4(ip))
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address(IpAddr::V6(ip))
    }
}

impl FromStr for Address {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<IpAddr>()
            .map(Address)
            .map_err(|_| ScanError::validation(format!("invalid address: {:?}", s)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A network prefix plus an inclusive host-suffix window, e.g. `192.168.1` with `[1, 254]`.
///
/// For IPv4 the suffix replaces the last octet, for IPv6 the last 16-bit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    base: IpAddr,
    start: u32,
    end: u32,
}

impl AddressRange {
    /// `base` may be a three-octet prefix (`"10.0.0"`), a full IPv4 address whose last
    /// octet is ignored (`"10.0.0.0"`) or an IPv6 address whose last group is ignored.
    pub fn new(base: &str, start: u32, end: u32) -> Result<Self> {
        let base = parse_base(base)?;
        if start > end {
            return Err(ScanError::validation(format!(
                "range start {} is greater than end {}",
                start, end
            )));
        }
        let max = suffix_max(base);
        if end > max {
            return Err(ScanError::validation(format!(
                "range end {} exceeds the maximum suffix {}",
                end, max
            )));
        }
        Ok(AddressRange { base, start, end })
    }

    /// Range over `base` with the default `/24`-style bounds `[1, 254]`.
    pub fn with_default_bounds(base: &str) -> Result<Self> {
        Self::new(base, DEFAULT_SUFFIX_START, DEFAULT_SUFFIX_END)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Always false: a constructed range holds at least one address.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Lazy iterator in ascending suffix order. Each call starts over.
    pub fn iter(&self) -> AddressIter {
        AddressIter { base: self.base, suffixes: self.start..=self.end }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", with_suffix(self.base, self.start), self.end)
    }
}

impl<'a> IntoIterator for &'a AddressRange {
    type Item = Address;
    type IntoIter = AddressIter;

    fn into_iter(self) -> AddressIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct AddressIter {
    base: IpAddr,
    suffixes: RangeInclusive<u32>,
}

impl Iterator for AddressIter {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        self.suffixes.next().map(|s| Address(with_suffix(self.base, s)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.suffixes.size_hint()
    }
}

impl ExactSizeIterator for AddressIter {}

fn parse_base(base: &str) -> Result<IpAddr> {
    let base = base.trim();
    let invalid = || ScanError::validation(format!("invalid range base: {:?}", base));
    if base.contains(':') {
        let v6: Ipv6Addr = base.parse().map_err(|_| invalid())?;
        let mut segments = v6.segments();
        segments[7] = 0;
        return Ok(IpAddr::V6(Ipv6Addr::from(segments)));
    }
    let parts: Vec<&str> = base.trim_end_matches('.').split('.').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(invalid());
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        let value: u8 = part.parse().map_err(|_| invalid())?;
        if i < 3 {
            octets[i] = value;
        }
    }
    Ok(IpAddr::V4(Ipv4Addr::from(octets)))
}

fn suffix_max(base: IpAddr) -> u32 {
    match base {
        IpAddr::V4(_) => u8::MAX as u32,
        IpAddr::V6(_) => u16::MAX as u32,
    }
}

fn with_suffix(base: IpAddr, suffix: u32) -> IpAddr {
    match base {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets[3] = suffix as u8;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(v6) => {
            let mut segments = v6.segments();
            segments[7] = suffix as u16;
            IpAddr::V6(Ipv6Addr::from(segments))
        }
    }
}

/// What the caller asked to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Single(Address),
    Range(AddressRange),
    Network(IpNet),
}

impl Target {
    /// Accepts an IP literal, CIDR notation, `a.b.c.start-end`, a bare three-octet
    /// prefix (default bounds) or a hostname, which is resolved once.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScanError::validation("empty target"));
        }
        if s.contains('/') {
            let net: IpNet = s
                .parse()
                .map_err(|_| ScanError::validation(format!("invalid network: {:?}", s)))?;
            if net.prefix_len() == net.max_prefix_len() {
                return Ok(Target::Single(Address(net.addr())));
            }
            return Ok(Target::Network(net));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Target::Single(Address(ip)));
        }
        if let Some((prefix, bounds)) = split_range(s) {
            let (start, end) = bounds;
            return AddressRange::new(prefix, start, end).map(Target::Range);
        }
        if s.split('.').count() == 3 && s.split('.').all(|p| p.parse::<u8>().is_ok()) {
            return AddressRange::with_default_bounds(s).map(Target::Range);
        }
        resolve_host(s).map(Target::Single)
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Target::Single(_))
    }

    /// Lazily enumerate every address the target covers.
    pub fn addresses(&self) -> Box<dyn Iterator<Item = Address> + Send> {
        match *self {
            Target::Single(addr) => Box::new(std::iter::once(addr)),
            Target::Range(range) => Box::new(range.iter()),
            Target::Network(net) => Box::new(net.hosts().map(Address)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Single(addr) => addr.fmt(f),
            Target::Range(range) => range.fmt(f),
            Target::Network(net) => net.fmt(f),
        }
    }
}

// "10.0.0.1-20" -> ("10.0.0", (1, 20))
fn split_range(s: &str) -> Option<(&str, (u32, u32))> {
    let (prefix, last) = s.rsplit_once('.')?;
    let (start, end) = last.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    Some((prefix, (start, end)))
}

fn resolve_host(host: &str) -> Result<Address> {
    let unresolved = || ScanError::validation(format!("failed to resolve target: {}", host));
    let mut addrs = (host, 0u16).to_socket_addrs().map_err(|_| unresolved())?;
    addrs.next().map(|sa| Address(sa.ip())).ok_or_else(unresolved)
}
