//! Candidate port lists.

use crate::error::{Result, ScanError};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Ports probed when the caller supplies none.
pub const DEFAULT_PORTS: &[u16] = &[21, 22, 23, 80, 443, 3306, 8080];

/// Ordered, duplicate-free list of ports. Order is probe order, not priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PortSpec(Vec<u16>);

impl PortSpec {
    pub fn new(ports: Vec<u16>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(ports.len());
        for &p in &ports {
            if p == 0 {
                return Err(ScanError::validation("invalid port: 0"));
            }
            if !seen.insert(p) {
                return Err(ScanError::validation(format!("duplicate port: {}", p)));
            }
        }
        Ok(PortSpec(ports))
    }

    /// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ports = Vec::new();
        for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let s = parse_port(start, part)?;
                let e = parse_port(end, part)?;
                if s > e {
                    return Err(ScanError::validation(format!("invalid port range: {}", part)));
                }
                ports.extend(s..=e);
            } else {
                ports.push(parse_port(part, part)?);
            }
        }
        Self::new(ports)
    }

    pub fn empty() -> Self {
        PortSpec(Vec::new())
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        PortSpec(DEFAULT_PORTS.to_vec())
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.0.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        f.write_str(&list)
    }
}

fn parse_port(s: &str, part: &str) -> Result<u16> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ScanError::validation(format!("invalid port: {}", part))),
        Ok(p) => Ok(p),
    }
}
