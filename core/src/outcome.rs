//! Tri-state outcomes of a single probe and the diagnostic recorded for failures.

use crate::address::Address;
use serde::Serialize;
use std::fmt;

/// Result of one liveness probe against one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    /// No reply within the timeout.
    Unreachable,
    /// The probe itself could not run (missing facility, permission, spawn failure).
    Error(String),
}

/// Result of one connection attempt against one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortState {
    Open,
    /// Refused or timed out.
    Closed,
    /// Anything other than a refusal or a timeout.
    Error(String),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

impl PortState {
    pub fn is_open(&self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => f.write_str("open"),
            PortState::Closed => f.write_str("closed"),
            PortState::Error(reason) => write!(f, "error ({})", reason),
        }
    }
}

/// A per-probe failure. Kept in the report, never propagated across probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeError {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub reason: String,
}

impl ProbeError {
    pub fn host(address: Address, reason: impl Into<String>) -> Self {
        ProbeError { address, port: None, reason: reason.into() }
    }

    pub fn port(address: Address, port: u16, reason: impl Into<String>) -> Self {
        ProbeError { address, port: Some(port), reason: reason.into() }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(p) => write!(f, "{}:{}: {}", self.address, p, self.reason),
            None => write!(f, "{}: {}", self.address, self.reason),
        }
    }
}

impl std::error::Error for ProbeError {}
