//! The aggregate handed back to the caller.

use crate::address::Address;
use crate::outcome::ProbeError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Open ports per probed host, reachable hosts that were never probed, and
/// per-probe diagnostics.
///
/// Only the orchestrator mutates a report while a scan is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Every port-probed host, including those with no open port.
    pub hosts: BTreeMap<Address, BTreeSet<u16>>,
    /// Reachable hosts whose ports were not probed (sweep-only scans, cancellation).
    pub unscanned: BTreeSet<Address>,
    pub errors: Vec<ProbeError>,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` was fully probed. Replaces `unscanned` membership.
    pub fn record_host(&mut self, address: Address, open: impl IntoIterator<Item = u16>) {
        self.unscanned.remove(&address);
        self.hosts.entry(address).or_default().extend(open);
    }

    pub fn record_unscanned(&mut self, address: Address) {
        if !self.hosts.contains_key(&address) {
            self.unscanned.insert(address);
        }
    }

    pub fn record_error(&mut self, error: ProbeError) {
        self.errors.push(error);
    }

    pub fn open_ports(&self, address: &Address) -> Option<&BTreeSet<u16>> {
        self.hosts.get(address)
    }

    /// Every address known to be reachable, ascending. This is the target list
    /// for anything that consumes discovered hosts.
    pub fn reachable(&self) -> impl Iterator<Item = Address> + '_ {
        let mut all: BTreeSet<Address> = self.hosts.keys().copied().collect();
        all.extend(self.unscanned.iter().copied());
        all.into_iter()
    }

    pub fn open_port_count(&self) -> usize {
        self.hosts.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.unscanned.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn record_host_moves_out_of_unscanned() {
        let mut report = ScanReport::new();
        report.record_unscanned(addr("10.0.0.1"));
        report.record_host(addr("10.0.0.1"), [443, 22]);
        assert!(report.unscanned.is_empty());
        let open: Vec<u16> = report.open_ports(&addr("10.0.0.1")).unwrap().iter().copied().collect();
        assert_eq!(open, vec![22, 443]);
    }

    #[test]
    fn reachable_merges_probed_and_unscanned() {
        let mut report = ScanReport::new();
        report.record_host(addr("10.0.0.3"), []);
        report.record_unscanned(addr("10.0.0.1"));
        let all: Vec<String> = report.reachable().map(|a| a.to_string()).collect();
        assert_eq!(all, vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(report.open_port_count(), 0);
    }

    #[test]
    fn serializes_with_text_keys_and_sorted_ports() {
        let mut report = ScanReport::new();
        report.record_host(addr("10.0.0.1"), [80, 22]);
        report.record_error(ProbeError::port(addr("10.0.0.1"), 8080, "boom"));
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["hosts"]["10.0.0.1"], serde_json::json!([22, 80]));
        assert_eq!(v["errors"][0]["port"], 8080);
        assert_eq!(v["cancelled"], false);
    }
}
