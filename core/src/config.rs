//! Scan tuning knobs. Every default lives here rather than in the probe code.

use crate::error::{Result, ScanError};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_WORKERS: usize = 256;
pub const DEFAULT_HOST_CONCURRENCY: usize = 8;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_LIVENESS_PORTS: &[u16] = &[80, 443, 22];

/// How the sweep decides that an address is reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMethod {
    /// One echo request through the platform `ping` utility.
    #[default]
    Icmp,
    /// TCP connect to the liveness ports; a handshake or a refusal counts.
    Tcp,
}

impl FromStr for SweepMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" | "ping" => Ok(SweepMethod::Icmp),
            "tcp" => Ok(SweepMethod::Tcp),
            other => Err(ScanError::configuration(format!("unknown sweep method: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Bound on one reachability probe.
    pub sweep_timeout: Duration,
    /// Bound on one connection attempt.
    pub probe_timeout: Duration,
    /// Maximum outstanding probes across the whole scan. Excess work queues.
    pub workers: usize,
    /// Hosts port-probed in parallel after a sweep.
    pub host_concurrency: usize,
    /// Optional cap on probe launches per second.
    pub qps: Option<u32>,
    /// Extra attempts for a port whose connect timed out.
    pub retries: u32,
    pub retry_delay: Duration,
    pub sweep_method: SweepMethod,
    pub liveness_ports: Vec<u16>,
    /// Sweep only; reachable hosts are reported as unscanned.
    pub skip_ports: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            sweep_timeout: DEFAULT_SWEEP_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            workers: DEFAULT_WORKERS,
            host_concurrency: DEFAULT_HOST_CONCURRENCY,
            qps: None,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            sweep_method: SweepMethod::default(),
            liveness_ports: DEFAULT_LIVENESS_PORTS.to_vec(),
            skip_ports: false,
        }
    }
}

impl ScanConfig {
    /// Reject settings that would make the scan meaningless before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScanError::configuration("worker pool size must be at least 1"));
        }
        if self.host_concurrency == 0 {
            return Err(ScanError::configuration("host concurrency must be at least 1"));
        }
        if self.sweep_timeout.is_zero() {
            return Err(ScanError::configuration("sweep timeout must be positive"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ScanError::configuration("probe timeout must be positive"));
        }
        if self.qps == Some(0) {
            return Err(ScanError::configuration("qps must be positive when set"));
        }
        if self.sweep_method == SweepMethod::Tcp {
            if self.liveness_ports.is_empty() {
                return Err(ScanError::configuration("tcp sweep needs at least one liveness port"));
            }
            if self.liveness_ports.contains(&0) {
                return Err(ScanError::configuration("invalid liveness port: 0"));
            }
        }
        Ok(())
    }
}
