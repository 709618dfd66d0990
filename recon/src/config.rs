use anyhow::{Context, Result};
use clap::Args;
use recon_core::{PortSpec, ScanConfig, SweepMethod};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "recon.yaml";

/// Tuning shared by `scan` and `discover`. Every field is optional so that
/// flags, file values and built-in defaults can be layered.
#[derive(Debug, Default, Clone, Args, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Timeout per connection attempt in milliseconds [default: 500]
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Timeout per liveness probe in milliseconds [default: 1000]
    #[arg(long)]
    pub sweep_timeout_ms: Option<u64>,
    /// Max outstanding probes; excess work queues [default: 256]
    #[arg(long)]
    pub workers: Option<usize>,
    /// Hosts probed in parallel after a sweep [default: 8]
    #[arg(long)]
    pub host_concurrency: Option<usize>,
    /// QPS cap for probe launches; 0 disables pacing [default: 0]
    #[arg(long)]
    pub qps: Option<u32>,
    /// Retries for a port whose connect timed out [default: 0]
    #[arg(long)]
    pub retries: Option<u32>,
    /// Base delay between retries in milliseconds [default: 50]
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
    /// Liveness method: icmp (system ping) or tcp [default: icmp]
    #[arg(long)]
    pub method: Option<SweepMethod>,
    /// Ports used by the tcp liveness method [default: 80,443,22]
    #[arg(long)]
    pub liveness_ports: Option<String>,
}

impl Tuning {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: &Tuning) -> Tuning {
        Tuning {
            timeout_ms: self.timeout_ms.or(fallback.timeout_ms),
            sweep_timeout_ms: self.sweep_timeout_ms.or(fallback.sweep_timeout_ms),
            workers: self.workers.or(fallback.workers),
            host_concurrency: self.host_concurrency.or(fallback.host_concurrency),
            qps: self.qps.or(fallback.qps),
            retries: self.retries.or(fallback.retries),
            retry_delay_ms: self.retry_delay_ms.or(fallback.retry_delay_ms),
            method: self.method.or(fallback.method),
            liveness_ports: self.liveness_ports.or_else(|| fallback.liveness_ports.clone()),
        }
    }

    pub fn to_scan_config(&self) -> Result<ScanConfig> {
        let mut cfg = ScanConfig::default();
        if let Some(ms) = self.timeout_ms { cfg.probe_timeout = Duration::from_millis(ms); }
        if let Some(ms) = self.sweep_timeout_ms { cfg.sweep_timeout = Duration::from_millis(ms); }
        if let Some(n) = self.workers { cfg.workers = n; }
        if let Some(n) = self.host_concurrency { cfg.host_concurrency = n; }
        cfg.qps = self.qps.filter(|&q| q > 0);
        if let Some(n) = self.retries { cfg.retries = n; }
        if let Some(ms) = self.retry_delay_ms { cfg.retry_delay = Duration::from_millis(ms); }
        if let Some(m) = self.method { cfg.sweep_method = m; }
        if let Some(spec) = &self.liveness_ports {
            cfg.liveness_ports = PortSpec::parse(spec)?.as_slice().to_vec();
        }
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Section {
    pub ports: Option<String>,
    pub format: Option<String>,
    #[serde(flatten)]
    pub tuning: Tuning,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub scan: Option<Section>,
    pub discover: Option<Section>,
}

/// Load `path`, or `./recon.yaml` if no path is given and that file exists.
/// An explicitly named file that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let cfg = parse_config(&s).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}
