//! Scan orchestration: sweep a range, probe every reachable host, merge the
//! partial results into one [`ScanReport`].

pub use host_discovery::{Pinger, SystemPing, TcpPing};
pub use port_scan::{Connector, TcpConnector};

use host_discovery::sweep_with_limits;
use port_scan::{probe_with_limits, PortProbeOutcome, ProbeOptions};
use recon_core::{
    Address, CancelToken, PortSpec, ProbeError, Result, ScanConfig, ScanReport, SweepMethod, Target,
    WorkerPool,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Lifecycle of one scan. `Sweeping` only happens for multi-address targets;
/// `Error` only for configuration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Sweeping,
    Probing,
    Done,
    Error,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Sweeping => "sweeping",
            ScanPhase::Probing => "probing",
            ScanPhase::Done => "done",
            ScanPhase::Error => "error",
        };
        f.write_str(s)
    }
}

/// Progress notifications. Purely observational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Phase(ScanPhase),
    HostReachable(Address),
    /// Sent after every port result for the host has been merged into the report.
    HostScanned { address: Address, open: Vec<u16> },
}

/// Pinger matching `config.sweep_method`.
pub fn pinger_for(config: &ScanConfig) -> Arc<dyn Pinger> {
    match config.sweep_method {
        SweepMethod::Icmp => Arc::new(SystemPing::new()),
        SweepMethod::Tcp => Arc::new(TcpPing::new(config.liveness_ports.clone())),
    }
}

/// Scan `target` with the system ping utility (or TCP liveness) and real TCP connects.
pub async fn run_scan(target: &Target, ports: &PortSpec, config: &ScanConfig) -> Result<ScanReport> {
    Scanner::new(config.clone(), pinger_for(config), Arc::new(TcpConnector))
        .run(target, ports)
        .await
}

pub struct Scanner<P: ?Sized, C> {
    config: ScanConfig,
    pinger: Arc<P>,
    connector: Arc<C>,
    cancel: CancelToken,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
    phase: watch::Sender<ScanPhase>,
}

impl<P, C> Scanner<P, C>
where
    P: Pinger + ?Sized,
    C: Connector,
{
    pub fn new(config: ScanConfig, pinger: Arc<P>, connector: Arc<C>) -> Self {
        let (phase, _) = watch::channel(ScanPhase::Idle);
        Scanner { config, pinger, connector, cancel: CancelToken::new(), events: None, phase }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share an existing token, e.g. one wired to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanPhase> {
        self.phase.subscribe()
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_phase(&self, phase: ScanPhase) {
        debug!(%phase, "scan phase");
        self.phase.send_replace(phase);
        self.emit(ScanEvent::Phase(phase));
    }

    /// Run one scan. Only configuration problems fail the call; per-probe failures
    /// end up in [`ScanReport::errors`].
    pub async fn run(&self, target: &Target, ports: &PortSpec) -> Result<ScanReport> {
        if let Err(e) = self.config.validate() {
            warn!(error = %e, "refusing to start scan");
            self.set_phase(ScanPhase::Error);
            return Err(e);
        }
        let started = Instant::now();
        let pool = WorkerPool::with_qps(self.config.workers, self.config.qps);
        let mut report = ScanReport::new();

        let hosts: Vec<Address> = match target {
            Target::Single(address) if !self.config.skip_ports => vec![*address],
            _ => {
                self.set_phase(ScanPhase::Sweeping);
                info!(%target, "sweeping");
                let swept = sweep_with_limits(
                    self.pinger.clone(),
                    target.addresses(),
                    self.config.sweep_timeout,
                    &pool,
                    &self.cancel,
                    |address| self.emit(ScanEvent::HostReachable(address)),
                )
                .await;
                report.errors.extend(swept.errors);
                swept.reachable.into_iter().collect()
            }
        };

        if self.config.skip_ports {
            for address in hosts {
                report.record_unscanned(address);
            }
        } else {
            self.set_phase(ScanPhase::Probing);
            self.probe_hosts(hosts, ports, &pool, &mut report).await;
        }

        report.cancelled = self.cancel.is_cancelled();
        if report.cancelled {
            warn!("scan cancelled, results are partial");
        }
        info!(
            hosts = report.hosts.len() + report.unscanned.len(),
            open = report.open_port_count(),
            errors = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        self.set_phase(ScanPhase::Done);
        Ok(report)
    }

    async fn probe_hosts(&self, hosts: Vec<Address>, ports: &PortSpec, pool: &WorkerPool, report: &mut ScanReport) {
        let host_sem = Arc::new(Semaphore::new(self.config.host_concurrency));
        let opts = ProbeOptions {
            timeout: self.config.probe_timeout,
            retries: self.config.retries,
            retry_delay: self.config.retry_delay,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<(Address, std::result::Result<PortProbeOutcome, ProbeError>)>();

        let dispatch = async {
            let mut skipped = Vec::new();
            for (i, &address) in hosts.iter().enumerate() {
                let Some(permit) = acquire_host(&host_sem, &self.cancel).await else {
                    skipped.extend_from_slice(&hosts[i..]);
                    break;
                };
                let tx = tx.clone();
                let connector = self.connector.clone();
                let ports = ports.clone();
                let pool = pool.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    let result = probe_with_limits(connector, address, &ports, opts, &pool, &cancel).await;
                    drop(permit);
                    let _ = tx.send((address, result));
                });
            }
            drop(tx);
            skipped
        };

        // single writer: only this loop touches the report while probes run
        let merge = async {
            while let Some((address, result)) = rx.recv().await {
                match result {
                    Ok(out) => {
                        let complete = out.attempted == ports.len();
                        report.errors.extend(out.errors);
                        if out.attempted == 0 && !ports.is_empty() {
                            report.record_unscanned(address);
                            continue;
                        }
                        report.record_host(address, out.open.iter().copied());
                        if complete {
                            info!(%address, open = ?out.open, "host scanned");
                            self.emit(ScanEvent::HostScanned { address, open: out.open.into_iter().collect() });
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "host probe failed");
                        report.record_error(e);
                    }
                }
            }
        };

        let (skipped, ()) = tokio::join!(dispatch, merge);
        for address in skipped {
            report.record_unscanned(address);
        }
    }
}

async fn acquire_host(sem: &Arc<Semaphore>, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
    if cancel.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = sem.clone().acquire_owned() => permit.ok(),
    }
}
