//! Host discovery: liveness sweep over an address range with timeouts, a bounded
//! worker pool and cancellation.

use async_trait::async_trait;
use recon_core::{Address, AddressRange, CancelToken, ProbeError, Reachability, WorkerPool};
use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default pool size for [`sweep`].
pub const DEFAULT_SWEEP_WORKERS: usize = 64;

/// A bounded-time reachability test for one address.
#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    async fn ping(&self, address: Address, timeout: Duration) -> Reachability;
}

/// Sends one echo request through the platform `ping` utility.
#[derive(Debug, Clone)]
pub struct SystemPing {
    program: String,
}

impl Default for SystemPing {
    fn default() -> Self {
        SystemPing { program: "ping".to_string() }
    }
}

impl SystemPing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable, e.g. an absolute path to `ping`.
    pub fn with_program(program: impl Into<String>) -> Self {
        SystemPing { program: program.into() }
    }
}

/// Arguments for a single echo request with the given reply timeout.
pub fn ping_args(ip: IpAddr, wait: Duration) -> Vec<String> {
    let mut args = Vec::new();
    if cfg!(windows) {
        args.extend(["-n".to_string(), "1".to_string(), "-w".to_string()]);
        args.push(wait.as_millis().max(1).to_string());
    } else if cfg!(target_os = "macos") {
        // -W is milliseconds on macOS
        args.extend(["-c".to_string(), "1".to_string(), "-W".to_string()]);
        args.push(wait.as_millis().max(1).to_string());
    } else {
        // iputils takes whole seconds
        let secs = (wait.as_millis() + 999) / 1000;
        args.extend(["-c".to_string(), "1".to_string(), "-W".to_string()]);
        args.push(secs.max(1).to_string());
        if ip.is_ipv6() {
            args.push("-6".to_string());
        }
    }
    args.push(ip.to_string());
    args
}

/// Map a ping exit code onto a reachability outcome.
pub fn classify_exit(code: Option<i32>) -> Reachability {
    match code {
        Some(0) => Reachability::Reachable,
        Some(1) => Reachability::Unreachable,
        Some(2) if cfg!(target_os = "macos") => Reachability::Unreachable,
        Some(c) => Reachability::Error(format!("ping exited with status {}", c)),
        None => Reachability::Error("ping terminated by signal".to_string()),
    }
}

#[async_trait]
impl Pinger for SystemPing {
    async fn ping(&self, address: Address, wait: Duration) -> Reachability {
        let mut cmd = Command::new(&self.program);
        cmd.args(ping_args(address.ip(), wait))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Reachability::Error(format!("{} not available", self.program))
            }
            Err(e) => return Reachability::Error(format!("failed to spawn {}: {}", self.program, e)),
        };
        // ping rounds its own deadline, so give it a little slack before giving up
        let grace = wait + Duration::from_millis(500);
        let waited = timeout(grace, child.wait()).await;
        match waited {
            Ok(Ok(status)) => classify_exit(status.code()),
            Ok(Err(e)) => Reachability::Error(format!("waiting for {}: {}", self.program, e)),
            Err(_) => {
                let _ = child.kill().await;
                Reachability::Unreachable
            }
        }
    }
}

/// TCP-based liveness: a completed handshake or an active refusal on any of the
/// ports proves the host is up.
#[derive(Debug, Clone)]
pub struct TcpPing {
    ports: Vec<u16>,
}

impl TcpPing {
    pub fn new(ports: Vec<u16>) -> Self {
        TcpPing { ports }
    }
}

fn is_local_failure(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Unsupported
            | io::ErrorKind::OutOfMemory
    )
}

#[async_trait]
impl Pinger for TcpPing {
    /// Connects to every liveness port at once; the first handshake or refusal wins.
    /// Attempts still pending when `wait` runs out are aborted.
    async fn ping(&self, address: Address, wait: Duration) -> Reachability {
        let mut attempts = JoinSet::new();
        for &port in &self.ports {
            let target = SocketAddr::new(address.ip(), port);
            attempts.spawn(async move { TcpStream::connect(target).await.map(drop) });
        }
        let first_answer = async {
            let mut last_local: Option<io::Error> = None;
            while let Some(joined) = attempts.join_next().await {
                match joined {
                    Ok(Ok(())) => return Reachability::Reachable,
                    Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => return Reachability::Reachable,
                    Ok(Err(e)) if is_local_failure(e.kind()) => last_local = Some(e),
                    Ok(Err(_)) | Err(_) => {}
                }
            }
            match last_local {
                Some(e) => Reachability::Error(e.to_string()),
                None => Reachability::Unreachable,
            }
        };
        let outcome = timeout(wait, first_answer).await.unwrap_or(Reachability::Unreachable);
        attempts.abort_all();
        outcome
    }
}

/// What a sweep found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub reachable: BTreeSet<Address>,
    pub errors: Vec<ProbeError>,
    /// Probes that reported back.
    pub probed: usize,
    pub cancelled: bool,
}

/// Sweep `range` with a default-sized pool and no cancellation. Returns the
/// reachable addresses; unreachable and errored ones are left out.
pub async fn sweep<P>(pinger: Arc<P>, range: &AddressRange, timeout_per_host: Duration) -> BTreeSet<Address>
where
    P: Pinger + ?Sized,
{
    let pool = WorkerPool::new(DEFAULT_SWEEP_WORKERS);
    sweep_with_limits(pinger, range.iter(), timeout_per_host, &pool, &CancelToken::new(), |_| {})
        .await
        .reachable
}

/// Probe every address once, at most `pool.size()` at a time.
///
/// `on_found` sees each reachable address as soon as it is classified.
/// Once `cancel` fires no further probe is started; probes already running finish
/// within `timeout_per_host` and their results are kept.
pub async fn sweep_with_limits<P, I, F>(
    pinger: Arc<P>,
    addresses: I,
    timeout_per_host: Duration,
    pool: &WorkerPool,
    cancel: &CancelToken,
    mut on_found: F,
) -> SweepOutcome
where
    P: Pinger + ?Sized,
    I: IntoIterator<Item = Address>,
    F: FnMut(Address),
{
    let (tx, mut rx) = mpsc::unbounded_channel::<(Address, Reachability)>();

    let dispatch = async move {
        let mut issued = 0usize;
        for address in addresses {
            let Some(permit) = pool.acquire(cancel).await else {
                break;
            };
            let tx = tx.clone();
            let pinger = pinger.clone();
            tokio::spawn(async move {
                let outcome = pinger.ping(address, timeout_per_host).await;
                drop(permit);
                let _ = tx.send((address, outcome));
            });
            issued += 1;
        }
        issued
    };

    let collect = async {
        let mut out = SweepOutcome::default();
        while let Some((address, outcome)) = rx.recv().await {
            out.probed += 1;
            match outcome {
                Reachability::Reachable => {
                    info!(%address, "host reachable");
                    on_found(address);
                    out.reachable.insert(address);
                }
                Reachability::Unreachable => debug!(%address, "no reply"),
                Reachability::Error(reason) => {
                    warn!(%address, %reason, "liveness probe failed");
                    out.errors.push(ProbeError::host(address, reason));
                }
            }
        }
        out
    };

    let (issued, mut out) = tokio::join!(dispatch, collect);
    out.cancelled = cancel.is_cancelled();
    debug!(issued, reachable = out.reachable.len(), errors = out.errors.len(), "sweep finished");
    out
}
