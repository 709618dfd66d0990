//! TCP connect probe with timeouts, retries and a bounded worker pool.

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use recon_core::config::DEFAULT_RETRY_DELAY;
use recon_core::{Address, CancelToken, PortSpec, PortState, ProbeError, WorkerPool};
use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default pool size for [`probe`].
pub const DEFAULT_PROBE_WORKERS: usize = 64;

/// Opens one connection. The returned handle is dropped as soon as the attempt
/// has been classified.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: Send + 'static;

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// Per-connection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout: Duration,
    /// Extra attempts after a timed-out connect. Refusals are never retried.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl ProbeOptions {
    pub fn new(timeout: Duration) -> Self {
        ProbeOptions { timeout, retries: 0, retry_delay: DEFAULT_RETRY_DELAY }
    }
}

/// Refused, reset and timed-out connects are plain negatives; anything else is an error.
pub fn classify_error(err: &io::Error) -> PortState {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut => PortState::Closed,
        _ => PortState::Error(err.to_string()),
    }
}

/// What probing one host produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortProbeOutcome {
    pub open: BTreeSet<u16>,
    pub closed: usize,
    pub errors: Vec<ProbeError>,
    /// Ports whose probe reported back.
    pub attempted: usize,
    pub cancelled: bool,
}

/// Probe `ports` on `address` with a default-sized pool and no cancellation.
/// Returns the open ports.
pub async fn probe<C>(
    connector: Arc<C>,
    address: Address,
    ports: &PortSpec,
    timeout_per_port: Duration,
) -> Result<BTreeSet<u16>, ProbeError>
where
    C: Connector,
{
    let pool = WorkerPool::new(DEFAULT_PROBE_WORKERS);
    let out = probe_with_limits(
        connector,
        address,
        ports,
        ProbeOptions::new(timeout_per_port),
        &pool,
        &CancelToken::new(),
    )
    .await?;
    Ok(out.open)
}

/// Probe every port in `ports` once (plus retries on timeout), at most
/// `pool.size()` connections at a time.
///
/// An address no unicast connect can reach fails the whole call before any port is
/// tried. Once `cancel` fires no further connect is started.
pub async fn probe_with_limits<C>(
    connector: Arc<C>,
    address: Address,
    ports: &PortSpec,
    opts: ProbeOptions,
    pool: &WorkerPool,
    cancel: &CancelToken,
) -> Result<PortProbeOutcome, ProbeError>
where
    C: Connector,
{
    if !address.is_probeable() {
        return Err(ProbeError::host(address, "address cannot be probed"));
    }

    let (tx, mut rx) = mpsc::channel::<(u16, PortState)>(ports.len().max(1));

    let dispatch = async move {
        for port in ports.iter() {
            let Some(permit) = pool.acquire(cancel).await else {
                break;
            };
            let tx = tx.clone();
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let state = probe_port(&*connector, SocketAddr::new(address.ip(), port), opts, &cancel).await;
                drop(permit);
                let _ = tx.send((port, state)).await;
            });
        }
    };

    let collect = async {
        let mut out = PortProbeOutcome::default();
        while let Some((port, state)) = rx.recv().await {
            out.attempted += 1;
            match state {
                PortState::Open => {
                    debug!(%address, port, "open");
                    out.open.insert(port);
                }
                PortState::Closed => out.closed += 1,
                PortState::Error(reason) => {
                    warn!(%address, port, %reason, "port probe failed");
                    out.errors.push(ProbeError::port(address, port, reason));
                }
            }
        }
        out
    };

    let ((), mut out) = tokio::join!(dispatch, collect);
    out.cancelled = cancel.is_cancelled();
    Ok(out)
}

enum Attempt {
    Done(PortState),
    TimedOut,
}

async fn attempt<C: Connector + ?Sized>(connector: &C, addr: SocketAddr, limit: Duration) -> Attempt {
    match timeout(limit, connector.connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Attempt::Done(PortState::Open)
        }
        Ok(Err(e)) => Attempt::Done(classify_error(&e)),
        Err(_) => Attempt::TimedOut,
    }
}

/// One port, with exponential backoff and jitter between timed-out attempts.
async fn probe_port<C: Connector + ?Sized>(
    connector: &C,
    addr: SocketAddr,
    opts: ProbeOptions,
    cancel: &CancelToken,
) -> PortState {
    let mut attempts = 0;
    loop {
        if let Attempt::Done(state) = attempt(connector, addr, opts.timeout).await {
            return state;
        }
        attempts += 1;
        if attempts > opts.retries || cancel.is_cancelled() {
            return PortState::Closed;
        }
        let base = opts.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempts.min(6))); // cap growth
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tracks how many connection handles are alive.
    struct Handle(Arc<AtomicUsize>);

    impl Drop for Handle {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Accept,
        Refuse,
        Hang,
        Fail,
    }

    #[derive(Default)]
    struct MockConnector {
        replies: HashMap<u16, Reply>,
        calls: AtomicUsize,
        live: Arc<AtomicUsize>,
        cancel_after: Option<(usize, CancelToken)>,
    }

    impl MockConnector {
        fn with(replies: &[(u16, Reply)]) -> Self {
            MockConnector { replies: replies.iter().copied().collect(), ..Default::default() }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Stream = Handle;

        async fn connect(&self, addr: SocketAddr) -> io::Result<Handle> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if n == *limit {
                    token.cancel();
                }
            }
            match self.replies.get(&addr.port()).copied().unwrap_or(Reply::Refuse) {
                Reply::Accept => {
                    self.live.fetch_add(1, Ordering::SeqCst);
                    Ok(Handle(self.live.clone()))
                }
                Reply::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                }
                Reply::Fail => Err(io::Error::new(io::ErrorKind::Other, "too many open files")),
            }
        }
    }

    fn addr() -> Address {
        "10.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn open_ports_are_reported() {
        let connector = Arc::new(MockConnector::with(&[(22, Reply::Accept), (80, Reply::Accept), (9999, Reply::Refuse)]));
        let ports = PortSpec::new(vec![22, 80, 9999]).unwrap();
        let open = probe(connector.clone(), addr(), &ports, Duration::from_millis(100)).await.unwrap();
        assert_eq!(open.into_iter().collect::<Vec<_>>(), vec![22, 80]);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(connector.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_port_list_attempts_nothing() {
        let connector = Arc::new(MockConnector::default());
        let open = probe(connector.clone(), addr(), &PortSpec::empty(), Duration::from_millis(100)).await.unwrap();
        assert!(open.is_empty());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unprobeable_address_fails_fast() {
        let connector = Arc::new(MockConnector::with(&[(22, Reply::Accept)]));
        let err = probe(connector.clone(), "0.0.0.0".parse().unwrap(), &PortSpec::default(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.port, None);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_is_closed_and_retried() {
        let connector = Arc::new(MockConnector::with(&[(23, Reply::Hang)]));
        let ports = PortSpec::new(vec![23]).unwrap();
        let opts = ProbeOptions { timeout: Duration::from_millis(20), retries: 1, retry_delay: Duration::from_millis(1) };
        let pool = WorkerPool::new(4);
        let out = probe_with_limits(connector.clone(), addr(), &ports, opts, &pool, &CancelToken::new()).await.unwrap();
        assert!(out.open.is_empty());
        assert_eq!(out.closed, 1);
        assert!(out.errors.is_empty());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unexpected_failures_are_recorded_not_fatal() {
        let connector = Arc::new(MockConnector::with(&[(21, Reply::Fail), (443, Reply::Accept)]));
        let ports = PortSpec::new(vec![21, 443]).unwrap();
        let pool = WorkerPool::new(4);
        let out = probe_with_limits(connector, addr(), &ports, ProbeOptions::new(Duration::from_millis(100)), &pool, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out.open.iter().copied().collect::<Vec<_>>(), vec![443]);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].port, Some(21));
        assert_eq!(out.attempted, 2);
    }

    #[tokio::test]
    async fn cancel_keeps_finished_results_and_closes_handles() {
        let cancel = CancelToken::new();
        let connector = Arc::new(MockConnector {
            replies: [1, 2, 3, 4, 5].iter().map(|&p| (p, Reply::Accept)).collect(),
            cancel_after: Some((2, cancel.clone())),
            ..Default::default()
        });
        let ports = PortSpec::new(vec![1, 2, 3, 4, 5]).unwrap();
        let pool = WorkerPool::new(1);
        let out = probe_with_limits(connector.clone(), addr(), &ports, ProbeOptions::new(Duration::from_millis(100)), &pool, &cancel)
            .await
            .unwrap();
        assert!(out.cancelled);
        assert_eq!(out.open.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(connector.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classify_io_errors() {
        assert_eq!(classify_error(&io::Error::from(io::ErrorKind::ConnectionRefused)), PortState::Closed);
        assert_eq!(classify_error(&io::Error::from(io::ErrorKind::TimedOut)), PortState::Closed);
        assert!(matches!(classify_error(&io::Error::from(io::ErrorKind::PermissionDenied)), PortState::Error(_)));
    }

    #[tokio::test]
    async fn tcp_connector_against_localhost() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let ports = PortSpec::new(vec![open, closed]).unwrap();
        let found = probe(Arc::new(TcpConnector), "127.0.0.1".parse().unwrap(), &ports, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![open]);
    }
}
