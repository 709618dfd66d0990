use crate::cancel::CancelToken;
use crate::ratelimiter::RateLimiter;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounds the number of outstanding probes for a whole scan.
///
/// A dispatcher takes a permit before spawning a probe task and the task drops it
/// when the probe is classified, so work beyond the bound waits in the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    size: usize,
    limiter: Option<RateLimiter>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool { sem: Arc::new(Semaphore::new(size)), size, limiter: None }
    }

    /// Pool whose launches are additionally paced to `qps` per second.
    /// Must be called from within a tokio runtime.
    pub fn with_qps(size: usize, qps: Option<u32>) -> Self {
        let mut pool = Self::new(size);
        pool.limiter = qps.map(RateLimiter::new);
        pool
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Probes currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.size - self.sem.available_permits()
    }

    /// Wait for a free slot. Returns `None` once `cancel` fires, before or while
    /// waiting, so no new probe starts after cancellation.
    pub async fn acquire(&self, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
        let permit = self.try_acquire(cancel).await;
        if permit.is_none() {
            debug!(in_flight = self.in_flight(), "pool acquire abandoned after cancel");
        }
        permit
    }

    async fn try_acquire(&self, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return None;
        }
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.sem.clone().acquire_owned() => permit.ok()?,
        };
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = limiter.acquire() => {}
            }
        }
        if cancel.is_cancelled() {
            return None;
        }
        Some(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn excess_acquire_waits_for_release() {
        let pool = WorkerPool::new(1);
        let cancel = CancelToken::new();
        let first = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.in_flight(), 1);
        let waiting = tokio::time::timeout(Duration::from_millis(30), pool.acquire(&cancel)).await;
        assert!(waiting.is_err());
        drop(first);
        assert!(pool.acquire(&cancel).await.is_some());
    }

    #[tokio::test]
    async fn cancel_releases_waiting_dispatcher() {
        let pool = WorkerPool::new(1);
        let cancel = CancelToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(&cancel).await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn zero_size_is_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
    }
}
