use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Token bucket pacing probe launches to `tokens_per_sec`, bursting at most one
/// second's worth of tokens after an idle period.
#[derive(Clone)]
pub struct RateLimiter {
    sem: Arc<Semaphore>,
    _refill: Arc<Refill>,
}

struct Refill(JoinHandle<()>);

impl Drop for Refill {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl RateLimiter {
    /// Must be called from within a tokio runtime.
    pub fn new(tokens_per_sec: u32) -> Self {
        let rate = tokens_per_sec.max(1);
        let sem = Arc::new(Semaphore::new(0));
        let sem_bg = sem.clone();
        let period = Duration::from_secs_f64(1.0 / rate as f64).max(Duration::from_micros(1));
        let burst = rate as usize;
        // Refill in a background task
        let handle = tokio::spawn(async move {
            let mut t = tokio::time::interval(period);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                if sem_bg.available_permits() < burst {
                    sem_bg.add_permits(1);
                }
            }
        });
        RateLimiter { sem, _refill: Arc::new(Refill(handle)) }
    }

    /// Wait for and consume one token.
    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("available", &self.sem.available_permits()).finish()
    }
}
