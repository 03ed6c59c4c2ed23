use crate::error::RateLimitError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};

/// Spacing used when no interval is configured for a gate.
const UNTHROTTLED: Duration = Duration::from_millis(1);

/// A token bucket of capacity one: at most one call per `interval` passes
/// through the gate.
///
/// The bucket is stored as the instant the next token becomes available. A
/// gate that sat idle holds exactly one token, so there is never a burst.
/// Waiters queue on a fair mutex and are served in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    interval: Duration,
    next_token: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, interval: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            interval: interval.unwrap_or(UNTHROTTLED),
            next_token: Mutex::new(Instant::now()),
        }
    }

    /// Builds a gate from a millisecond setting, where `None` means unthrottled.
    pub fn from_millis(name: impl Into<String>, millis: Option<u64>) -> Self {
        Self::new(name, millis.map(Duration::from_millis))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        let mut next_token = self.next_token.lock().await;
        let ready_at = (*next_token).max(Instant::now());
        sleep_until(ready_at).await;
        *next_token = ready_at + self.interval;
    }

    /// Like [`acquire`](Self::acquire) but gives up after `limit`.
    ///
    /// A cancelled wait does not consume a token.
    pub async fn acquire_within(&self, limit: Duration) -> Result<(), RateLimitError> {
        timeout(limit, self.acquire())
            .await
            .map_err(|_| RateLimitError::Timeout {
                gate: self.name.clone(),
                waited: limit,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_call_passes_immediately() {
        let gate = RateLimiter::from_millis("account", Some(500));
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_the_interval() {
        let gate = RateLimiter::from_millis("ticker", Some(100));
        let start = Instant::now();
        for _ in 0..3 {
            gate.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(210), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gate_does_not_accumulate_a_burst() {
        let gate = RateLimiter::from_millis("trade", Some(100));
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out_without_consuming_a_token() {
        let gate = RateLimiter::from_millis("account", Some(1_000));
        gate.acquire().await;

        let err = gate
            .acquire_within(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Timeout {
                gate: "account".to_string(),
                waited: Duration::from_millis(100),
            }
        );

        let start = Instant::now();
        gate.acquire_within(Duration::from_secs(2)).await.unwrap();
        // The token was due one second after the first call; 100ms already passed.
        assert!(start.elapsed() <= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_gate() {
        let gate = Arc::new(RateLimiter::from_millis("ticker", Some(50)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn unconfigured_gate_uses_millisecond_spacing() {
        let gate = RateLimiter::new("orders", None);
        assert_eq!(gate.interval(), Duration::from_millis(1));
        assert_eq!(gate.name(), "orders");
    }
}
