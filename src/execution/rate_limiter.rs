use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Call accounting for one provider
///
/// `call_count` only resets when a window boundary is crossed and
/// `backoff_until` only moves forward until an explicit reset.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterState {
    pub window_start: Instant,
    pub call_count: u32,
    pub backoff_until: Option<Instant>,
}

impl RateLimiterState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            call_count: 0,
            backoff_until: None,
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now >= self.window_start + window {
            self.window_start = now;
            self.call_count = 0;
        }
    }

    fn active_backoff(&self, now: Instant) -> Option<Instant> {
        self.backoff_until.filter(|until| *until > now)
    }
}

/// Outcome of a non-blocking budget check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquire {
    Granted,
    /// No budget until `retry_at`
    Exhausted { retry_at: Instant },
}

/// Fixed-window call budget shared by every asset on one provider
///
/// The state sits behind an async mutex that is held for the whole
/// check / wait / increment sequence, so concurrent callers queue up
/// instead of jointly overrunning the cap.
pub struct ProviderRateLimiter {
    name: String,
    max_calls: u32,
    window: Duration,
    state: Mutex<RateLimiterState>,
}

impl ProviderRateLimiter {
    pub fn new(name: &str, max_calls: u32, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_calls: max_calls.max(1),
            window,
            state: Mutex::new(RateLimiterState::new(Instant::now())),
        }
    }

    /// e.g. `per_minute("binance", 50)`
    pub fn per_minute(name: &str, max_calls: u32) -> Self {
        Self::new(name, max_calls, Duration::from_secs(60))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Wait until a call may be issued, then count it
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();

            if let Some(until) = state.active_backoff(now) {
                tracing::debug!(
                    provider = %self.name,
                    wait_ms = (until - now).as_millis() as u64,
                    "Provider in backoff, waiting"
                );
                sleep_until(until).await;
                continue;
            }

            state.roll_window(now, self.window);

            if state.call_count < self.max_calls {
                state.call_count += 1;
                return;
            }

            let resets_at = state.window_start + self.window;
            tracing::info!(
                provider = %self.name,
                max_calls = self.max_calls,
                wait_ms = (resets_at - now).as_millis() as u64,
                "Call budget exhausted, delaying until window reset"
            );
            sleep_until(resets_at).await;
        }
    }

    /// Count a call if budget is available right now, never waits
    pub async fn try_acquire(&self) -> Acquire {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(until) = state.active_backoff(now) {
            return Acquire::Exhausted { retry_at: until };
        }

        state.roll_window(now, self.window);

        if state.call_count < self.max_calls {
            state.call_count += 1;
            Acquire::Granted
        } else {
            Acquire::Exhausted {
                retry_at: state.window_start + self.window,
            }
        }
    }

    /// Hold off all calls for at least `delay` from now
    pub async fn back_off(&self, delay: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + delay;

        state.backoff_until = Some(match state.backoff_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });

        tracing::warn!(
            provider = %self.name,
            backoff_ms = delay.as_millis() as u64,
            "Provider backoff extended"
        );
    }

    /// Start a fresh window and clear any backoff
    pub async fn reset(&self) {
        *self.state.lock().await = RateLimiterState::new(Instant::now());
    }

    pub async fn snapshot(&self) -> RateLimiterState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_calls_within_budget_are_immediate() {
        let limiter = ProviderRateLimiter::per_minute("test", 5);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.snapshot().await.call_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_over_budget_waits_for_window_reset() {
        let limiter = ProviderRateLimiter::per_minute("test", 3);
        let start = Instant::now();

        for _ in 0..4 {
            limiter.acquire().await;
        }

        assert!(Instant::now() - start >= Duration::from_secs(60));
        let state = limiter.snapshot().await;
        assert_eq!(state.call_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_exhaustion() {
        let limiter = ProviderRateLimiter::per_minute("test", 2);
        let start = Instant::now();

        assert_eq!(limiter.try_acquire().await, Acquire::Granted);
        assert_eq!(limiter.try_acquire().await, Acquire::Granted);
        assert_eq!(
            limiter.try_acquire().await,
            Acquire::Exhausted {
                retry_at: start + Duration::from_secs(60)
            }
        );

        // Exhausted checks are not counted
        assert_eq!(limiter.snapshot().await.call_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_next_call_and_never_shrinks() {
        let limiter = ProviderRateLimiter::per_minute("test", 10);
        let start = Instant::now();

        limiter.back_off(Duration::from_secs(8)).await;
        limiter.back_off(Duration::from_secs(2)).await;

        let state = limiter.snapshot().await;
        assert_eq!(state.backoff_until, Some(start + Duration::from_secs(8)));

        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_backoff() {
        let limiter = ProviderRateLimiter::per_minute("test", 1);
        limiter.acquire().await;
        limiter.back_off(Duration::from_secs(30)).await;

        limiter.reset().await;

        let state = limiter.snapshot().await;
        assert_eq!(state.call_count, 0);
        assert_eq!(state.backoff_until, None);
        assert_eq!(limiter.try_acquire().await, Acquire::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_overrun_cap() {
        let limiter = Arc::new(ProviderRateLimiter::per_minute("test", 5));
        let start = Instant::now();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }

        let first_window = times
            .iter()
            .filter(|t| **t - start < Duration::from_secs(60))
            .count();
        assert_eq!(first_window, 5);
    }
}
