use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::rate_limiter::{Acquire, ProviderRateLimiter};
use crate::api::{MarketDataProvider, ProviderError};
use crate::models::{Asset, PriceSeries};

/// Exponential backoff: `base * 2^attempt`, capped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Server-supplied wait, never longer than the cap
    pub fn clamp(&self, hint: Duration) -> Duration {
        hint.min(self.cap)
    }
}

/// How a provider path reacts to failed calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchPolicy {
    /// Retry transient and rate-limit failures with backoff (stock path)
    Retry { max_retries: u32, backoff: Backoff },
    /// Never retry; fall back to the last-known-good series marked stale (crypto path)
    ServeStale { backoff: Backoff },
}

/// Throttled, backoff-aware wrapper over one market-data provider
///
/// Owns the provider's rate limiter and a per-asset last-known-good cache.
pub struct RateLimitedFetcher {
    provider: Arc<dyn MarketDataProvider>,
    limiter: ProviderRateLimiter,
    policy: FetchPolicy,
    interval: String,
    lookback: usize,
    last_good: RwLock<HashMap<String, PriceSeries>>,
}

impl RateLimitedFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        limiter: ProviderRateLimiter,
        policy: FetchPolicy,
        interval: &str,
        lookback: usize,
    ) -> Self {
        Self {
            provider,
            limiter,
            policy,
            interval: interval.to_string(),
            lookback,
            last_good: RwLock::new(HashMap::new()),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn limiter(&self) -> &ProviderRateLimiter {
        &self.limiter
    }

    /// Fetch the price series for an asset under this provider's policy
    pub async fn fetch(&self, asset: &Asset) -> Result<PriceSeries, ProviderError> {
        match self.policy {
            FetchPolicy::Retry {
                max_retries,
                backoff,
            } => self.fetch_with_retry(asset, max_retries, backoff).await,
            FetchPolicy::ServeStale { backoff } => self.fetch_or_stale(asset, backoff).await,
        }
    }

    async fn fetch_with_retry(
        &self,
        asset: &Asset,
        max_retries: u32,
        backoff: Backoff,
    ) -> Result<PriceSeries, ProviderError> {
        let mut attempt = 0;

        loop {
            self.limiter.acquire().await;

            let error = match self.call(asset).await {
                Ok(series) => {
                    if attempt > 0 {
                        tracing::info!(
                            asset = %asset.symbol,
                            attempts = attempt + 1,
                            "Fetch succeeded after retry"
                        );
                    }
                    self.remember(&series);
                    return Ok(series);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_retries {
                return Err(error);
            }

            let delay = match &error {
                ProviderError::RateLimited {
                    retry_after: Some(after),
                } => backoff.clamp(*after),
                _ => backoff.delay(attempt),
            };

            tracing::warn!(
                asset = %asset.symbol,
                provider = %self.provider.name(),
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                max_retries,
                "Fetch failed, backing off"
            );

            if matches!(error, ProviderError::RateLimited { .. }) {
                // Every asset on this provider should wait, not just this one
                self.limiter.back_off(delay).await;
            } else {
                tokio::time::sleep(delay).await;
            }

            attempt += 1;
        }
    }

    async fn fetch_or_stale(
        &self,
        asset: &Asset,
        backoff: Backoff,
    ) -> Result<PriceSeries, ProviderError> {
        if let Acquire::Exhausted { .. } = self.limiter.try_acquire().await {
            if let Some(cached) = self.cached(&asset.symbol) {
                tracing::info!(
                    asset = %asset.symbol,
                    provider = %self.provider.name(),
                    "Call budget exhausted, serving last-known-good series"
                );
                return Ok(cached.into_stale());
            }
            self.limiter.acquire().await;
        }

        match self.call(asset).await {
            Ok(series) => {
                self.remember(&series);
                Ok(series)
            }
            Err(ProviderError::Permanent(msg)) => Err(ProviderError::Permanent(msg)),
            Err(error) => {
                if let ProviderError::RateLimited { retry_after } = &error {
                    let delay = match retry_after {
                        Some(hint) => backoff.clamp(*hint),
                        None => backoff.delay(0),
                    };
                    self.limiter.back_off(delay).await;
                }

                match self.cached(&asset.symbol) {
                    Some(cached) => {
                        tracing::warn!(
                            asset = %asset.symbol,
                            provider = %self.provider.name(),
                            error = %error,
                            "Fetch failed, serving last-known-good series"
                        );
                        Ok(cached.into_stale())
                    }
                    None => Err(error),
                }
            }
        }
    }

    async fn call(&self, asset: &Asset) -> Result<PriceSeries, ProviderError> {
        let series = self
            .provider
            .fetch_series(&asset.symbol, &self.interval, self.lookback)
            .await?;

        if series.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "{} returned no data for {}",
                self.provider.name(),
                asset.symbol
            )));
        }

        Ok(series)
    }

    fn remember(&self, series: &PriceSeries) {
        let mut cache = self.last_good.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(series.symbol.clone(), series.clone());
    }

    fn cached(&self, symbol: &str) -> Option<PriceSeries> {
        let cache = self.last_good.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(symbol).cloned()
    }
}
