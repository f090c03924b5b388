//! Capabilities the scanner consumes from the outside world, plus the
//! concrete clients behind them.

pub mod binance;
pub mod fear_greed;
pub mod knowledge;
pub mod synthetic;
pub mod twelve_data;

pub use binance::BinanceClient;
pub use fear_greed::FearGreedClient;
pub use knowledge::{FixedAdjustment, FixedSentiment, PatternBook, UnfilteredNews};
pub use synthetic::{SyntheticDataGenerator, SyntheticProvider};
pub use twelve_data::TwelveDataClient;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::indicators::IndicatorSet;
use crate::models::{Asset, PriceSeries, Signal};

/// Per-request timeout shared by every HTTP client
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure classes for external market-data calls
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Network hiccup or server-side error; worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Invalid symbol or rejected request; retrying cannot help
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Provider told us to slow down
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }

    /// Map a non-success HTTP status onto the error taxonomy
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            // 418 is Binance's "IP banned for ignoring 429s"
            429 | 418 => ProviderError::RateLimited { retry_after: None },
            s if status.is_server_error() => {
                ProviderError::Transient(format!("server error {}: {}", s, body))
            }
            s => ProviderError::Permanent(format!("request rejected ({}): {}", s, body)),
        }
    }

    /// Attach the server's retry hint to a rate-limit error
    pub fn with_retry_after(self, after: Option<Duration>) -> Self {
        match self {
            ProviderError::RateLimited { retry_after } => ProviderError::RateLimited {
                retry_after: after.or(retry_after),
            },
            other => other,
        }
    }
}

/// Delay-seconds form of `Retry-After`; HTTP-date values are ignored
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transient(e.to_string())
    }
}

/// Source of OHLCV history; one implementation per provider
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Fetch up to `lookback` candles at `interval` (e.g. "1h"), oldest first
    async fn fetch_series(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<PriceSeries, ProviderError>;
}

#[async_trait]
pub trait SentimentProvider: Send + Sync {
    /// Fear & Greed index in [0, 100]
    async fn current_fear_greed_index(&self) -> Result<u8, ProviderError>;
}

#[async_trait]
pub trait NewsValidator: Send + Sync {
    /// Whether current news flow confirms entering on `candidate`
    async fn is_validated(&self, asset: &Asset, candidate: &Signal) -> bool;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Signed score adjustment from known chart patterns
    async fn pattern_adjustment(&self, asset: &Asset, indicators: &IndicatorSet) -> f64;
}

/// Parse interval strings like "15min", "1h", "4h", "1d" into minutes
pub fn interval_minutes(interval: &str) -> Option<i64> {
    let split = interval.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = interval.split_at(split);
    let count: i64 = count.parse().ok()?;

    let unit_minutes = match unit {
        "m" | "min" => 1,
        "h" => 60,
        "d" | "day" => 1440,
        "w" | "week" => 10080,
        _ => return None,
    };

    Some(count * unit_minutes)
}
