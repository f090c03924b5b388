use anyhow::Context;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::{ProviderError, SentimentProvider};

pub const FEAR_GREED_API_BASE: &str = "https://api.alternative.me";
const RATE_LIMIT_RPM: u32 = 60; // alternative.me allows 60 requests per minute

// Type alias for the rate limiter to simplify signatures
type FearGreedRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Crypto Fear & Greed index from alternative.me
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct FearGreedClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<FearGreedRateLimiter>,
}

/// Response from /fng/ endpoint
#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    value: String,
    value_classification: String,
}

impl FearGreedClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(FEAR_GREED_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(super::HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(RATE_LIMIT_RPM).context("Rate limit must be non-zero")?;
        let quota = Quota::per_minute(rpm);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }
}

#[async_trait]
impl SentimentProvider for FearGreedClient {
    async fn current_fear_greed_index(&self) -> Result<u8, ProviderError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/fng/?limit=1", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = super::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_status(status, &body).with_retry_after(retry_after)
            );
        }

        let data: FearGreedResponse = response.json().await?;
        let entry = data
            .data
            .first()
            .ok_or_else(|| ProviderError::Transient("empty fear & greed response".into()))?;

        let value: u8 = entry.value.parse().map_err(|e| {
            ProviderError::Transient(format!("bad fear & greed value '{}': {}", entry.value, e))
        })?;
        if value > 100 {
            return Err(ProviderError::Transient(format!("fear & greed out of range: {}", value)));
        }

        tracing::debug!(
            value,
            classification = %entry.value_classification,
            "Fetched Fear & Greed index"
        );

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parses_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fng/")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "1".into()))
            .with_status(200)
            .with_body(
                r#"{"name":"Fear and Greed Index","data":[{"value":"27","value_classification":"Fear","timestamp":"1717200000"}]}"#,
            )
            .create_async()
            .await;

        let client = FearGreedClient::with_base_url(&server.url()).unwrap();
        let value = client.current_fear_greed_index().await.unwrap();

        mock.assert_async().await;
        assert_eq!(value, 27);
    }

    #[tokio::test]
    async fn test_empty_data_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fng/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let client = FearGreedClient::with_base_url(&server.url()).unwrap();
        let err = client.current_fear_greed_index().await.unwrap_err();

        assert!(matches!(err, ProviderError::Transient(_)));
    }
}
