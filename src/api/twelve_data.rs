use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{MarketDataProvider, ProviderError};
use crate::models::{Candle, PriceSeries};

pub const TWELVE_DATA_API_BASE: &str = "https://api.twelvedata.com";
const MAX_OUTPUT_SIZE: usize = 5000;

/// Equity market data from the Twelve Data `time_series` endpoint
#[derive(Clone)]
pub struct TwelveDataClient {
    client: Client,
    api_key: String,
    base_url: String,
}

/// Response from /time_series; `status` is "ok" or "error"
#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    status: String,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
}

/// One bar; Twelve Data sends numbers as strings, newest first
#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

impl TwelveDataClient {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, TWELVE_DATA_API_BASE)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(super::HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Twelve Data uses "1min"/"1h"/"1day" style intervals
    fn provider_interval(interval: &str) -> String {
        match interval {
            "1d" => "1day".to_string(),
            "1w" => "1week".to_string(),
            other => other.strip_suffix('m').map(|n| format!("{}min", n)).unwrap_or_else(|| other.to_string()),
        }
    }

    fn parse_number(field: &str, raw: &str) -> Result<f64, ProviderError> {
        raw.parse::<f64>()
            .map_err(|e| ProviderError::Transient(format!("bad {} value '{}': {}", field, raw, e)))
    }

    fn parse_value(value: &TimeSeriesValue) -> Result<Candle, ProviderError> {
        // Intraday bars carry a time, daily bars only a date
        let naive = NaiveDateTime::parse_from_str(&value.datetime, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| {
                NaiveDate::parse_from_str(&value.datetime, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
            })
            .map_err(|e| {
                ProviderError::Transient(format!("bad datetime '{}': {}", value.datetime, e))
            })?;

        Ok(Candle {
            timestamp: Utc.from_utc_datetime(&naive),
            open: Self::parse_number("open", &value.open)?,
            high: Self::parse_number("high", &value.high)?,
            low: Self::parse_number("low", &value.low)?,
            close: Self::parse_number("close", &value.close)?,
            volume: match &value.volume {
                Some(v) => Self::parse_number("volume", v)?,
                None => 0.0,
            },
        })
    }

    fn classify_error(code: Option<u16>, message: String) -> ProviderError {
        match code {
            Some(429) => ProviderError::RateLimited { retry_after: None },
            Some(c) if c >= 500 => ProviderError::Transient(message),
            _ => ProviderError::Permanent(message),
        }
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataClient {
    fn name(&self) -> &str {
        "twelve_data"
    }

    async fn fetch_series(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<PriceSeries, ProviderError> {
        let url = format!(
            "{}/time_series?symbol={}&interval={}&outputsize={}&apikey={}",
            self.base_url,
            symbol,
            Self::provider_interval(interval),
            lookback.min(MAX_OUTPUT_SIZE),
            self.api_key
        );

        tracing::debug!(asset = %symbol, "Fetching Twelve Data time series");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = super::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_status(status, &body).with_retry_after(retry_after)
            );
        }

        // Errors usually arrive as HTTP 200 with status "error"
        let data: TimeSeriesResponse = response.json().await?;
        if data.status != "ok" {
            let message = data
                .message
                .unwrap_or_else(|| format!("time_series failed for {}", symbol));
            return Err(Self::classify_error(data.code, message));
        }

        let mut candles = data
            .values
            .iter()
            .map(Self::parse_value)
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();

        if candles.is_empty() {
            return Err(ProviderError::Permanent(format!("no bars returned for {}", symbol)));
        }

        tracing::debug!(asset = %symbol, points = candles.len(), "Fetched Twelve Data bars");

        Ok(PriceSeries::new(symbol, candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_interval() {
        assert_eq!(TwelveDataClient::provider_interval("1h"), "1h");
        assert_eq!(TwelveDataClient::provider_interval("15m"), "15min");
        assert_eq!(TwelveDataClient::provider_interval("1d"), "1day");
    }

    #[tokio::test]
    async fn test_fetch_series_reverses_to_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "meta": {"symbol": "AAPL", "interval": "1h"},
            "values": [
                {"datetime": "2024-05-01 11:30:00", "open": "171", "high": "172", "low": "170", "close": "171.5", "volume": "1200"},
                {"datetime": "2024-05-01 10:30:00", "open": "170", "high": "171", "low": "169", "close": "170.5", "volume": "1000"}
            ],
            "status": "ok"
        }"#;
        let mock = server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("symbol".into(), "AAPL".into()),
                mockito::Matcher::UrlEncoded("apikey".into(), "test-key".into()),
            ]))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("test-key".into(), &server.url()).unwrap();
        let series = client.fetch_series("AAPL", "1h", 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(series.closes(), vec![170.5, 171.5]);
        assert_eq!(series.candles[1].volume, 1200.0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":400,"message":"**symbol** not found: ZZZZ","status":"error"}"#)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), &server.url()).unwrap();
        let err = client.fetch_series("ZZZZ", "1h", 10).await.unwrap_err();

        assert!(matches!(err, ProviderError::Permanent(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_credit_exhaustion_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":429,"message":"You have run out of API credits","status":"error"}"#)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), &server.url()).unwrap();
        let err = client.fetch_series("AAPL", "1h", 10).await.unwrap_err();

        assert_eq!(err, ProviderError::RateLimited { retry_after: None });
    }

    #[tokio::test]
    async fn test_http_429_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "45")
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), &server.url()).unwrap();
        let err = client.fetch_series("AAPL", "1h", 10).await.unwrap_err();

        assert_eq!(
            err,
            ProviderError::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(45))
            }
        );
    }
}
