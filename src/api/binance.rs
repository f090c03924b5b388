use anyhow::Context;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{MarketDataProvider, ProviderError};
use crate::models::{Candle, PriceSeries};

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const MAX_KLINES: usize = 1000;

/// Crypto market data from Binance spot klines
///
/// Symbols are configured as "BASE/USD" and mapped onto the USDT pair.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Error payload, e.g. `{"code":-1121,"msg":"Invalid symbol."}`
#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}

impl BinanceClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(BINANCE_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(super::HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// "BTC/USD" -> "BTCUSDT"
    pub fn pair_symbol(symbol: &str) -> String {
        let base = symbol.split('/').next().unwrap_or(symbol);
        format!("{}USDT", base.to_uppercase())
    }

    fn parse_field(row: &[Value], idx: usize) -> Result<f64, ProviderError> {
        let value = row
            .get(idx)
            .ok_or_else(|| ProviderError::Transient(format!("kline missing field {}", idx)))?;

        match value {
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|e| ProviderError::Transient(format!("bad kline field {}: {}", idx, e))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ProviderError::Transient(format!("bad kline field {}", idx))),
            _ => Err(ProviderError::Transient(format!("bad kline field {}", idx))),
        }
    }

    fn parse_klines(rows: Vec<Vec<Value>>) -> Result<Vec<Candle>, ProviderError> {
        rows.iter()
            .map(|row| {
                let open_time_ms = row
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ProviderError::Transient("kline missing open time".into()))?;
                let timestamp = Utc
                    .timestamp_millis_opt(open_time_ms)
                    .single()
                    .ok_or_else(|| ProviderError::Transient("kline open time out of range".into()))?;

                Ok(Candle {
                    timestamp,
                    open: Self::parse_field(row, 1)?,
                    high: Self::parse_field(row, 2)?,
                    low: Self::parse_field(row, 3)?,
                    close: Self::parse_field(row, 4)?,
                    volume: Self::parse_field(row, 5)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_series(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<PriceSeries, ProviderError> {
        let pair = Self::pair_symbol(symbol);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            pair,
            interval,
            lookback.min(MAX_KLINES)
        );

        tracing::debug!(asset = %symbol, pair = %pair, "Fetching Binance klines");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = super::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();

            // Binance reports unknown pairs as 400 with code -1121
            if let Ok(err) = serde_json::from_str::<BinanceError>(&body) {
                if err.code == -1121 {
                    return Err(ProviderError::Permanent(format!("{}: {}", pair, err.msg)));
                }
            }
            return Err(
                ProviderError::from_status(status, &body).with_retry_after(retry_after)
            );
        }

        let rows: Vec<Vec<Value>> = response.json().await?;
        let candles = Self::parse_klines(rows)?;

        if candles.is_empty() {
            return Err(ProviderError::Permanent(format!("no klines returned for {}", pair)));
        }

        tracing::debug!(asset = %symbol, points = candles.len(), "Fetched Binance klines");

        Ok(PriceSeries::new(symbol, candles))
    }
}
