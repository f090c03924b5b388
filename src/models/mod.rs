use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which market an asset trades on; decides the data provider used
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Stock,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Stock => write!(f, "stock"),
        }
    }
}

/// A tradable asset, configured once at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Asset {
    pub symbol: String, // "BTC/USD" for crypto, "AAPL" for stocks
    pub class: AssetClass,
}

impl Asset {
    pub fn crypto(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            class: AssetClass::Crypto,
        }
    }

    pub fn stock(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            class: AssetClass::Stock,
        }
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Immutable snapshot of price history from a single fetch
///
/// Candles are ordered oldest first. `stale` is set when the series was
/// served from the last-known-good cache instead of a fresh provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl PriceSeries {
    pub fn new(symbol: &str, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.to_string(),
            candles,
            fetched_at: Utc::now(),
            stale: false,
        }
    }

    /// Closing prices, oldest first
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Copy of this series flagged as served from cache
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

/// Entry signal, produced and consumed within a single scan tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub asset: String,
    pub score: f64,
    pub take_profit_pct: f64, // percent units, 12.5 = +12.5%
    pub timestamp: DateTime<Utc>,
}
