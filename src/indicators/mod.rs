// Technical indicators module
// Implements RSI, EMA200 and Bollinger Bands for entry scoring

pub mod bollinger;
pub mod moving_average;
pub mod rsi;
pub mod volume;

pub use bollinger::{calculate_bollinger, BollingerBands};
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
pub use volume::calculate_volume_ratio;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PriceSeries;

pub const RSI_PERIOD: usize = 14;
pub const EMA_PERIOD: usize = 200;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const VOLUME_AVERAGE_PERIOD: usize = 20;

/// Raised when a series is too short for one of the indicators
#[derive(Debug, Clone, PartialEq, Error)]
#[error("insufficient data for {indicator}: need {required} points, have {available}")]
pub struct InsufficientDataError {
    pub indicator: &'static str,
    pub required: usize,
    pub available: usize,
}

/// Indicators derived from one price series, discarded after scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub price: f64, // last close
    pub rsi: f64,
    pub ema200: f64,
    pub bollinger: BollingerBands,
}

/// Computes the indicator set used by scoring and exit evaluation.
///
/// Pure: identical input series always produce an identical `IndicatorSet`.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    pub fn new() -> Self {
        Self
    }

    /// Longest history any indicator needs
    pub fn min_points_required(&self) -> usize {
        EMA_PERIOD.max(RSI_PERIOD + 1).max(BOLLINGER_PERIOD)
    }

    pub fn compute(&self, series: &PriceSeries) -> Result<IndicatorSet, InsufficientDataError> {
        let closes = series.closes();
        let available = closes.len();

        let insufficient = |indicator: &'static str, required: usize| InsufficientDataError {
            indicator,
            required,
            available,
        };

        let ema200 =
            calculate_ema(&closes, EMA_PERIOD).ok_or_else(|| insufficient("EMA200", EMA_PERIOD))?;
        let rsi = calculate_rsi(&closes, RSI_PERIOD)
            .ok_or_else(|| insufficient("RSI", RSI_PERIOD + 1))?;
        let bollinger = calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV)
            .ok_or_else(|| insufficient("Bollinger", BOLLINGER_PERIOD))?;
        let price = *closes.last().ok_or_else(|| insufficient("price", 1))?;

        Ok(IndicatorSet {
            price,
            rsi,
            ema200,
            bollinger,
        })
    }
}
