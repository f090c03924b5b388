use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{KnowledgeBase, NewsValidator, ProviderError, SentimentProvider};
use crate::indicators::IndicatorSet;
use crate::models::{Asset, Signal};

/// Largest absolute adjustment a knowledge base may contribute
pub const MAX_ADJUSTMENT: f64 = 50.0;

/// Score deltas for each chart pattern the pattern book recognizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternWeights {
    /// RSI < 30 with price at or below the lower band
    pub oversold_bounce: f64,
    /// Uptrend (above EMA200) pulling back under the middle band, RSI 40-55
    pub trend_pullback: f64,
    /// RSI > 70 with price at or above the upper band
    pub overbought_extension: f64,
    /// More than 10% under EMA200, under the lower band, RSI < 40
    pub breakdown: f64,
}

impl Default for PatternWeights {
    fn default() -> Self {
        Self {
            oversold_bounce: 10.0,
            trend_pullback: 5.0,
            overbought_extension: -10.0,
            breakdown: -15.0,
        }
    }
}

/// Rule-based stand-in for the document-derived knowledge base
#[derive(Debug, Clone, Default)]
pub struct PatternBook {
    weights: PatternWeights,
}

impl PatternBook {
    pub fn new(weights: PatternWeights) -> Self {
        Self { weights }
    }

    /// Sum of the deltas of every matching pattern, clamped to ±MAX_ADJUSTMENT
    pub fn evaluate(&self, ind: &IndicatorSet) -> f64 {
        let bands = &ind.bollinger;
        let mut delta = 0.0;

        if ind.rsi < 30.0 && ind.price <= bands.lower {
            delta += self.weights.oversold_bounce;
        }
        if ind.price > ind.ema200 && (40.0..=55.0).contains(&ind.rsi) && ind.price < bands.middle {
            delta += self.weights.trend_pullback;
        }
        if ind.rsi > 70.0 && ind.price >= bands.upper {
            delta += self.weights.overbought_extension;
        }
        if ind.price < ind.ema200 * 0.9 && ind.price < bands.lower && ind.rsi < 40.0 {
            delta += self.weights.breakdown;
        }

        delta.clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
    }
}

#[async_trait]
impl KnowledgeBase for PatternBook {
    async fn pattern_adjustment(&self, asset: &Asset, indicators: &IndicatorSet) -> f64 {
        let delta = self.evaluate(indicators);
        if delta != 0.0 {
            tracing::debug!(asset = %asset.symbol, delta, "Pattern book adjustment");
        }
        delta
    }
}

/// Knowledge base that always returns the same delta
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedAdjustment(pub f64);

#[async_trait]
impl KnowledgeBase for FixedAdjustment {
    async fn pattern_adjustment(&self, _asset: &Asset, _indicators: &IndicatorSet) -> f64 {
        self.0
    }
}

/// News validator used when no news feed is wired in: every candidate passes
#[derive(Debug, Clone, Copy, Default)]
pub struct UnfilteredNews;

#[async_trait]
impl NewsValidator for UnfilteredNews {
    async fn is_validated(&self, _asset: &Asset, _candidate: &Signal) -> bool {
        true
    }
}

/// Sentiment source that always reports the same index, for offline runs
#[derive(Debug, Clone, Copy)]
pub struct FixedSentiment(pub u8);

#[async_trait]
impl SentimentProvider for FixedSentiment {
    async fn current_fear_greed_index(&self) -> Result<u8, ProviderError> {
        Ok(self.0.min(100))
    }
}
