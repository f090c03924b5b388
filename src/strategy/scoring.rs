use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indicators::IndicatorSet;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("{field} is not finite")]
    NonFinite { field: &'static str },

    #[error("EMA200 must be positive, got {0}")]
    NonPositiveEma(f64),

    #[error("fear & greed index {0} outside [0, 100]")]
    FearGreedOutOfRange(u8),

    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),
}

/// Relative weight of each sub-score; normalized by their sum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub trend: f64,
    pub rsi_zone: f64,
    pub bollinger: f64,
    pub sentiment: f64,
    pub knowledge_base: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            trend: 30.0,
            rsi_zone: 25.0,
            bollinger: 20.0,
            sentiment: 15.0,
            knowledge_base: 10.0,
        }
    }
}

impl ScoringWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.trend,
            self.rsi_zone,
            self.bollinger,
            self.sentiment,
            self.knowledge_base,
        ]
    }

    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ScoringError::InvalidWeights(
                "weights must be finite and non-negative".into(),
            ));
        }
        if self.total() <= 0.0 {
            return Err(ScoringError::InvalidWeights("weights must not all be zero".into()));
        }
        Ok(())
    }
}

/// Normalized [0, 100] sub-scores that went into a Score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub trend: f64,
    pub rsi_zone: f64,
    pub bollinger: f64,
    pub sentiment: f64,
    pub knowledge_base: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub value: f64,
    pub breakdown: ScoreBreakdown,
    /// False when news did not validate the entry; `value` is still computed
    pub eligible: bool,
}

impl Score {
    /// Same score with the news gate applied
    pub fn gated(self, news_validated: bool) -> Self {
        Self {
            eligible: news_validated,
            ..self
        }
    }
}

/// Combines indicators, sentiment and knowledge-base input into one score
#[derive(Debug, Clone, Default)]
pub struct ScoringModel {
    weights: ScoringWeights,
}

impl ScoringModel {
    pub fn new(weights: ScoringWeights) -> Result<Self, ScoringError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(
        &self,
        indicators: &IndicatorSet,
        fear_greed: u8,
        kb_adjustment: f64,
        news_validated: bool,
    ) -> Result<Score, ScoringError> {
        Self::check_inputs(indicators, fear_greed, kb_adjustment)?;

        let breakdown = ScoreBreakdown {
            trend: trend_score(indicators.price, indicators.ema200),
            rsi_zone: rsi_zone_score(indicators.rsi),
            bollinger: bollinger_score(indicators),
            sentiment: 100.0 - f64::from(fear_greed),
            knowledge_base: (50.0 + kb_adjustment).clamp(0.0, 100.0),
        };

        let w = &self.weights;
        let weighted = breakdown.trend * w.trend
            + breakdown.rsi_zone * w.rsi_zone
            + breakdown.bollinger * w.bollinger
            + breakdown.sentiment * w.sentiment
            + breakdown.knowledge_base * w.knowledge_base;
        let value = (weighted / w.total()).clamp(0.0, 100.0);

        Ok(Score {
            value,
            breakdown,
            eligible: news_validated,
        })
    }

    fn check_inputs(
        indicators: &IndicatorSet,
        fear_greed: u8,
        kb_adjustment: f64,
    ) -> Result<(), ScoringError> {
        let fields = [
            ("price", indicators.price),
            ("rsi", indicators.rsi),
            ("ema200", indicators.ema200),
            ("bollinger.upper", indicators.bollinger.upper),
            ("bollinger.middle", indicators.bollinger.middle),
            ("bollinger.lower", indicators.bollinger.lower),
            ("kb_adjustment", kb_adjustment),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ScoringError::NonFinite { field });
        }
        if indicators.ema200 <= 0.0 {
            return Err(ScoringError::NonPositiveEma(indicators.ema200));
        }
        if fear_greed > 100 {
            return Err(ScoringError::FearGreedOutOfRange(fear_greed));
        }
        Ok(())
    }
}

/// 50 at the EMA, saturating at ±10% away from it
fn trend_score(price: f64, ema200: f64) -> f64 {
    (50.0 + 500.0 * (price - ema200) / ema200).clamp(0.0, 100.0)
}

/// 100 when oversold (<= 30), 0 when overbought (>= 70)
fn rsi_zone_score(rsi: f64) -> f64 {
    ((70.0 - rsi) / 40.0 * 100.0).clamp(0.0, 100.0)
}

/// Favors prices near the lower band
fn bollinger_score(indicators: &IndicatorSet) -> f64 {
    match indicators.bollinger.percent_b(indicators.price) {
        Some(b) => ((1.0 - b) * 100.0).clamp(0.0, 100.0),
        None => 50.0,
    }
}
