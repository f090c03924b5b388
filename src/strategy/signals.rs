use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scoring::Score;
use crate::models::{Asset, Signal};

/// Configuration for signal generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub entry_threshold: f64,      // minimum score to enter
    pub base_take_profit_pct: f64, // target at the threshold
    pub max_take_profit_pct: f64,  // target at a perfect score
    pub curve_exponent: f64,       // 1.0 = linear
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            entry_threshold: 45.0,
            base_take_profit_pct: 10.0,
            max_take_profit_pct: 25.0,
            curve_exponent: 1.0,
        }
    }
}

/// Turns eligible scores into entry signals
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Take-profit target for a score, rising from the base target at the
    /// threshold toward the max target at 100
    pub fn take_profit_for(&self, score: f64) -> f64 {
        let c = &self.config;
        let span = 100.0 - c.entry_threshold;
        let t = if span > 0.0 {
            ((score - c.entry_threshold) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let range = c.max_take_profit_pct - c.base_take_profit_pct;
        c.base_take_profit_pct + range * t.powf(c.curve_exponent)
    }

    /// Signal the asset would get at this score, before news validation
    pub fn candidate(&self, asset: &Asset, score: &Score) -> Signal {
        self.candidate_at(asset, score, Utc::now())
    }

    pub fn candidate_at(&self, asset: &Asset, score: &Score, now: DateTime<Utc>) -> Signal {
        Signal {
            asset: asset.symbol.clone(),
            score: score.value,
            take_profit_pct: self.take_profit_for(score.value),
            timestamp: now,
        }
    }

    /// Emit an entry signal if the score clears the threshold, news
    /// validated it and the asset has no open position
    pub fn evaluate(
        &self,
        asset: &Asset,
        score: &Score,
        news_validated: bool,
        has_open_position: bool,
    ) -> Option<Signal> {
        self.evaluate_at(asset, score, news_validated, has_open_position, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        asset: &Asset,
        score: &Score,
        news_validated: bool,
        has_open_position: bool,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        if has_open_position {
            return None;
        }
        if score.value < self.config.entry_threshold {
            return None;
        }
        if !news_validated || !score.eligible {
            tracing::info!(
                asset = %asset.symbol,
                score = %format!("{:.1}", score.value),
                "Entry blocked by news validation"
            );
            return None;
        }

        Some(self.candidate_at(asset, score, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::scoring::ScoreBreakdown;

    fn score(value: f64) -> Score {
        Score {
            value,
            breakdown: ScoreBreakdown {
                trend: value,
                rsi_zone: value,
                bollinger: value,
                sentiment: value,
                knowledge_base: value,
            },
            eligible: true,
        }
    }

    #[test]
    fn test_emits_above_threshold() {
        let generator = SignalGenerator::default();
        let btc = Asset::crypto("BTC/USD");

        let signal = generator.evaluate(&btc, &score(60.0), true, false).unwrap();

        assert_eq!(signal.asset, "BTC/USD");
        assert_eq!(signal.score, 60.0);
        assert!(signal.take_profit_pct > 10.0 && signal.take_profit_pct < 25.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let generator = SignalGenerator::default();
        let btc = Asset::crypto("BTC/USD");

        assert!(generator.evaluate(&btc, &score(45.0), true, false).is_some());
        assert!(generator.evaluate(&btc, &score(44.9), true, false).is_none());
    }

    #[test]
    fn test_never_emits_without_news_validation() {
        let generator = SignalGenerator::default();
        let btc = Asset::crypto("BTC/USD");

        for value in [45.0, 70.0, 100.0] {
            assert!(generator.evaluate(&btc, &score(value), false, false).is_none());
            assert!(generator
                .evaluate(&btc, &score(value).gated(false), true, false)
                .is_none());
        }
    }

    #[test]
    fn test_no_signal_with_open_position() {
        let generator = SignalGenerator::default();
        assert!(generator
            .evaluate(&Asset::stock("AAPL"), &score(95.0), true, true)
            .is_none());
    }

    #[test]
    fn test_take_profit_curve_linear() {
        let generator = SignalGenerator::default();

        assert_eq!(generator.take_profit_for(45.0), 10.0);
        assert_eq!(generator.take_profit_for(100.0), 25.0);
        // Halfway between 45 and 100
        assert!((generator.take_profit_for(72.5) - 17.5).abs() < 1e-9);
        // Below threshold stays at base
        assert_eq!(generator.take_profit_for(10.0), 10.0);
    }

    #[test]
    fn test_take_profit_curve_exponent() {
        let generator = SignalGenerator::new(SignalConfig {
            curve_exponent: 2.0,
            ..SignalConfig::default()
        });

        // t = 0.5 -> 0.25 of the range
        assert!((generator.take_profit_for(72.5) - 13.75).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_monotonic_in_score() {
        let generator = SignalGenerator::default();
        let mut last = 0.0;
        for s in 45..=100 {
            let tp = generator.take_profit_for(s as f64);
            assert!(tp >= last);
            last = tp;
        }
    }

    #[test]
    fn test_candidate_ignores_gate() {
        let generator = SignalGenerator::default();
        let now = Utc::now();

        let candidate = generator.candidate_at(&Asset::stock("MSFT"), &score(30.0).gated(false), now);

        assert_eq!(candidate.score, 30.0);
        assert_eq!(candidate.timestamp, now);
        assert_eq!(candidate.take_profit_pct, 10.0);
    }
}
