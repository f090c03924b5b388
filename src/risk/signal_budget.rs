use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Longest re-entry cooldown accepted (30 days)
pub const MAX_REENTRY_COOLDOWN_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BudgetError {
    #[error("reentry_cooldown_secs must be at most {MAX_REENTRY_COOLDOWN_SECS}, got {0}")]
    CooldownTooLong(u64),

    #[error("tier '{0}' is defined more than once")]
    DuplicateTier(String),

    #[error("{symbol} is listed in both '{first}' and '{second}'")]
    SymbolInTwoTiers {
        symbol: String,
        first: String,
        second: String,
    },
}

/// Daily entry cap shared by a group of symbols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBudget {
    pub name: String,
    pub max_per_day: u32,
    pub symbols: Vec<String>,
}

impl TierBudget {
    pub fn new(name: &str, max_per_day: u32, symbols: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            max_per_day,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Limits on how many entries the scanner may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub max_signals_per_day: u32,
    pub reentry_cooldown_secs: u64, // per asset, measured from its last signal
    /// Symbols outside every tier only count against the global cap
    pub tiers: Vec<TierBudget>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_signals_per_day: 10,
            reentry_cooldown_secs: 1800,
            tiers: vec![
                TierBudget::new("blue_chip", 3, &["BTC/USD", "ETH/USD", "SOL/USD"]),
                TierBudget::new("mega_cap_equity", 3, &["AAPL", "MSFT", "NVDA"]),
            ],
        }
    }
}

impl BudgetSettings {
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.reentry_cooldown_secs > MAX_REENTRY_COOLDOWN_SECS {
            return Err(BudgetError::CooldownTooLong(self.reentry_cooldown_secs));
        }

        let mut names = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for tier in &self.tiers {
            if !names.insert(tier.name.as_str()) {
                return Err(BudgetError::DuplicateTier(tier.name.clone()));
            }
            for symbol in &tier.symbols {
                if let Some(first) = owners.insert(symbol.as_str(), tier.name.as_str()) {
                    return Err(BudgetError::SymbolInTwoTiers {
                        symbol: symbol.clone(),
                        first: first.to_string(),
                        second: tier.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn tier_of(&self, asset: &str) -> Option<&TierBudget> {
        self.tiers
            .iter()
            .find(|tier| tier.symbols.iter().any(|s| s == asset))
    }

    fn cooldown(&self) -> Duration {
        let secs = self.reentry_cooldown_secs.min(MAX_REENTRY_COOLDOWN_SECS);
        Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BudgetTrip {
    DailyLimit,
    TierLimit { tier: String },
    Cooldown { remaining_secs: i64 },
}

/// Daily signal counters (global and per tier) plus per-asset cooldown;
/// counters reset at UTC midnight
#[derive(Debug, Clone)]
pub struct SignalBudget {
    settings: BudgetSettings,
    day: NaiveDate,
    signals_today: u32,
    tier_signals: HashMap<String, u32>,
    last_signal: HashMap<String, DateTime<Utc>>,
}

impl SignalBudget {
    pub fn new(settings: BudgetSettings) -> Self {
        Self {
            settings,
            day: Utc::now().date_naive(),
            signals_today: 0,
            tier_signals: HashMap::new(),
            last_signal: HashMap::new(),
        }
    }

    pub fn signals_today(&self) -> u32 {
        self.signals_today
    }

    pub fn tier_signals_today(&self, tier: &str) -> u32 {
        self.tier_signals.get(tier).copied().unwrap_or(0)
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            tracing::debug!(
                previous = %self.day,
                signals = self.signals_today,
                "Resetting daily signal budget"
            );
            self.day = today;
            self.signals_today = 0;
            self.tier_signals.clear();
        }
    }

    pub fn check(&mut self, asset: &str) -> Result<(), BudgetTrip> {
        self.check_at(asset, Utc::now())
    }

    /// Whether an entry for `asset` fits the budget at `now`
    pub fn check_at(&mut self, asset: &str, now: DateTime<Utc>) -> Result<(), BudgetTrip> {
        self.roll_day(now);

        if self.signals_today >= self.settings.max_signals_per_day {
            return Err(BudgetTrip::DailyLimit);
        }

        if let Some(tier) = self.settings.tier_of(asset) {
            if self.tier_signals_today(&tier.name) >= tier.max_per_day {
                return Err(BudgetTrip::TierLimit {
                    tier: tier.name.clone(),
                });
            }
        }

        if let Some(last) = self.last_signal.get(asset) {
            let cooldown = self.settings.cooldown();
            let elapsed = now - *last;
            if elapsed < cooldown {
                return Err(BudgetTrip::Cooldown {
                    remaining_secs: (cooldown - elapsed).num_seconds(),
                });
            }
        }

        Ok(())
    }

    pub fn record(&mut self, asset: &str) {
        self.record_at(asset, Utc::now())
    }

    pub fn record_at(&mut self, asset: &str, now: DateTime<Utc>) {
        self.roll_day(now);
        self.signals_today += 1;
        if let Some(tier) = self.settings.tier_of(asset) {
            *self.tier_signals.entry(tier.name.clone()).or_insert(0) += 1;
        }
        self.last_signal.insert(asset.to_string(), now);
    }
}

impl Default for SignalBudget {
    fn default() -> Self {
        Self::new(BudgetSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_budget_ok() {
        let mut budget = SignalBudget::default();
        assert_eq!(budget.check_at("BTC/USD", noon()), Ok(()));
    }

    #[test]
    fn test_daily_limit() {
        let mut budget = SignalBudget::new(BudgetSettings {
            max_signals_per_day: 2,
            reentry_cooldown_secs: 0,
            tiers: vec![],
        });

        budget.record_at("BTC/USD", noon());
        budget.record_at("ETH/USD", noon());

        assert_eq!(budget.check_at("SOL/USD", noon()), Err(BudgetTrip::DailyLimit));
    }

    #[test]
    fn test_daily_limit_resets_next_day() {
        let mut budget = SignalBudget::new(BudgetSettings {
            max_signals_per_day: 1,
            reentry_cooldown_secs: 0,
            tiers: vec![],
        });
        budget.record_at("BTC/USD", noon());

        let tomorrow = noon() + Duration::days(1);
        assert_eq!(budget.check_at("ETH/USD", tomorrow), Ok(()));
        assert_eq!(budget.signals_today(), 0);
    }

    #[test]
    fn test_reentry_cooldown() {
        let mut budget = SignalBudget::default();
        budget.record_at("AAPL", noon());

        assert_eq!(
            budget.check_at("AAPL", noon() + Duration::minutes(10)),
            Err(BudgetTrip::Cooldown {
                remaining_secs: 1200
            })
        );
        // Other assets are unaffected
        assert_eq!(budget.check_at("MSFT", noon() + Duration::minutes(10)), Ok(()));
        assert_eq!(budget.check_at("AAPL", noon() + Duration::minutes(30)), Ok(()));
    }

    #[test]
    fn test_tier_limit_applies_within_global_cap() {
        let mut budget = SignalBudget::new(BudgetSettings {
            max_signals_per_day: 10,
            reentry_cooldown_secs: 0,
            tiers: vec![TierBudget::new("blue_chip", 2, &["BTC/USD", "ETH/USD", "SOL/USD"])],
        });

        budget.record_at("BTC/USD", noon());
        budget.record_at("ETH/USD", noon());

        assert_eq!(
            budget.check_at("SOL/USD", noon()),
            Err(BudgetTrip::TierLimit {
                tier: "blue_chip".into()
            })
        );
        // Untiered symbols only count against the global cap
        assert_eq!(budget.check_at("DOGE/USD", noon()), Ok(()));
        assert_eq!(budget.tier_signals_today("blue_chip"), 2);
        assert_eq!(budget.signals_today(), 2);
    }

    #[test]
    fn test_tier_counts_reset_next_day() {
        let mut budget = SignalBudget::new(BudgetSettings {
            max_signals_per_day: 10,
            reentry_cooldown_secs: 0,
            tiers: vec![TierBudget::new("equity", 1, &["AAPL", "MSFT"])],
        });
        budget.record_at("AAPL", noon());
        assert!(budget.check_at("MSFT", noon()).is_err());

        let tomorrow = noon() + Duration::days(1);
        assert_eq!(budget.check_at("MSFT", tomorrow), Ok(()));
        assert_eq!(budget.tier_signals_today("equity"), 0);
    }

    #[test]
    fn test_global_cap_checked_before_tier() {
        let mut budget = SignalBudget::new(BudgetSettings {
            max_signals_per_day: 1,
            reentry_cooldown_secs: 0,
            tiers: vec![TierBudget::new("blue_chip", 1, &["BTC/USD", "ETH/USD"])],
        });
        budget.record_at("BTC/USD", noon());

        assert_eq!(budget.check_at("ETH/USD", noon()), Err(BudgetTrip::DailyLimit));
    }

    #[test]
    fn test_huge_cooldown_does_not_overflow() {
        let mut budget = SignalBudget::new(BudgetSettings {
            reentry_cooldown_secs: u64::MAX,
            ..BudgetSettings::default()
        });
        budget.record_at("AAPL", noon());

        assert_eq!(
            budget.check_at("AAPL", noon()),
            Err(BudgetTrip::Cooldown {
                remaining_secs: MAX_REENTRY_COOLDOWN_SECS as i64
            })
        );
    }

    #[test]
    fn test_settings_validation() {
        assert_eq!(BudgetSettings::default().validate(), Ok(()));

        let too_long = BudgetSettings {
            reentry_cooldown_secs: MAX_REENTRY_COOLDOWN_SECS + 1,
            ..BudgetSettings::default()
        };
        assert_eq!(
            too_long.validate(),
            Err(BudgetError::CooldownTooLong(MAX_REENTRY_COOLDOWN_SECS + 1))
        );

        let duplicate = BudgetSettings {
            tiers: vec![
                TierBudget::new("a", 1, &["BTC/USD"]),
                TierBudget::new("a", 1, &["ETH/USD"]),
            ],
            ..BudgetSettings::default()
        };
        assert_eq!(duplicate.validate(), Err(BudgetError::DuplicateTier("a".into())));

        let overlapping = BudgetSettings {
            tiers: vec![
                TierBudget::new("a", 1, &["BTC/USD"]),
                TierBudget::new("b", 1, &["BTC/USD"]),
            ],
            ..BudgetSettings::default()
        };
        assert!(matches!(
            overlapping.validate(),
            Err(BudgetError::SymbolInTwoTiers { .. })
        ));
    }
}
