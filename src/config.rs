//! Runtime configuration.
//!
//! Layered lowest to highest priority: built-in defaults, an optional TOML
//! file, then environment variables. Environment keys carry a `SIGNALBOT_`
//! prefix and nested keys use `__`, e.g.
//! `SIGNALBOT_RATE_LIMITS__CRYPTO_PER_MINUTE=40`. A few well-known
//! unprefixed variables (see [`ENV_ALIASES`]) are honoured too.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::api::binance::BINANCE_API_BASE;
use crate::api::HTTP_TIMEOUT;
use crate::api::fear_greed::FEAR_GREED_API_BASE;
use crate::api::knowledge::PatternWeights;
use crate::api::twelve_data::TWELVE_DATA_API_BASE;
use crate::execution::{Backoff, ExitRules, FetchPolicy, ProviderRateLimiter, ScanSettings};
use crate::indicators::IndicatorEngine;
use crate::models::{Asset, AssetClass};
use crate::risk::{BudgetSettings, PumpFilter};
use crate::strategy::{ScoringWeights, SignalConfig};

/// Config file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_NAME: &str = "signalbot";

pub const ENV_PREFIX: &str = "SIGNALBOT";

/// Unprefixed environment variables and the settings key each one sets
pub const ENV_ALIASES: &[(&str, &str)] = &[
    ("TWELVE_DATA_API_KEY", "providers.twelve_data_api_key"),
    ("SCAN_INTERVAL", "scan_interval"),
    ("ASSET_DELAY", "asset_delay"),
    ("STOP_LOSS_PERCENT", "stop_loss_percent"),
    ("TAKE_PROFIT_PERCENT", "take_profit_percent"),
    ("AI_ENTRY_THRESHOLD", "ai_entry_threshold"),
];

/// Upper bound on stock retries; every retry adds a full HTTP timeout
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("{0} is required when stock assets are configured")]
    MissingCredential(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub crypto_per_minute: u32,
    pub stock_per_minute: u32,
    pub window_secs: u64,
    pub max_retries: u32, // stock path only
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            crypto_per_minute: 50,
            stock_per_minute: 30,
            window_secs: 60,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
        }
    }
}

impl RateLimitSettings {
    fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Longest a retried stock fetch can run: every attempt hits the HTTP
    /// timeout, every wait is a capped Retry-After and one full limiter
    /// window is spent queueing
    pub fn worst_case_fetch(&self) -> Duration {
        let retries = self.max_retries.min(MAX_RETRIES_LIMIT);
        let waits = self.backoff().cap.saturating_mul(retries);

        HTTP_TIMEOUT
            .saturating_mul(retries + 1)
            .saturating_add(waits)
            .saturating_add(self.window())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub binance_base_url: String,
    pub twelve_data_base_url: String,
    pub fear_greed_base_url: String,
    pub twelve_data_api_key: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            binance_base_url: BINANCE_API_BASE.to_string(),
            twelve_data_base_url: TWELVE_DATA_API_BASE.to_string(),
            fear_greed_base_url: FEAR_GREED_API_BASE.to_string(),
            twelve_data_api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scan_interval: u64, // seconds
    pub asset_delay: u64,   // seconds between assets
    pub asset_timeout: u64, // seconds per asset

    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub max_take_profit_percent: f64,
    pub take_profit_curve_exponent: f64,
    pub ai_entry_threshold: f64,

    pub interval: String, // candle interval, e.g. "1h"
    pub lookback: usize,  // candles per fetch
    pub notification_queue_capacity: usize,

    pub assets: Vec<Asset>,
    pub scoring: ScoringWeights,
    pub exit: ExitRules,
    pub patterns: PatternWeights,
    pub rate_limits: RateLimitSettings,
    pub budget: BudgetSettings,
    pub pump_filter: PumpFilter,
    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_interval: 900,
            asset_delay: 2,
            asset_timeout: 300,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            max_take_profit_percent: 25.0,
            take_profit_curve_exponent: 1.0,
            ai_entry_threshold: 45.0,
            interval: "1h".to_string(),
            lookback: 250,
            notification_queue_capacity: 256,
            assets: default_assets(),
            scoring: ScoringWeights::default(),
            exit: ExitRules::default(),
            patterns: PatternWeights::default(),
            rate_limits: RateLimitSettings::default(),
            budget: BudgetSettings::default(),
            pump_filter: PumpFilter::default(),
            providers: ProviderSettings::default(),
        }
    }
}

fn default_assets() -> Vec<Asset> {
    vec![
        Asset::crypto("BTC/USD"),
        Asset::crypto("ETH/USD"),
        Asset::crypto("SOL/USD"),
        Asset::stock("AAPL"),
        Asset::stock("MSFT"),
        Asset::stock("NVDA"),
    ]
}

impl Settings {
    /// Load settings from `path` (or `signalbot.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let mut builder = ::config::Config::builder().add_source(file).add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        for (var, key) in ENV_ALIASES {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Reject settings the scanner cannot run with
    ///
    /// In dry-run mode market data is synthetic, so no credentials are needed.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.assets.is_empty() {
            return invalid("at least one asset must be configured".into());
        }
        if self.scan_interval == 0 {
            return invalid("scan_interval must be positive".into());
        }
        if self.asset_timeout == 0 {
            return invalid("asset_timeout must be positive".into());
        }
        if !(self.stop_loss_percent > 0.0 && self.stop_loss_percent < 100.0) {
            return invalid(format!(
                "stop_loss_percent must be in (0, 100), got {}",
                self.stop_loss_percent
            ));
        }
        if self.take_profit_percent <= 0.0 {
            return invalid("take_profit_percent must be positive".into());
        }
        if self.max_take_profit_percent < self.take_profit_percent {
            return invalid(format!(
                "max_take_profit_percent ({}) is below take_profit_percent ({})",
                self.max_take_profit_percent, self.take_profit_percent
            ));
        }
        if self.take_profit_curve_exponent <= 0.0 {
            return invalid("take_profit_curve_exponent must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.ai_entry_threshold) {
            return invalid(format!(
                "ai_entry_threshold must be in [0, 100], got {}",
                self.ai_entry_threshold
            ));
        }
        if crate::api::interval_minutes(&self.interval).is_none() {
            return invalid(format!("unsupported candle interval '{}'", self.interval));
        }

        let min_points = IndicatorEngine::new().min_points_required();
        if self.lookback < min_points {
            return invalid(format!(
                "lookback must be at least {} candles, got {}",
                min_points, self.lookback
            ));
        }

        let limits = &self.rate_limits;
        if limits.crypto_per_minute == 0 || limits.stock_per_minute == 0 || limits.window_secs == 0 {
            return invalid("rate limits must be positive".into());
        }
        if limits.backoff_cap_ms < limits.backoff_base_ms {
            return invalid("backoff_cap_ms must not be below backoff_base_ms".into());
        }
        if limits.max_retries > MAX_RETRIES_LIMIT {
            return invalid(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, limits.max_retries
            ));
        }
        let worst_case = limits.worst_case_fetch();
        if Duration::from_secs(self.asset_timeout) < worst_case {
            return invalid(format!(
                "asset_timeout ({}s) is shorter than a fully retried fetch ({}s)",
                self.asset_timeout,
                worst_case.as_secs_f64().ceil()
            ));
        }
        if self.notification_queue_capacity == 0 {
            return invalid("notification_queue_capacity must be positive".into());
        }

        self.scoring
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.exit
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.budget
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.pump_filter.validate().map_err(ConfigError::Invalid)?;

        let has_stocks = self.assets.iter().any(|a| a.class == AssetClass::Stock);
        if has_stocks && !dry_run && self.providers.twelve_data_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("TWELVE_DATA_API_KEY"));
        }

        Ok(())
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            scan_interval: Duration::from_secs(self.scan_interval),
            asset_delay: Duration::from_secs(self.asset_delay),
            asset_timeout: Duration::from_secs(self.asset_timeout),
        }
    }

    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            entry_threshold: self.ai_entry_threshold,
            base_take_profit_pct: self.take_profit_percent,
            max_take_profit_pct: self.max_take_profit_percent,
            curve_exponent: self.take_profit_curve_exponent,
        }
    }

    pub fn crypto_policy(&self) -> FetchPolicy {
        FetchPolicy::ServeStale {
            backoff: self.rate_limits.backoff(),
        }
    }

    pub fn stock_policy(&self) -> FetchPolicy {
        FetchPolicy::Retry {
            max_retries: self.rate_limits.max_retries,
            backoff: self.rate_limits.backoff(),
        }
    }

    pub fn crypto_limiter(&self, name: &str) -> ProviderRateLimiter {
        ProviderRateLimiter::new(
            name,
            self.rate_limits.crypto_per_minute,
            self.rate_limits.window(),
        )
    }

    pub fn stock_limiter(&self, name: &str) -> ProviderRateLimiter {
        ProviderRateLimiter::new(
            name,
            self.rate_limits.stock_per_minute,
            self.rate_limits.window(),
        )
    }
}
