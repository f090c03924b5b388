use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Duration, Instant, MissedTickBehavior};

use super::position_manager::{ExitContext, PositionError, PositionManager};
use super::price_feed::RateLimitedFetcher;
use crate::api::{KnowledgeBase, NewsValidator, ProviderError, SentimentProvider};
use crate::indicators::{calculate_volume_ratio, IndicatorEngine, VOLUME_AVERAGE_PERIOD};
use crate::models::{Asset, AssetClass, PriceSeries, Signal};
use crate::notify::{NotificationEvent, NotificationQueue};
use crate::risk::{PumpFilter, SignalBudget};
use crate::stats::StatsSink;
use crate::strategy::{ScoringError, ScoringModel, SignalGenerator};

/// Used when the sentiment provider is unavailable
pub const NEUTRAL_FEAR_GREED: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSettings {
    pub scan_interval: Duration,
    pub asset_delay: Duration,
    pub asset_timeout: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(900),
            asset_delay: Duration::from_secs(2),
            asset_timeout: Duration::from_secs(300),
        }
    }
}

/// Per-asset failure, caught at the scheduler boundary
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("position update failed: {0}")]
    Position(#[from] PositionError),

    #[error("no market data provider configured for {0} assets")]
    NoProvider(AssetClass),

    #[error("asset evaluation timed out after {0:?}")]
    Timeout(Duration),
}

impl ScanError {
    pub fn stage(&self) -> &'static str {
        match self {
            ScanError::Fetch(_) | ScanError::NoProvider(_) => "fetch",
            ScanError::Scoring(_) => "scoring",
            ScanError::Position(_) => "position",
            ScanError::Timeout(_) => "timeout",
        }
    }

    /// Failures that retrying later in the same cycle could not fix
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ScanError::Fetch(ProviderError::Permanent(_)) | ScanError::NoProvider(_)
        )
    }
}

/// Result of evaluating one asset
#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutcome {
    Scanned {
        score: f64,
        stale: bool,
        signal: Option<Signal>,
    },
    /// History too short for indicators; only price and time exits ran
    WarmingUp {
        stale: bool,
        available: usize,
        required: usize,
    },
}

impl AssetOutcome {
    pub fn is_stale(&self) -> bool {
        match self {
            AssetOutcome::Scanned { stale, .. } | AssetOutcome::WarmingUp { stale, .. } => *stale,
        }
    }
}

/// Counts for one pass over the asset list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub assets: usize,
    pub fetched: usize,
    pub stale: usize,
    pub skipped: usize,
    pub failed: usize,
    pub signals: usize,
    pub closed: usize,
    pub duration: Duration,
}

impl ScanReport {
    fn record(&mut self, outcome: &AssetOutcome) {
        if outcome.is_stale() {
            self.stale += 1;
        } else {
            self.fetched += 1;
        }

        match outcome {
            AssetOutcome::Scanned {
                signal: Some(_), ..
            } => self.signals += 1,
            AssetOutcome::WarmingUp { .. } => self.skipped += 1,
            AssetOutcome::Scanned { .. } => {}
        }
    }

    fn log(&self) {
        tracing::info!(
            assets = self.assets,
            fetched = self.fetched,
            stale = self.stale,
            skipped = self.skipped,
            failed = self.failed,
            signals = self.signals,
            closed = self.closed,
            duration_ms = self.duration.as_millis() as u64,
            "Scan cycle complete"
        );
    }
}

/// External collaborators the scan pipeline talks to
pub struct Collaborators {
    pub sentiment: Arc<dyn SentimentProvider>,
    pub news: Arc<dyn NewsValidator>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub notifications: NotificationQueue,
    pub stats: Arc<dyn StatsSink>,
}

/// Drives fetch -> indicators -> score -> signal / position update for
/// every configured asset, once per scan interval
pub struct ScanScheduler {
    assets: Vec<Asset>,
    settings: ScanSettings,
    fetchers: HashMap<AssetClass, RateLimitedFetcher>,
    collaborators: Collaborators,
    engine: IndicatorEngine,
    scoring: ScoringModel,
    signals: SignalGenerator,
    positions: Arc<Mutex<PositionManager>>,
    budget: Mutex<SignalBudget>,
    pump_filter: PumpFilter,
}

impl ScanScheduler {
    pub fn new(
        assets: Vec<Asset>,
        settings: ScanSettings,
        collaborators: Collaborators,
        positions: PositionManager,
    ) -> Self {
        Self {
            assets,
            settings,
            fetchers: HashMap::new(),
            collaborators,
            engine: IndicatorEngine::new(),
            scoring: ScoringModel::default(),
            signals: SignalGenerator::default(),
            positions: Arc::new(Mutex::new(positions)),
            budget: Mutex::new(SignalBudget::default()),
            pump_filter: PumpFilter::default(),
        }
    }

    pub fn with_fetcher(mut self, class: AssetClass, fetcher: RateLimitedFetcher) -> Self {
        self.fetchers.insert(class, fetcher);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringModel) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_signals(mut self, signals: SignalGenerator) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_budget(mut self, budget: SignalBudget) -> Self {
        self.budget = Mutex::new(budget);
        self
    }

    pub fn with_pump_filter(mut self, pump_filter: PumpFilter) -> Self {
        self.pump_filter = pump_filter;
        self
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Shared handle to the position book
    pub fn positions(&self) -> Arc<Mutex<PositionManager>> {
        self.positions.clone()
    }

    fn lock_positions(&self) -> MutexGuard<'_, PositionManager> {
        self.positions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a cycle every scan interval until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            assets = self.assets.len(),
            interval_secs = self.settings.scan_interval.as_secs(),
            "Scan loop starting"
        );

        let mut ticker = interval_at(Instant::now(), self.settings.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            if *shutdown.borrow() {
                break;
            }

            self.run_cycle(&mut shutdown).await;
        }

        tracing::info!("Scan loop stopped");
    }

    /// One pass over every asset; a failing asset never aborts the rest
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> ScanReport {
        let started = Instant::now();
        let mut report = ScanReport::default();

        tracing::info!("Scan tick at {}", Utc::now().format("%H:%M:%S"));

        let fear_greed = self.fear_greed().await;
        let closed_before = self.lock_positions().closed_positions().len();

        for (i, asset) in self.assets.iter().enumerate() {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, ending cycle early");
                break;
            }

            if i > 0 && !self.settings.asset_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.settings.asset_delay) => {}
                    _ = shutdown_requested(shutdown) => {
                        tracing::info!("Shutdown requested, ending cycle early");
                        break;
                    }
                }
            }

            report.assets += 1;

            let result = match timeout(
                self.settings.asset_timeout,
                self.process_asset(asset, fear_greed),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ScanError::Timeout(self.settings.asset_timeout)),
            };

            match result {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    if e.is_skip() {
                        report.skipped += 1;
                    } else {
                        report.failed += 1;
                    }
                    self.report_failure(asset, &e);
                }
            }
        }

        report.closed = self.lock_positions().closed_positions().len() - closed_before;
        report.duration = started.elapsed();
        report.log();

        report
    }

    /// Evaluate a single asset: fetch, compute indicators, update any open
    /// position, then consider a new entry
    pub async fn process_asset(
        &self,
        asset: &Asset,
        fear_greed: u8,
    ) -> Result<AssetOutcome, ScanError> {
        let fetcher = self
            .fetchers
            .get(&asset.class)
            .ok_or(ScanError::NoProvider(asset.class))?;

        let series = fetcher.fetch(asset).await?;
        let price = series.last_close().ok_or_else(|| {
            ProviderError::Permanent(format!("empty series for {}", asset.symbol))
        })?;
        let now = Utc::now();

        let indicators = match self.engine.compute(&series) {
            Ok(indicators) => indicators,
            Err(needed) => {
                tracing::info!(
                    asset = %asset.symbol,
                    available = needed.available,
                    required = needed.required,
                    "Collecting data, not enough history for {}",
                    needed.indicator
                );
                self.update_position(asset, &ExitContext::price_only(price, now));
                return Ok(AssetOutcome::WarmingUp {
                    stale: series.stale,
                    available: needed.available,
                    required: needed.required,
                });
            }
        };

        let kb_adjustment = self
            .collaborators
            .knowledge
            .pattern_adjustment(asset, &indicators)
            .await;
        let scored = self
            .scoring
            .score(&indicators, fear_greed, kb_adjustment, false);

        let had_position = self.update_position(
            asset,
            &ExitContext {
                price,
                now,
                rsi: Some(indicators.rsi),
                score: scored.as_ref().ok().map(|s| s.value),
                kb_adjustment: Some(kb_adjustment),
            },
        );
        let provisional = scored?;

        // Only candidates that could actually enter go to the news feed
        let entry_threshold = self.signals.config().entry_threshold;
        let news_validated = if !had_position && provisional.value >= entry_threshold {
            let candidate = self.signals.candidate(asset, &provisional);
            self.collaborators.news.is_validated(asset, &candidate).await
        } else {
            false
        };
        let score = provisional.gated(news_validated);

        tracing::info!(
            asset = %asset.symbol,
            price,
            rsi = %format!("{:.1}", indicators.rsi),
            ema200 = %format!("{:.4}", indicators.ema200),
            fear_greed,
            kb_adjustment,
            score = %format!("{:.1}", score.value),
            stale = series.stale,
            "Asset scored"
        );

        let signal = match self
            .signals
            .evaluate(asset, &score, news_validated, had_position)
        {
            Some(_) if self.is_pump(asset, indicators.rsi, &series) => None,
            Some(signal) => self.open_position(asset, signal, price, series.stale)?,
            None => None,
        };

        Ok(AssetOutcome::Scanned {
            score: score.value,
            stale: series.stale,
            signal,
        })
    }

    /// Apply this tick's observation to the asset's open position, if any.
    /// Returns whether a position was open before the update.
    fn update_position(&self, asset: &Asset, ctx: &ExitContext) -> bool {
        let closed = {
            let mut pm = self.lock_positions();
            if !pm.has_open_position(&asset.symbol) {
                return false;
            }
            pm.evaluate(&asset.symbol, ctx)
        };

        if let Some(closed) = closed {
            self.collaborators.stats.record(&closed);
            self.collaborators
                .notifications
                .publish(NotificationEvent::PositionClosed(closed));
        }

        true
    }

    fn is_pump(&self, asset: &Asset, rsi: f64, series: &PriceSeries) -> bool {
        let volume_ratio = calculate_volume_ratio(&series.volumes(), VOLUME_AVERAGE_PERIOD);
        let pump = self.pump_filter.rejects(rsi, volume_ratio);
        if pump {
            tracing::info!(
                asset = %asset.symbol,
                rsi = %format!("{:.1}", rsi),
                volume_ratio = %format!("{:.1}", volume_ratio.unwrap_or_default()),
                "Pump detected, skipping entry"
            );
        }
        pump
    }

    fn open_position(
        &self,
        asset: &Asset,
        signal: Signal,
        price: f64,
        stale: bool,
    ) -> Result<Option<Signal>, ScanError> {
        if stale {
            tracing::info!(asset = %asset.symbol, "Not entering on stale data");
            return Ok(None);
        }

        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(trip) = budget.check(&asset.symbol) {
            tracing::info!(asset = %asset.symbol, ?trip, "Signal budget exhausted, skipping entry");
            return Ok(None);
        }

        self.lock_positions().open(&signal, price)?;
        budget.record(&asset.symbol);

        self.collaborators
            .notifications
            .publish(NotificationEvent::SignalOpened {
                signal: signal.clone(),
                entry_price: price,
            });

        Ok(Some(signal))
    }

    async fn fear_greed(&self) -> u8 {
        match self.collaborators.sentiment.current_fear_greed_index().await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = NEUTRAL_FEAR_GREED,
                    "Fear & Greed unavailable, using neutral value"
                );
                NEUTRAL_FEAR_GREED
            }
        }
    }

    fn report_failure(&self, asset: &Asset, error: &ScanError) {
        tracing::warn!(
            asset = %asset.symbol,
            stage = error.stage(),
            error = %error,
            "Asset evaluation failed"
        );

        self.collaborators
            .notifications
            .publish(NotificationEvent::ErrorOccurred {
                asset: asset.symbol.clone(),
                stage: error.stage().to_string(),
                message: error.to_string(),
            });
    }
}

/// Resolves once shutdown is set; never resolves if the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let stopped = rx.wait_for(|stop| *stop).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}
