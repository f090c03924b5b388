use anyhow::Context;
use clap::Parser;
use signalbot::api::{
    BinanceClient, FearGreedClient, FixedSentiment, MarketDataProvider, PatternBook,
    SentimentProvider, SyntheticProvider, TwelveDataClient, UnfilteredNews,
};
use signalbot::config::Settings;
use signalbot::execution::{Collaborators, PositionManager, RateLimitedFetcher, ScanScheduler};
use signalbot::models::AssetClass;
use signalbot::notify::{spawn_dispatcher, LogSink, NotificationQueue};
use signalbot::risk::SignalBudget;
use signalbot::stats::PerformanceStats;
use signalbot::strategy::{ScoringModel, SignalGenerator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const SYNTHETIC_SEED: u64 = 42;

/// Market scanner: scores crypto and equity entries and tracks synthetic positions
#[derive(Debug, Parser)]
#[command(name = "signalbot", version, about)]
struct Cli {
    /// Path to a TOML config file (default: ./signalbot.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,

    /// Use synthetic market data; no credentials or network needed
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    settings
        .validate(cli.dry_run)
        .context("Invalid configuration")?;

    tracing::info!(
        assets = settings.assets.len(),
        scan_interval_secs = settings.scan_interval,
        entry_threshold = settings.ai_entry_threshold,
        stop_loss_pct = settings.stop_loss_percent,
        take_profit_pct = settings.take_profit_percent,
        dry_run = cli.dry_run,
        "Signalbot starting"
    );
    for asset in &settings.assets {
        tracing::info!("  {} ({})", asset.symbol, asset.class);
    }

    let stats = Arc::new(PerformanceStats::new());
    let (notifications, notification_rx) =
        NotificationQueue::channel(settings.notification_queue_capacity);
    let dispatcher = spawn_dispatcher(notification_rx, Arc::new(LogSink));

    let scheduler = Arc::new(build_scheduler(
        &settings,
        cli.dry_run,
        notifications,
        stats.clone(),
    )?);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    if cli.once {
        scheduler.run_cycle(&mut shutdown_rx).await;
    } else {
        let mut scan_task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        tracing::info!("Press Ctrl+C to stop...");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, finishing in-flight asset...");
                shutdown_tx.send(true).ok();
                if let Err(e) = scan_task.await {
                    tracing::error!("Scan loop failed during shutdown: {}", e);
                }
            }
            result = &mut scan_task => {
                tracing::error!("Scan loop exited: {:?}", result);
            }
        }
    }

    // Dropping the scheduler closes the notification queue
    drop(scheduler);
    if let Err(e) = dispatcher.await {
        tracing::warn!("Notification dispatcher failed: {}", e);
    }

    stats.summary().log();
    tracing::info!("Signalbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("signalbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_scheduler(
    settings: &Settings,
    dry_run: bool,
    notifications: NotificationQueue,
    stats: Arc<PerformanceStats>,
) -> anyhow::Result<ScanScheduler> {
    let sentiment: Arc<dyn SentimentProvider> = if dry_run {
        Arc::new(FixedSentiment(50))
    } else {
        Arc::new(FearGreedClient::with_base_url(
            &settings.providers.fear_greed_base_url,
        )?)
    };

    let collaborators = Collaborators {
        sentiment,
        news: Arc::new(UnfilteredNews),
        knowledge: Arc::new(PatternBook::new(settings.patterns.clone())),
        notifications,
        stats,
    };

    let positions = PositionManager::new(settings.stop_loss_percent, settings.exit.clone());

    let mut scheduler = ScanScheduler::new(
        settings.assets.clone(),
        settings.scan_settings(),
        collaborators,
        positions,
    )
    .with_scoring(ScoringModel::new(settings.scoring.clone())?)
    .with_signals(SignalGenerator::new(settings.signal_config()))
    .with_budget(SignalBudget::new(settings.budget.clone()))
    .with_pump_filter(settings.pump_filter.clone());

    let has_class = |class: AssetClass| settings.assets.iter().any(|a| a.class == class);

    if has_class(AssetClass::Crypto) {
        let provider: Arc<dyn MarketDataProvider> = if dry_run {
            Arc::new(SyntheticProvider::new(SYNTHETIC_SEED))
        } else {
            Arc::new(BinanceClient::with_base_url(
                &settings.providers.binance_base_url,
            )?)
        };
        let limiter = settings.crypto_limiter(provider.name());
        scheduler = scheduler.with_fetcher(
            AssetClass::Crypto,
            RateLimitedFetcher::new(
                provider,
                limiter,
                settings.crypto_policy(),
                &settings.interval,
                settings.lookback,
            ),
        );
    }

    if has_class(AssetClass::Stock) {
        let provider: Arc<dyn MarketDataProvider> = if dry_run {
            Arc::new(SyntheticProvider::new(SYNTHETIC_SEED + 1))
        } else {
            Arc::new(TwelveDataClient::with_base_url(
                settings.providers.twelve_data_api_key.clone(),
                &settings.providers.twelve_data_base_url,
            )?)
        };
        let limiter = settings.stock_limiter(provider.name());
        scheduler = scheduler.with_fetcher(
            AssetClass::Stock,
            RateLimitedFetcher::new(
                provider,
                limiter,
                settings.stock_policy(),
                &settings.interval,
                settings.lookback,
            ),
        );
    }

    Ok(scheduler)
}
