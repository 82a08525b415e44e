use std::sync::Arc;

use anyhow::{Context, Result};
use market_data::{RssNewsClient, YahooFinanceClient};
use notification_service::{AlertTemplate, TelegramClient};
use signal_engine::SignalEngine;
use tokio::signal::unix::SignalKind;
use watch_state::{WatchState, WatchStore};

mod commands;
mod config;
mod scheduler;

use config::AgentConfig;
use scheduler::{ScanJob, ScanSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting TickerWatch scan agent");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  State file: {}", config.state_file.display());
    tracing::info!("  Scan interval: {} seconds", config.scan_interval_seconds);
    tracing::info!("  Lookback: {} days", config.lookback_days);
    tracing::info!("  Rules: {}", config.rules_summary());
    match &config.news_feed_url {
        Some(url) => tracing::info!("  News feed: {}", url),
        None => tracing::info!("  News feed: disabled"),
    }

    // 3. Persistent state
    let store = Arc::new(
        WatchStore::open(
            config.state_file.clone(),
            WatchState::with_instruments(config.default_watchlist.iter().cloned()),
        )
        .await,
    );
    let state = store.snapshot().await;
    tracing::info!(
        "Watching {} instruments: {:?}",
        state.instruments.len(),
        state.instruments().iter().map(|s| s.as_str()).collect::<Vec<_>>()
    );
    if state.destination.is_none() {
        tracing::warn!("No alert destination yet; send /start to the bot to register a chat");
    }

    // 4. Providers and dispatcher
    let telegram = Arc::new(
        TelegramClient::new(config.telegram_bot_token.clone(), config.provider_timeout())
            .context("Failed to build Telegram client")?
            .with_api_url(&config.telegram_api_url),
    );
    let market = YahooFinanceClient::new(config.provider_timeout()).context("Failed to build market data client")?;
    let news = RssNewsClient::new(config.provider_timeout()).context("Failed to build news client")?;

    let job = Arc::new(ScanJob::new(
        Arc::clone(&store),
        Arc::new(market),
        Arc::new(news),
        telegram.clone(),
        SignalEngine::new(config.signal.clone()),
        AlertTemplate::new(&config.price_currency),
        ScanSettings {
            lookback_days: config.lookback_days,
            call_timeout: config.provider_timeout(),
            concurrency: config.scan_concurrency,
            feed_url: config.news_feed_url.clone(),
        },
    ));

    let poller = tokio::spawn(commands::run_command_poller(Arc::clone(&telegram), Arc::clone(&store)));

    // 5. Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = scheduler::run_timer(job, config.scan_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    poller.abort();
    tracing::info!("Shutdown signal received, exiting gracefully...");
    Ok(())
}
