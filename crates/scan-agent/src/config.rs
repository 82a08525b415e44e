use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use signal_engine::SignalConfig;
use watch_core::Symbol;

#[derive(Clone)]
pub struct AgentConfig {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: String,

    // State
    pub state_file: PathBuf,
    pub default_watchlist: Vec<Symbol>,

    // Scheduling
    pub scan_interval_seconds: u64,    // 900 (15 minutes)
    pub lookback_days: u32,            // 60
    pub provider_timeout_seconds: u64, // per provider / dispatcher call
    pub scan_concurrency: usize,       // parallel instrument fetches

    // News
    pub news_feed_url: Option<String>,

    // Signals
    pub signal: SignalConfig,
    pub price_currency: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let signal_defaults = SignalConfig::default();

        let config = Self {
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN")
                .filter(|s| !s.trim().is_empty())
                .context("TELEGRAM_BOT_TOKEN not set")?,
            telegram_api_url: text("TELEGRAM_API_URL", "https://api.telegram.org"),

            state_file: PathBuf::from(text("STATE_FILE", "bot_state.json")),
            default_watchlist: text("DEFAULT_WATCHLIST", "EQNR.OL,YAR.OL")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Symbol::new)
                .collect::<Result<Vec<_>, _>>()
                .context("DEFAULT_WATCHLIST contains an invalid symbol")?,

            scan_interval_seconds: number(&get, "SCAN_INTERVAL", 900)?,
            lookback_days: number(&get, "LOOKBACK_DAYS", 60)?,
            provider_timeout_seconds: number(&get, "PROVIDER_TIMEOUT", 20)?,
            scan_concurrency: number(&get, "SCAN_CONCURRENCY", 4)?,

            news_feed_url: Some(text("NEWS_FEED_URL", "https://e24.no/rss/boers-og-finans"))
                .filter(|s| !s.trim().is_empty()),

            signal: SignalConfig {
                rsi_period: number(&get, "RSI_PERIOD", signal_defaults.rsi_period)?,
                rsi_overbought: number(&get, "RSI_OVERBOUGHT", signal_defaults.rsi_overbought)?,
                drawdown_threshold: number(&get, "DRAWDOWN_THRESHOLD", signal_defaults.drawdown_threshold)?,
                volume_spike_factor: number(&get, "VOLUME_SPIKE_FACTOR", signal_defaults.volume_spike_factor)?,
                ..signal_defaults
            },
            price_currency: text("PRICE_CURRENCY", "NOK"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_seconds == 0 {
            bail!("SCAN_INTERVAL must be positive");
        }
        if self.provider_timeout_seconds == 0 {
            bail!("PROVIDER_TIMEOUT must be positive");
        }
        if self.scan_concurrency == 0 {
            bail!("SCAN_CONCURRENCY must be at least 1");
        }
        if self.signal.rsi_period == 0 {
            bail!("RSI_PERIOD must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.signal.rsi_overbought) {
            bail!("RSI_OVERBOUGHT must be within 0..=100");
        }
        if !(self.signal.drawdown_threshold > 0.0 && self.signal.drawdown_threshold < 1.0) {
            bail!("DRAWDOWN_THRESHOLD must be a fraction between 0 and 1");
        }
        if self.signal.volume_spike_factor <= 0.0 {
            bail!("VOLUME_SPIKE_FACTOR must be positive");
        }
        if self.expected_bars() < self.signal.min_bars() {
            bail!(
                "LOOKBACK_DAYS ({}) yields about {} trading days, fewer than the {} bars needed for a signal",
                self.lookback_days,
                self.expected_bars(),
                self.signal.min_bars()
            );
        }
        Ok(())
    }

    /// Daily bars a lookback of `lookback_days` calendar days yields, counting five trading days a week.
    pub fn expected_bars(&self) -> usize {
        self.lookback_days as usize * 5 / 7
    }

    /// Human-readable alert rules for the startup log.
    pub fn rules_summary(&self) -> String {
        format!(
            "RSI({}) >= {}, drawdown >= {:.0}%, volume >= {}x avg",
            self.signal.rsi_period,
            self.signal.rsi_overbought,
            self.signal.drawdown_threshold * 100.0,
            self.signal.volume_spike_factor
        )
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }
}

fn number<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
