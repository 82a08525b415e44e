use async_trait::async_trait;

use crate::{Bar, ChatId, DispatchError, NewsItem, ProviderError, Symbol};

/// Source of daily bars for an instrument.
///
/// Bars come back in chronological order. Short history is a short series, not an error.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_bars(&self, symbol: &Symbol, lookback_days: u32) -> Result<Vec<Bar>, ProviderError>;
}

/// Source of news items, in feed order.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch_news(&self, feed_url: &str) -> Result<Vec<NewsItem>, ProviderError>;
}

/// Trait for notification channels.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn send(&self, destination: ChatId, text: &str) -> Result<(), DispatchError>;
    fn name(&self) -> &str;
}
