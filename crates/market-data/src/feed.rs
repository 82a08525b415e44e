use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use watch_core::{NewsItem, NewsProvider, ProviderError};

/// RSS or Atom feed reader.
#[derive(Clone)]
pub struct RssNewsClient {
    client: Client,
}

impl RssNewsClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl NewsProvider for RssNewsClient {
    async fn fetch_news(&self, feed_url: &str) -> Result<Vec<NewsItem>, ProviderError> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let items = parse_feed(&body)?;
        tracing::debug!(feed = feed_url, items = items.len(), "Fetched news feed");
        Ok(items)
    }
}

/// Parse an RSS or Atom document into news items, in feed order.
///
/// The id is the item link, or the GUID (Atom: entry id) when there is no
/// link. Items with neither are dropped.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<NewsItem>, ProviderError> {
    match rss::Channel::read_from(bytes) {
        Ok(channel) => Ok(channel.items().iter().filter_map(to_news_item).collect()),
        Err(rss_err) => match atom_syndication::Feed::read_from(bytes) {
            Ok(feed) => Ok(feed.entries().iter().filter_map(atom_to_news_item).collect()),
            Err(atom_err) => Err(ProviderError::Parse(format!(
                "not an RSS feed ({rss_err}) nor an Atom feed ({atom_err})"
            ))),
        },
    }
}

fn to_news_item(item: &rss::Item) -> Option<NewsItem> {
    let link = item.link().map(str::trim).filter(|s| !s.is_empty());
    let guid = item.guid().map(|g| g.value().trim()).filter(|s| !s.is_empty());
    let id = link.or(guid)?;
    let title = item.title().map(str::trim).unwrap_or_default();

    Some(NewsItem::new(id, title, link.unwrap_or(id)))
}

fn atom_to_news_item(entry: &atom_syndication::Entry) -> Option<NewsItem> {
    let link = entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())
        .map(|l| l.href().trim())
        .filter(|s| !s.is_empty());
    let entry_id = Some(entry.id().trim()).filter(|s| !s.is_empty());
    let id = link.or(entry_id)?;
    let title = entry.title().value.trim();

    Some(NewsItem::new(id, title, link.unwrap_or(id)))
}
