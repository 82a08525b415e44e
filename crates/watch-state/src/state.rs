use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use watch_core::{ChatId, Symbol};

/// Everything the agent persists between runs.
///
/// Field names on disk are `tickers`, `chat_id`, `last_sent` and `last_news`.
/// Missing fields default so partial files still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchState {
    #[serde(rename = "tickers", default, deserialize_with = "lenient_symbols")]
    pub instruments: BTreeSet<Symbol>,

    #[serde(rename = "chat_id", default)]
    pub destination: Option<ChatId>,

    /// Time of the last dispatched alert per instrument. Bookkeeping only.
    #[serde(default, deserialize_with = "lenient_last_sent")]
    pub last_sent: BTreeMap<Symbol, DateTime<Utc>>,

    /// Append-only.
    #[serde(rename = "last_news", default)]
    pub seen_news: BTreeSet<String>,
}

impl WatchState {
    pub fn with_instruments(instruments: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            instruments: instruments.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns false if already tracked.
    pub fn add_instrument(&mut self, symbol: Symbol) -> bool {
        self.instruments.insert(symbol)
    }

    /// Returns false if not tracked.
    pub fn remove_instrument(&mut self, symbol: &Symbol) -> bool {
        self.last_sent.remove(symbol);
        self.instruments.remove(symbol)
    }

    /// Tracked instruments in sorted order.
    pub fn instruments(&self) -> Vec<Symbol> {
        self.instruments.iter().cloned().collect()
    }

    /// Returns false if `chat` was already the destination.
    pub fn set_destination(&mut self, chat: ChatId) -> bool {
        self.destination.replace(chat) != Some(chat)
    }

    pub fn has_seen(&self, news_id: &str) -> bool {
        self.seen_news.contains(news_id)
    }

    /// Returns true if the id was not seen before.
    pub fn mark_news_seen(&mut self, news_id: &str) -> bool {
        if self.seen_news.contains(news_id) {
            return false;
        }
        self.seen_news.insert(news_id.to_string())
    }

    /// Returns false (and records nothing) for untracked instruments.
    pub fn record_alert(&mut self, symbol: &Symbol, at: DateTime<Utc>) -> bool {
        if !self.instruments.contains(symbol) {
            return false;
        }
        self.last_sent.insert(symbol.clone(), at);
        true
    }
}

/// Invalid tickers (hand edits, blanks) are dropped with a warning so one bad
/// entry does not discard the rest of the file.
fn lenient_symbols<'de, D>(deserializer: D) -> Result<BTreeSet<Symbol>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw.iter().map(String::as_str).filter_map(valid_symbol).collect())
}

fn lenient_last_sent<'de, D>(deserializer: D) -> Result<BTreeMap<Symbol, DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, DateTime<Utc>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(s, at)| valid_symbol(&s).map(|symbol| (symbol, at)))
        .collect())
}

fn valid_symbol(raw: &str) -> Option<Symbol> {
    match Symbol::new(raw) {
        Ok(symbol) => Some(symbol),
        Err(e) => {
            tracing::warn!(ticker = raw, "Skipping invalid ticker in state file: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn instruments_have_no_duplicates() {
        let mut state = WatchState::default();
        assert!(state.add_instrument(sym("eqnr.ol")));
        assert!(!state.add_instrument(sym("EQNR.OL")));
        assert!(state.add_instrument(sym("AAPL")));
        assert_eq!(state.instruments(), vec![sym("AAPL"), sym("EQNR.OL")]);
    }

    #[test]
    fn remove_clears_bookkeeping() {
        let mut state = WatchState::with_instruments([sym("YAR.OL")]);
        assert!(state.record_alert(&sym("YAR.OL"), Utc::now()));
        assert!(state.remove_instrument(&sym("YAR.OL")));
        assert!(state.last_sent.is_empty());
        assert!(!state.remove_instrument(&sym("YAR.OL")));
        assert!(!state.record_alert(&sym("YAR.OL"), Utc::now()));
    }

    #[test]
    fn destination_change_is_reported() {
        let mut state = WatchState::default();
        assert!(state.set_destination(ChatId(7)));
        assert!(!state.set_destination(ChatId(7)));
        assert!(state.set_destination(ChatId(8)));
        assert_eq!(state.destination, Some(ChatId(8)));
    }

    #[test]
    fn loads_file_written_by_earlier_versions() {
        let json = r#"{
            "tickers": ["eqnr.ol", "YAR.OL", "YAR.OL"],
            "chat_id": 123456,
            "last_sent": {},
            "last_news": ["https://e24.no/a", "https://e24.no/b"]
        }"#;
        let state: WatchState = serde_json::from_str(json).unwrap();

        assert_eq!(state.instruments(), vec![sym("EQNR.OL"), sym("YAR.OL")]);
        assert_eq!(state.destination, Some(ChatId(123456)));
        assert!(state.has_seen("https://e24.no/b"));

        let partial: WatchState = serde_json::from_str(r#"{"tickers": ["AAPL"]}"#).unwrap();
        assert_eq!(partial.destination, None);
        assert!(partial.seen_news.is_empty());
    }

    #[test]
    fn invalid_tickers_are_skipped_not_fatal() {
        let json = r#"{
            "tickers": ["", "A B", "eqnr.ol"],
            "chat_id": 42,
            "last_sent": {"A B": "2024-03-01T12:00:00Z", "EQNR.OL": "2024-03-01T12:00:00Z"},
            "last_news": ["https://e24.no/a"]
        }"#;
        let state: WatchState = serde_json::from_str(json).unwrap();

        assert_eq!(state.instruments(), vec![sym("EQNR.OL")]);
        assert_eq!(state.destination, Some(ChatId(42)));
        assert_eq!(state.last_sent.len(), 1);
        assert!(state.has_seen("https://e24.no/a"));
    }
}
