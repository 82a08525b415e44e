use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use notification_service::AlertTemplate;
use signal_engine::SignalEngine;
use tokio::time::{self, MissedTickBehavior};
use watch_core::{
    AlertDispatcher, Bar, ChatId, DispatchError, MarketDataProvider, NewsItem, NewsProvider, ProviderError,
    Symbol,
};
use watch_state::WatchStore;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub lookback_days: u32,
    /// Bound on every provider and dispatcher call.
    pub call_timeout: Duration,
    /// Instrument fetches in flight at once.
    pub concurrency: usize,
    pub feed_url: Option<String>,
}

/// Counters for one scan cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub no_destination: bool,
    pub instruments_scanned: usize,
    pub provider_failures: usize,
    pub alerts_sent: usize,
    pub news_sent: usize,
    pub news_failed: bool,
    pub dispatch_failures: usize,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn log(&self) {
        if self.no_destination {
            tracing::info!("Scan skipped: no alert destination registered yet (send /start)");
            return;
        }
        tracing::info!(
            instruments = self.instruments_scanned,
            provider_failures = self.provider_failures,
            alerts_sent = self.alerts_sent,
            news_sent = self.news_sent,
            news_failed = self.news_failed,
            dispatch_failures = self.dispatch_failures,
            elapsed_ms = self.elapsed_ms,
            "Scan cycle complete"
        );
    }
}

/// One periodic evaluation of the watch-list and the news feed.
///
/// Holds everything a cycle needs; built once at startup and shared with the timer.
/// Cycles never overlap: a cycle requested while another is running is dropped.
pub struct ScanJob {
    store: Arc<WatchStore>,
    market: Arc<dyn MarketDataProvider>,
    news: Arc<dyn NewsProvider>,
    dispatcher: Arc<dyn AlertDispatcher>,
    engine: SignalEngine,
    template: AlertTemplate,
    settings: ScanSettings,
    running: AtomicBool,
}

/// Clears the running flag even if the cycle unwinds.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScanJob {
    pub fn new(
        store: Arc<WatchStore>,
        market: Arc<dyn MarketDataProvider>,
        news: Arc<dyn NewsProvider>,
        dispatcher: Arc<dyn AlertDispatcher>,
        engine: SignalEngine,
        template: AlertTemplate,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            market,
            news,
            dispatcher,
            engine,
            template,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Run a cycle unless one is already in progress, in which case return `None`.
    pub async fn try_run_cycle(&self) -> Option<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _guard = RunningGuard(&self.running);
        Some(self.run_cycle().await)
    }

    async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let state = self.store.snapshot().await;
        let Some(chat) = state.destination else {
            report.no_destination = true;
            return report;
        };

        tracing::info!(instruments = state.instruments.len(), "Starting scan cycle...");
        self.scan_instruments(chat, &state.instruments(), &mut report).await;
        self.scan_news(chat, &mut report).await;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn scan_instruments(&self, chat: ChatId, symbols: &[Symbol], report: &mut CycleReport) {
        let results: Vec<(Symbol, Result<Vec<Bar>, ProviderError>)> = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let bars = self.fetch_bars(&symbol).await;
                (symbol, bars)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (symbol, bars) in results {
            report.instruments_scanned += 1;

            let bars = match bars {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Market data unavailable, skipping: {}", e);
                    report.provider_failures += 1;
                    continue;
                }
            };

            let Some(alert) = self.engine.evaluate(&symbol, &bars) else {
                tracing::debug!(symbol = %symbol, bars = bars.len(), "No signal");
                continue;
            };

            let text = self.template.render_alert(&alert);
            match self.deliver(chat, &text).await {
                Ok(()) => {
                    report.alerts_sent += 1;
                    tracing::info!(symbol = %symbol, reasons = alert.reasons.len(), "Sell alert sent");
                    if let Err(e) = self.store.record_alert(&symbol, chrono::Utc::now()).await {
                        tracing::error!(symbol = %symbol, "Failed to persist alert bookkeeping: {}", e);
                    }
                }
                Err(e) => {
                    report.dispatch_failures += 1;
                    tracing::warn!(symbol = %symbol, "Failed to send alert via {}: {}", self.dispatcher.name(), e);
                }
            }
        }
    }

    async fn scan_news(&self, chat: ChatId, report: &mut CycleReport) {
        let Some(feed_url) = self.settings.feed_url.as_deref() else {
            return;
        };

        let items = match self.fetch_news(feed_url).await {
            Ok(items) => items,
            Err(e) => {
                report.news_failed = true;
                tracing::warn!(feed = feed_url, "News feed unavailable: {}", e);
                return;
            }
        };

        let fresh = self.store.filter_new_news(items).await;
        if let Some(e) = fresh.persist_error {
            tracing::error!(
                "Failed to persist seen news ({} new items may be re-sent after a restart): {}",
                fresh.items.len(),
                e
            );
        }

        for item in fresh.items {
            match self.deliver(chat, &self.template.render_news(&item)).await {
                Ok(()) => report.news_sent += 1,
                Err(e) => {
                    report.dispatch_failures += 1;
                    tracing::warn!(link = %item.link, "Failed to send news item: {}", e);
                }
            }
        }
    }

    async fn fetch_bars(&self, symbol: &Symbol) -> Result<Vec<Bar>, ProviderError> {
        let timeout = self.settings.call_timeout;
        time::timeout(timeout, self.market.fetch_bars(symbol, self.settings.lookback_days))
            .await
            .unwrap_or(Err(ProviderError::Timeout(timeout)))
    }

    async fn fetch_news(&self, feed_url: &str) -> Result<Vec<NewsItem>, ProviderError> {
        let timeout = self.settings.call_timeout;
        time::timeout(timeout, self.news.fetch_news(feed_url))
            .await
            .unwrap_or(Err(ProviderError::Timeout(timeout)))
    }

    async fn deliver(&self, chat: ChatId, text: &str) -> Result<(), DispatchError> {
        let timeout = self.settings.call_timeout;
        time::timeout(timeout, self.dispatcher.send(chat, text))
            .await
            .unwrap_or(Err(DispatchError::Timeout(timeout)))
    }
}

/// Fire a cycle every `period`, starting immediately. Ticks that land while a
/// cycle is still running are dropped, not queued. Runs until the future is dropped.
pub async fn run_timer(job: Arc<ScanJob>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let job = Arc::clone(&job);
        // Each cycle runs in its own task so a panicking cycle cannot take the timer down.
        tokio::spawn(async move {
            match job.try_run_cycle().await {
                Some(report) => report.log(),
                None => tracing::warn!("Previous scan cycle still running, dropping tick"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use watch_state::WatchState;

    const CHAT: ChatId = ChatId(77);

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn bars(closes: impl Iterator<Item = f64>) -> Vec<Bar> {
        closes
            .enumerate()
            .map(|(i, close)| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    fn overbought() -> Vec<Bar> {
        bars((0..30).map(|i| 100.0 + i as f64))
    }

    fn quiet() -> Vec<Bar> {
        bars((0..30).map(|i| if i % 2 == 0 { 90.0 } else { 89.0 }))
    }

    enum Feed {
        Bars(Vec<Bar>),
        Fail,
        Hang,
    }

    struct FakeMarket {
        feeds: HashMap<String, Feed>,
        delay: Duration,
    }

    #[async_trait]
    impl MarketDataProvider for FakeMarket {
        async fn fetch_bars(&self, symbol: &Symbol, _lookback_days: u32) -> Result<Vec<Bar>, ProviderError> {
            tokio::time::sleep(self.delay).await;
            match self.feeds.get(symbol.as_str()) {
                Some(Feed::Bars(bars)) => Ok(bars.clone()),
                Some(Feed::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(vec![])
                }
                Some(Feed::Fail) | None => Err(ProviderError::Http("connection refused".into())),
            }
        }
    }

    struct FakeNews {
        items: Option<Vec<NewsItem>>,
    }

    #[async_trait]
    impl NewsProvider for FakeNews {
        async fn fetch_news(&self, _feed_url: &str) -> Result<Vec<NewsItem>, ProviderError> {
            self.items
                .clone()
                .ok_or_else(|| ProviderError::Status { status: 503, body: String::new() })
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(ChatId, String)>>,
        reject_containing: Option<String>,
    }

    impl RecordingDispatcher {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl AlertDispatcher for RecordingDispatcher {
        async fn send(&self, destination: ChatId, text: &str) -> Result<(), DispatchError> {
            if let Some(needle) = &self.reject_containing {
                if text.contains(needle.as_str()) {
                    return Err(DispatchError::Rejected("blocked".into()));
                }
            }
            self.sent.lock().unwrap().push((destination, text.to_string()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn news(id: &str) -> NewsItem {
        NewsItem::new(id, format!("Headline {id}"), format!("https://e24.no/{id}"))
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<WatchStore>,
        dispatcher: Arc<RecordingDispatcher>,
        job: Arc<ScanJob>,
    }

    async fn harness(
        destination: Option<ChatId>,
        market: FakeMarket,
        news_items: Option<Vec<NewsItem>>,
        dispatcher: RecordingDispatcher,
    ) -> Harness {
        harness_at("state.json", destination, market, news_items, dispatcher).await
    }

    /// `state_file` is relative to a fresh temp dir.
    async fn harness_at(
        state_file: &str,
        destination: Option<ChatId>,
        market: FakeMarket,
        news_items: Option<Vec<NewsItem>>,
        dispatcher: RecordingDispatcher,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut state = WatchState::with_instruments(market.feeds.keys().map(|k| sym(k)));
        state.destination = destination;
        let store = Arc::new(WatchStore::open(dir.path().join(state_file), state).await);

        let dispatcher = Arc::new(dispatcher);
        let job = Arc::new(ScanJob::new(
            Arc::clone(&store),
            Arc::new(market),
            Arc::new(FakeNews { items: news_items }),
            dispatcher.clone(),
            SignalEngine::default(),
            AlertTemplate::default(),
            ScanSettings {
                lookback_days: 60,
                call_timeout: Duration::from_millis(200),
                concurrency: 4,
                feed_url: Some("https://e24.no/rss".to_string()),
            },
        ));

        Harness {
            _dir: dir,
            store,
            dispatcher,
            job,
        }
    }

    fn market(feeds: Vec<(&str, Feed)>) -> FakeMarket {
        FakeMarket {
            feeds: feeds.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn no_destination_is_a_noop() {
        let h = harness(
            None,
            market(vec![("EQNR.OL", Feed::Bars(overbought()))]),
            Some(vec![news("a")]),
            RecordingDispatcher::default(),
        )
        .await;

        let report = h.job.try_run_cycle().await.unwrap();
        assert!(report.no_destination);
        assert!(h.dispatcher.texts().is_empty());
        assert!(h.store.snapshot().await.seen_news.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_isolated_to_its_instrument() {
        let h = harness(
            Some(CHAT),
            market(vec![("BAD.OL", Feed::Fail), ("EQNR.OL", Feed::Bars(overbought()))]),
            Some(vec![news("a")]),
            RecordingDispatcher::default(),
        )
        .await;

        let report = h.job.try_run_cycle().await.unwrap();
        assert_eq!(report.instruments_scanned, 2);
        assert_eq!(report.provider_failures, 1);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(report.news_sent, 1);

        let texts = h.dispatcher.texts();
        assert!(texts[0].contains("*SELL SIGNAL* for EQNR.OL"));
        assert!(texts[1].contains("Headline a"));
        assert!(h.dispatcher.sent.lock().unwrap().iter().all(|(chat, _)| *chat == CHAT));
    }

    #[tokio::test]
    async fn hung_provider_times_out_without_blocking_others() {
        let h = harness(
            Some(CHAT),
            market(vec![("HANG.OL", Feed::Hang), ("YAR.OL", Feed::Bars(overbought()))]),
            None,
            RecordingDispatcher::default(),
        )
        .await;

        let started = Instant::now();
        let report = h.job.try_run_cycle().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.provider_failures, 1);
        assert_eq!(report.alerts_sent, 1);
        assert!(report.news_failed);
    }

    #[tokio::test]
    async fn quiet_instrument_sends_nothing() {
        let h = harness(
            Some(CHAT),
            market(vec![("NHY.OL", Feed::Bars(quiet()))]),
            Some(vec![]),
            RecordingDispatcher::default(),
        )
        .await;

        let report = h.job.try_run_cycle().await.unwrap();
        assert_eq!(report.instruments_scanned, 1);
        assert_eq!(report.alerts_sent, 0);
        assert!(h.dispatcher.texts().is_empty());
    }

    #[tokio::test]
    async fn alerts_repeat_each_cycle_and_are_recorded() {
        let h = harness(
            Some(CHAT),
            market(vec![("EQNR.OL", Feed::Bars(overbought()))]),
            Some(vec![]),
            RecordingDispatcher::default(),
        )
        .await;

        h.job.try_run_cycle().await.unwrap();
        h.job.try_run_cycle().await.unwrap();

        assert_eq!(h.dispatcher.texts().len(), 2);
        assert!(h.store.snapshot().await.last_sent.contains_key(&sym("EQNR.OL")));
    }

    #[tokio::test]
    async fn news_is_sent_once_across_cycles() {
        let h = harness(
            Some(CHAT),
            market(vec![]),
            Some(vec![news("a"), news("b")]),
            RecordingDispatcher::default(),
        )
        .await;

        let first = h.job.try_run_cycle().await.unwrap();
        let second = h.job.try_run_cycle().await.unwrap();

        assert_eq!(first.news_sent, 2);
        assert_eq!(second.news_sent, 0);
        assert_eq!(h.dispatcher.texts().len(), 2);
    }

    #[tokio::test]
    async fn news_is_dispatched_when_seen_set_cannot_be_saved() {
        let h = harness_at(
            "no-such-dir/state.json",
            Some(CHAT),
            market(vec![]),
            Some(vec![news("a"), news("b")]),
            RecordingDispatcher::default(),
        )
        .await;

        let report = h.job.try_run_cycle().await.unwrap();
        assert_eq!(report.news_sent, 2);
        assert_eq!(report.dispatch_failures, 0);
        assert!(!h.store.path().exists());

        // The in-memory seen-set still holds, so the same feed is not re-sent in-process.
        let again = h.job.try_run_cycle().await.unwrap();
        assert_eq!(again.news_sent, 0);
        assert_eq!(h.dispatcher.texts().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_block_later_items() {
        let h = harness(
            Some(CHAT),
            market(vec![]),
            Some(vec![news("a"), news("b"), news("c")]),
            RecordingDispatcher {
                reject_containing: Some("Headline b".to_string()),
                ..Default::default()
            },
        )
        .await;

        let report = h.job.try_run_cycle().await.unwrap();
        assert_eq!(report.news_sent, 2);
        assert_eq!(report.dispatch_failures, 1);

        let texts = h.dispatcher.texts();
        assert!(texts[0].contains("Headline a"));
        assert!(texts[1].contains("Headline c"));
    }

    #[tokio::test]
    async fn overlapping_cycle_is_dropped() {
        let mut slow = market(vec![("EQNR.OL", Feed::Bars(overbought()))]);
        slow.delay = Duration::from_millis(150);
        let h = harness(Some(CHAT), slow, Some(vec![]), RecordingDispatcher::default()).await;

        let job = Arc::clone(&h.job);
        let first = tokio::spawn(async move { job.try_run_cycle().await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(h.job.try_run_cycle().await.is_none());
        assert!(first.await.unwrap().is_some());
        assert!(h.job.try_run_cycle().await.is_some());
    }
}
