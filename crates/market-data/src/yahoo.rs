use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use watch_core::{Bar, MarketDataProvider, ProviderError, Symbol};

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Daily bars from the Yahoo Finance chart endpoint.
#[derive(Clone)]
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooFinanceClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: CHART_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MarketDataProvider for YahooFinanceClient {
    async fn fetch_bars(&self, symbol: &Symbol, lookback_days: u32) -> Result<Vec<Bar>, ProviderError> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(i64::from(lookback_days));
        let url = format!("{}/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", from.timestamp().to_string()),
                ("period2", to.timestamp().to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ProviderError::UnknownSymbol(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let bars = parse_chart(&json)?;
        tracing::debug!(symbol = %symbol, bars = bars.len(), "Fetched chart");
        Ok(bars)
    }
}

/// Convert a chart response into chronologically ordered bars.
///
/// Bars with any missing field are skipped. A result with no timestamps is an
/// empty series, not an error.
pub fn parse_chart(json: &serde_json::Value) -> Result<Vec<Bar>, ProviderError> {
    let response = ChartResponse::deserialize(json).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(err) = response.chart.error {
        return Err(if err.code == "Not Found" {
            ProviderError::UnknownSymbol(err.description)
        } else {
            ProviderError::Parse(format!("{}: {}", err.code, err.description))
        });
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| ProviderError::Parse("No chart data found".to_string()))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let field = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten().filter(|v| v.is_finite());

    let mut bars: Vec<Bar> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            Some(Bar {
                timestamp: DateTime::from_timestamp(ts, 0)?,
                open: field(&quote.open, i)?,
                high: field(&quote.high, i)?,
                low: field(&quote.low, i)?,
                close: field(&quote.close, i)?,
                volume: field(&quote.volume, i)?,
            })
        })
        .collect();

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}
