use watch_core::{Alert, AlertReason, NewsItem};

const ALERT_BANNER: &str = "📉🚨💥⚠️🔥";

/// Renders alerts and news items as Telegram Markdown.
#[derive(Debug, Clone)]
pub struct AlertTemplate {
    currency: String,
}

impl AlertTemplate {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    pub fn render_alert(&self, alert: &Alert) -> String {
        let reasons = alert
            .reasons
            .iter()
            .map(reason_text)
            .collect::<Vec<_>>()
            .join(" | ");

        format!(
            "{ALERT_BANNER}\n*SELL SIGNAL* for {symbol}\n{reasons}\nClose: {close:.2} {currency}\nTime: {ts}\n{ALERT_BANNER}",
            symbol = escape_markdown(alert.symbol.as_str()),
            close = alert.latest_close,
            currency = escape_markdown(&self.currency),
            ts = alert.timestamp.format("%Y-%m-%d %H:%M"),
        )
    }

    pub fn render_news(&self, item: &NewsItem) -> String {
        format!(
            "📰 *NEWS* 📰\n{}\n{}",
            escape_markdown(&item.title),
            escape_markdown(&item.link)
        )
    }
}

impl Default for AlertTemplate {
    fn default() -> Self {
        Self::new("NOK")
    }
}

fn reason_text(reason: &AlertReason) -> String {
    match reason {
        AlertReason::Overbought { rsi } => format!("RSI {rsi:.1} overbought"),
        AlertReason::Drawdown { drop_pct } => format!("Price down {drop_pct:.1}% from recent high"),
        AlertReason::VolumeSpike { ratio, volume } => {
            format!("Volume spike: {:.1}M ({ratio:.1}x avg)", volume / 1_000_000.0)
        }
    }
}

/// Escape the characters legacy Telegram Markdown treats as entity markers.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
