use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SymbolError;

/// Instrument ticker, trimmed and uppercased on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SymbolError::Whitespace(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Chat handle alerts are delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A triggered condition together with the value that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlertReason {
    /// RSI at or above the overbought threshold.
    Overbought { rsi: f64 },
    /// Percentage decline of the latest close from the recent high (15.0 = 15%).
    Drawdown { drop_pct: f64 },
    /// Latest volume relative to the trailing average, plus the raw volume.
    VolumeSpike { ratio: f64, volume: f64 },
}

impl AlertReason {
    pub fn label(&self) -> &'static str {
        match self {
            AlertReason::Overbought { .. } => "Overbought",
            AlertReason::Drawdown { .. } => "Drawdown",
            AlertReason::VolumeSpike { .. } => "Volume Spike",
        }
    }
}

/// Alert produced for one instrument in one scan cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: Symbol,
    /// Always ordered Overbought, Drawdown, VolumeSpike.
    pub reasons: Vec<AlertReason>,
    pub latest_close: f64,
    pub timestamp: DateTime<Utc>,
}

/// News article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Link or GUID, unique per article.
    pub id: String,
    pub title: String,
    pub link: String,
}

impl NewsItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: link.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let sym = Symbol::new("  eqnr.ol ").unwrap();
        assert_eq!(sym.as_str(), "EQNR.OL");
        assert_eq!(sym, "EQNR.OL".parse().unwrap());
    }

    #[test]
    fn symbol_rejects_blank_and_inner_whitespace() {
        assert!(matches!(Symbol::new("   "), Err(SymbolError::Empty)));
        assert!(matches!(Symbol::new("EQNR OL"), Err(SymbolError::Whitespace(_))));
    }

    #[test]
    fn symbol_deserializes_through_normalization() {
        let syms: Vec<Symbol> = serde_json::from_str(r#"["yar.ol", "AAPL"]"#).unwrap();
        assert_eq!(syms[0].as_str(), "YAR.OL");
        assert_eq!(serde_json::to_string(&syms).unwrap(), r#"["YAR.OL","AAPL"]"#);
        assert!(serde_json::from_str::<Symbol>(r#""""#).is_err());
    }

    #[test]
    fn chat_id_is_a_bare_number_on_the_wire() {
        assert_eq!(serde_json::to_string(&ChatId(-1001)).unwrap(), "-1001");
        assert_eq!(serde_json::from_str::<ChatId>("42").unwrap(), ChatId(42));
    }
}
