use std::time::Duration;

use thiserror::Error;

/// Failure of a market data or news provider call. Skips one unit of work, never a cycle.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to deliver one message to the notification channel.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Rejected by channel: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol contains whitespace: {0:?}")]
    Whitespace(String),
}
