mod feed;
mod yahoo;

pub use feed::{parse_feed, RssNewsClient};
pub use yahoo::{parse_chart, YahooFinanceClient};
