use watch_core::NewsItem;

use crate::WatchState;

/// Keep the items whose id has never been seen, in input order, and mark each
/// kept id as seen. A repeated id within one batch is kept only once.
pub fn filter_new(items: Vec<NewsItem>, state: &mut WatchState) -> Vec<NewsItem> {
    items
        .into_iter()
        .filter(|item| state.mark_news_seen(&item.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> NewsItem {
        NewsItem::new(id, format!("title {id}"), id)
    }

    #[test]
    fn only_unseen_items_pass_and_are_recorded() {
        let mut state = WatchState::default();
        state.mark_news_seen("a");
        state.mark_news_seen("c");

        let fresh = filter_new(vec![item("a"), item("b"), item("c")], &mut state);
        assert_eq!(fresh, vec![item("b")]);
        assert_eq!(state.seen_news.len(), 3);

        let again = filter_new(vec![item("a"), item("b"), item("c")], &mut state);
        assert!(again.is_empty());
        assert_eq!(state.seen_news.len(), 3);
    }

    #[test]
    fn keeps_feed_order_and_drops_in_batch_repeats() {
        let mut state = WatchState::default();
        let fresh = filter_new(vec![item("z"), item("a"), item("z"), item("m")], &mut state);
        let ids: Vec<&str> = fresh.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }
}
