pub mod error;
pub mod novelty;
pub mod state;
pub mod store;

pub use error::StateError;
pub use novelty::filter_new;
pub use state::WatchState;
pub use store::{FreshNews, WatchStore};
