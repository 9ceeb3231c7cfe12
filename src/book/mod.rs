pub mod ladder;
pub mod store;

pub use ladder::{floor_qty, walk_asks, LevelUpdate, OrderBook, WalkOutcome};
pub use store::{BookError, OrderBookStore};
