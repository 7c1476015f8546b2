//! Order book infrastructure
//!
//! Price levels, the two price-ordered sides, the stop-loss stores, and the
//! per-symbol book that ties them together.

pub mod order_book;
pub mod price_level;
pub mod side;
pub mod stops;

pub use order_book::{BookStats, OrderBook, SubmitOutcome};
pub use price_level::PriceLevel;
pub use side::{BookSide, DepthLevel};
pub use stops::StopBook;
