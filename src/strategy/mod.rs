//! Trading logic
//!
//! - `accounts` - resolve and check the two accounts behind a product
//! - `pricing` - local order preview and price rounding
//! - `executor` - single validated limit orders
//! - `fill_wait` - wait for an order to fill
//! - `buy_sell_pairs` - the buy loop and the buy-then-sell monitor loop

pub mod accounts;
pub mod buy_sell_pairs;
pub mod executor;
pub mod fill_wait;
pub mod pricing;

pub use accounts::AccountValidator;
pub use buy_sell_pairs::{
    BuyLoopReport, BuySellPairs, CycleReport, CycleResult, PairingSettings, StopReason,
};
pub use executor::{OrderExecutionService, PlacedOrder, PreparedOrder};
pub use fill_wait::{FillOutcome, FillWaiter};
pub use pricing::{
    markdown_price, markup_price, preview_order, round_price, FeeSchedule, OrderPreview, PRICE_DP,
};
