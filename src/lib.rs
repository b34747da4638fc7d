pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod services;
pub mod signing;
pub mod strategy;

pub use adapters::CoinbaseClient;
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, RetryPolicy, ShutdownSignal, ShutdownToken};
pub use error::{PairbotError, Result};
pub use exchange::{ChannelType, ExchangeGateway};
pub use services::{OrderUpdate, OrderUpdateListener};
pub use strategy::{BuySellPairs, FillWaiter, OrderExecutionService};
