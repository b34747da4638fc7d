use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::domain::{Account, BestBidAsk, LimitOrderRequest, Order};
use crate::error::{PairbotError, Result};

/// Streaming channel to subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    User,
    Heartbeats,
    Ticker,
    Level2,
}

impl Default for ChannelType {
    fn default() -> Self {
        Self::User
    }
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Heartbeats => "heartbeats",
            Self::Ticker => "ticker",
            Self::Level2 => "level2",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = PairbotError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "heartbeats" => Ok(Self::Heartbeats),
            "ticker" => Ok(Self::Ticker),
            "level2" | "l2" => Ok(Self::Level2),
            _ => Err(PairbotError::Validation(format!(
                "invalid channel '{raw}'; expected user|heartbeats|ticker|level2"
            ))),
        }
    }
}

/// Everything the trading core needs from an exchange.
///
/// Implementations return fresh exchange state on every call; callers never
/// cache accounts or orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn is_dry_run(&self) -> bool;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn get_best_bid_ask(&self, product_ids: &[String]) -> Result<Vec<BestBidAsk>>;

    /// Lowest limit price among open or filled buy orders for the product
    async fn get_lowest_open_or_filled_buy_price(&self, product_id: &str)
        -> Result<Option<Decimal>>;

    /// Submit a good-till-canceled limit order.
    ///
    /// A refusal by the exchange is not an `Err`: it comes back as an order
    /// with status `ERROR` and a reject message.
    async fn create_limit_order(&self, request: &LimitOrderRequest) -> Result<Order>;

    async fn get_order(&self, order_id: &str) -> Result<Order>;

    /// Returns the ids that were actually cancelled
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>>;

    /// Raw order-event messages for the products on the given channel
    async fn subscribe_order_events(
        &self,
        product_ids: &[String],
        channel: ChannelType,
    ) -> Result<mpsc::Receiver<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_accepts_aliases() {
        assert_eq!(ChannelType::from_str("user").unwrap(), ChannelType::User);
        assert_eq!(ChannelType::from_str("L2").unwrap(), ChannelType::Level2);
        assert_eq!(ChannelType::default().to_string(), "user");
    }

    #[test]
    fn parse_channel_rejects_unknown_value() {
        assert!(ChannelType::from_str("candles-ish").is_err());
    }
}
