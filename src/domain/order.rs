use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("invalid order side '{other}'; expected buy|sell")),
        }
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted but not yet resting on the book
    Pending,
    /// Resting on the book
    Open,
    /// Fully filled
    Filled,
    /// Cancelled by user or exchange
    Cancelled,
    /// Time in force elapsed
    Expired,
    /// Failed after acceptance
    Failed,
    /// Submission refused by the exchange
    Error,
    Unknown,
}

impl OrderStatus {
    /// Map an exchange status string; unknown values become `Unknown`
    pub fn from_exchange(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => OrderStatus::Pending,
            "OPEN" | "CANCEL_QUEUED" => OrderStatus::Open,
            "FILLED" => OrderStatus::Filled,
            "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
            "EXPIRED" => OrderStatus::Expired,
            "FAILED" => OrderStatus::Failed,
            "ERROR" => OrderStatus::Error,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Failed
                | OrderStatus::Error
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Open)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Error => "ERROR",
            OrderStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Good-till-canceled limit order request (what we want to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub client_order_id: String,
    pub product_id: String,
    pub side: OrderSide,
    pub base_size: Decimal,
    pub limit_price: Decimal,
    pub post_only: bool,
}

impl LimitOrderRequest {
    pub fn buy_limit(product_id: &str, base_size: Decimal, price: Decimal, post_only: bool) -> Self {
        Self::new(product_id, OrderSide::Buy, base_size, price, post_only)
    }

    pub fn sell_limit(product_id: &str, base_size: Decimal, price: Decimal, post_only: bool) -> Self {
        Self::new(product_id, OrderSide::Sell, base_size, price, post_only)
    }

    fn new(
        product_id: &str,
        side: OrderSide,
        base_size: Decimal,
        limit_price: Decimal,
        post_only: bool,
    ) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            side,
            base_size,
            limit_price,
            post_only,
        }
    }

    /// Notional value before fees
    pub fn value(&self) -> Decimal {
        self.base_size * self.limit_price
    }
}

/// Order as last reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub product_id: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub limit_price: Option<Decimal>,
    pub base_size: Option<Decimal>,
    pub filled_size: Decimal,
    pub average_filled_price: Option<Decimal>,
    pub total_fees: Decimal,
    pub total_value_after_fees: Decimal,
    pub outstanding_hold_amount: Decimal,
    pub reject_reason: Option<String>,
    pub reject_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Fresh order echoing a request, before any exchange state is known
    pub fn from_request(order_id: &str, request: &LimitOrderRequest, status: OrderStatus) -> Self {
        Self {
            order_id: order_id.to_string(),
            client_order_id: Some(request.client_order_id.clone()),
            product_id: request.product_id.clone(),
            side: request.side,
            status,
            limit_price: Some(request.limit_price),
            base_size: Some(request.base_size),
            filled_size: Decimal::ZERO,
            average_filled_price: None,
            total_fees: Decimal::ZERO,
            total_value_after_fees: Decimal::ZERO,
            outstanding_hold_amount: Decimal::ZERO,
            reject_reason: None,
            reject_message: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Best available explanation for a refused order
    pub fn rejection(&self) -> String {
        match (&self.reject_message, &self.reject_reason) {
            (Some(msg), _) if !msg.is_empty() => msg.clone(),
            (_, Some(reason)) if !reason.is_empty() => reason.clone(),
            _ => format!("order {} returned status {}", self.order_id, self.status),
        }
    }

    /// Fill percentage of the requested base size
    pub fn fill_pct(&self) -> Decimal {
        match self.base_size {
            Some(size) if !size.is_zero() => self.filled_size / size * Decimal::ONE_HUNDRED,
            _ => Decimal::ZERO,
        }
    }
}
