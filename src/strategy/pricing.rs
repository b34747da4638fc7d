//! Local order preview: cost, fee and validity of a prospective limit order.
//!
//! Fees come from a fixed maker/taker table, not the exchange's live fee
//! tier, so the preview is an estimate of what the exchange will hold.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::domain::OrderSide;

/// Decimal places every price and fee is rounded to
pub const PRICE_DP: u32 = 6;

/// Fee rates applied by `preview_order`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: dec!(0.006),
            taker_rate: dec!(0.012),
        }
    }
}

impl FeeSchedule {
    pub fn rate(&self, post_only: bool) -> Decimal {
        if post_only {
            self.maker_rate
        } else {
            self.taker_rate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPreview {
    pub product_id: String,
    pub side: OrderSide,
    pub base_size: Decimal,
    pub limit_price: Decimal,
    pub total_price: Decimal,
    pub fee: Decimal,
    pub total_price_with_fee: Decimal,
    pub is_valid: bool,
    pub message: Option<String>,
}

/// Round to 6 places using banker's rounding
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp(PRICE_DP)
}

/// `reference` lowered by `pct` percent
pub fn markdown_price(reference: Decimal, pct: Decimal) -> Decimal {
    round_price(reference * (Decimal::ONE - pct / Decimal::ONE_HUNDRED))
}

/// `basis` raised by `pct` percent
pub fn markup_price(basis: Decimal, pct: Decimal) -> Decimal {
    round_price(basis * (Decimal::ONE + pct / Decimal::ONE_HUNDRED))
}

pub fn preview_order(
    product_id: &str,
    side: OrderSide,
    base_size: Decimal,
    limit_price: Decimal,
    post_only: bool,
    fees: &FeeSchedule,
) -> OrderPreview {
    let total_price = base_size * limit_price;
    let fee = round_price(total_price * fees.rate(post_only));
    let is_valid = total_price > Decimal::ZERO;

    OrderPreview {
        product_id: product_id.to_string(),
        side,
        base_size,
        limit_price,
        total_price,
        fee,
        total_price_with_fee: total_price + fee,
        is_valid,
        message: (!is_valid).then(|| {
            format!("Total price {total_price} must be greater than zero")
        }),
    }
}
