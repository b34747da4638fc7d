use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::PairbotError;

/// Trading pair identifier of the form "BUYING-PAYING" (e.g. "BTC-USD")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId {
    /// Base currency acquired by a buy
    pub buying: String,
    /// Quote currency spent by a buy
    pub paying: String,
}

impl ProductId {
    pub fn parse(raw: &str) -> Result<Self, PairbotError> {
        raw.parse()
    }
}

impl FromStr for ProductId {
    type Err = PairbotError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split('-').collect();
        match parts.as_slice() {
            [buying, paying] if !buying.is_empty() && !paying.is_empty() => Ok(Self {
                buying: buying.to_string(),
                paying: paying.to_string(),
            }),
            _ => Err(PairbotError::Format(raw.to_string())),
        }
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.buying, self.paying)
    }
}

/// Top of book for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestBidAsk {
    pub product_id: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_product_id() {
        let product = ProductId::parse("BTC-USD").unwrap();
        assert_eq!(product.buying, "BTC");
        assert_eq!(product.paying, "USD");
        assert_eq!(product.to_string(), "BTC-USD");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for raw in ["BTCUSD", "BTC-USD-EUR", "-USD", "BTC-", ""] {
            let err = ProductId::parse(raw).unwrap_err();
            assert!(matches!(err, PairbotError::Format(ref s) if s == raw), "{raw}");
        }
    }
}
