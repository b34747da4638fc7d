use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange wallet for a single currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub uuid: String,
    pub currency: String,
    pub available_balance: Decimal,
    pub hold: Decimal,
}

impl Account {
    pub fn new(currency: &str, available_balance: Decimal, hold: Decimal) -> Self {
        Self {
            uuid: String::new(),
            currency: currency.to_string(),
            available_balance,
            hold,
        }
    }

    pub fn has_funds(&self) -> bool {
        self.available_balance > Decimal::ZERO
    }
}

/// The two accounts a product trades between, resolved and checked
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAccounts {
    pub buying: Account,
    pub paying: Account,
}

impl ValidatedAccounts {
    pub fn paying_balance(&self) -> Decimal {
        self.paying.available_balance
    }

    pub fn buying_balance(&self) -> Decimal {
        self.buying.available_balance
    }
}
