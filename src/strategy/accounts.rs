use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordination::ShutdownToken;
use crate::domain::{Account, OrderSide, ProductId, ValidatedAccounts};
use crate::error::{PairbotError, Result};
use crate::exchange::ExchangeGateway;

/// Resolves a product's two currencies to funded exchange accounts
pub struct AccountValidator {
    gateway: Arc<dyn ExchangeGateway>,
}

impl AccountValidator {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Check that both accounts exist and the side's funding account holds a
    /// positive balance: the paying currency for a buy, the buying currency
    /// for a sell.
    pub async fn validate(
        &self,
        product_id: &str,
        side: OrderSide,
        shutdown: &ShutdownToken,
    ) -> Result<ValidatedAccounts> {
        let product = ProductId::parse(product_id)?;

        let accounts = shutdown.run(self.gateway.list_accounts()).await?;
        let accounts = resolve_accounts(&product, &accounts)?;

        let (funding, action) = match side {
            OrderSide::Buy => (&accounts.paying, "buy with"),
            OrderSide::Sell => (&accounts.buying, "sell"),
        };
        if funding.available_balance <= Decimal::ZERO {
            warn!(
                "No {} available to {} (balance: {})",
                funding.currency, action, funding.available_balance
            );
            return Err(PairbotError::ZeroBalance {
                currency: funding.currency.clone(),
                action,
                balance: funding.available_balance,
            });
        }

        info!(
            "Paying with {} available balance: {}, hold: {}",
            accounts.paying.currency, accounts.paying.available_balance, accounts.paying.hold
        );
        info!(
            "Buying {} available balance: {}, hold: {}",
            accounts.buying.currency, accounts.buying.available_balance, accounts.buying.hold
        );

        Ok(accounts)
    }
}

fn resolve_accounts(product: &ProductId, accounts: &[Account]) -> Result<ValidatedAccounts> {
    let find = |currency: &str| {
        accounts
            .iter()
            .find(|a| a.currency == currency)
            .cloned()
            .ok_or_else(|| PairbotError::AccountNotFound {
                currency: currency.to_string(),
            })
    };

    let paying = find(&product.paying)?;
    let buying = find(&product.buying)?;

    Ok(ValidatedAccounts { buying, paying })
}
