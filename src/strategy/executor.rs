use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::accounts::AccountValidator;
use super::pricing::{markdown_price, markup_price, preview_order, FeeSchedule, OrderPreview};
use crate::coordination::ShutdownToken;
use crate::domain::{BestBidAsk, LimitOrderRequest, Order, OrderSide, OrderStatus};
use crate::error::{PairbotError, Result};
use crate::exchange::ExchangeGateway;

/// Places single limit orders after validating funds and pricing them
pub struct OrderExecutionService {
    gateway: Arc<dyn ExchangeGateway>,
    validator: AccountValidator,
    fees: FeeSchedule,
    post_only: bool,
}

/// A submitted order together with the preview it was checked against
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub preview: OrderPreview,
}

/// A priced and funds-checked order that has not been submitted yet
#[derive(Debug, Clone)]
pub struct PreparedOrder {
    pub request: LimitOrderRequest,
    pub preview: OrderPreview,
}

impl PreparedOrder {
    pub fn placed(self, order: Order) -> PlacedOrder {
        PlacedOrder {
            order,
            preview: self.preview,
        }
    }
}

impl PlacedOrder {
    /// Funds this order ties up: the exchange's hold, or the previewed cost
    /// when the exchange reports no hold.
    pub fn committed_funds(&self) -> Decimal {
        if self.order.outstanding_hold_amount > Decimal::ZERO {
            self.order.outstanding_hold_amount
        } else {
            self.preview.total_price_with_fee
        }
    }
}

impl OrderExecutionService {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, fees: FeeSchedule) -> Self {
        Self {
            validator: AccountValidator::new(gateway.clone()),
            gateway,
            fees,
            post_only: true,
        }
    }

    pub fn with_post_only(mut self, post_only: bool) -> Self {
        self.post_only = post_only;
        self
    }

    pub fn validator(&self) -> &AccountValidator {
        &self.validator
    }

    /// Check if in dry run mode
    pub fn is_dry_run(&self) -> bool {
        self.gateway.is_dry_run()
    }

    /// Place a limit buy `markdown_pct` percent below the lower of the lowest
    /// open/filled buy price and the best bid.
    #[instrument(skip(self, shutdown))]
    pub async fn buy(
        &self,
        product_id: &str,
        markdown_pct: Decimal,
        base_size: Decimal,
        shutdown: &ShutdownToken,
    ) -> Result<PlacedOrder> {
        let prepared = self.prepare_buy(product_id, markdown_pct, base_size, shutdown).await?;
        let order = self.submit_limit(&prepared.request, shutdown).await?;

        Ok(prepared.placed(order))
    }

    /// Validate funds and price a buy without submitting it.
    ///
    /// The returned request keeps its `client_order_id`, so resubmitting it
    /// after an ambiguous failure cannot open a second order.
    pub async fn prepare_buy(
        &self,
        product_id: &str,
        markdown_pct: Decimal,
        base_size: Decimal,
        shutdown: &ShutdownToken,
    ) -> Result<PreparedOrder> {
        let accounts = self
            .validator
            .validate(product_id, OrderSide::Buy, shutdown)
            .await?;
        let available = accounts.paying_balance();

        let lowest = shutdown
            .run(self.gateway.get_lowest_open_or_filled_buy_price(product_id))
            .await?;
        let best_bid = self.best_bid_ask(product_id, shutdown).await?.best_bid;

        let reference = match (lowest, best_bid) {
            (Some(lowest), Some(bid)) => lowest.min(bid),
            (Some(price), None) | (None, Some(price)) => price,
            (None, None) => Decimal::ZERO,
        };
        let price = markdown_price(reference, markdown_pct);
        debug!(
            "Buy price for {}: lowest={:?} best_bid={:?} markdown={}% -> {}",
            product_id, lowest, best_bid, markdown_pct, price
        );

        let preview = self.checked_preview(product_id, OrderSide::Buy, base_size, price, available)?;
        let request = LimitOrderRequest::buy_limit(product_id, base_size, price, self.post_only);

        Ok(PreparedOrder { request, preview })
    }

    /// Place a limit sell `markup_pct` percent above the best ask
    #[instrument(skip(self, shutdown))]
    pub async fn sell(
        &self,
        product_id: &str,
        markup_pct: Decimal,
        base_size: Decimal,
        shutdown: &ShutdownToken,
    ) -> Result<PlacedOrder> {
        let accounts = self
            .validator
            .validate(product_id, OrderSide::Sell, shutdown)
            .await?;

        if base_size > accounts.buying_balance() {
            let err = PairbotError::InsufficientFunds {
                required: base_size,
                available: accounts.buying_balance(),
            };
            warn!("{}", err);
            return Err(err);
        }

        let best_ask = self
            .best_bid_ask(product_id, shutdown)
            .await?
            .best_ask
            .unwrap_or(Decimal::ZERO);
        let price = markup_price(best_ask, markup_pct);
        if price <= Decimal::ZERO {
            return Err(PairbotError::NonPositivePrice(price));
        }

        let preview = preview_order(product_id, OrderSide::Sell, base_size, price, self.post_only, &self.fees);
        let request = LimitOrderRequest::sell_limit(product_id, base_size, price, self.post_only);
        let order = self.submit_limit(&request, shutdown).await?;

        Ok(PlacedOrder { order, preview })
    }

    /// Submit a limit order and interpret the exchange's answer.
    ///
    /// Status `ERROR` becomes a non-retryable `OrderRejected`. Errors from
    /// the gateway keep their own retryability: transport, 5xx and 429
    /// failures retry, 4xx and local failures do not.
    pub async fn submit_limit(
        &self,
        request: &LimitOrderRequest,
        shutdown: &ShutdownToken,
    ) -> Result<Order> {
        if shutdown.is_cancelled() {
            return Err(PairbotError::Cancelled);
        }

        let order = match shutdown.run(self.gateway.create_limit_order(request)).await {
            Ok(order) => order,
            Err(PairbotError::Cancelled) => {
                warn!(
                    "Shutdown interrupted {} order submission for {}; it may be live on the exchange (client_order_id: {})",
                    request.side, request.product_id, request.client_order_id
                );
                return Err(PairbotError::Cancelled);
            }
            Err(e) => {
                error!(
                    "An error occurred while placing a {} order for {} (client_order_id: {}): {}",
                    request.side, request.product_id, request.client_order_id, e
                );
                return Err(e);
            }
        };

        if order.status == OrderStatus::Error {
            let err = PairbotError::OrderRejected(format!(
                "Failed to place {} order! Error: {}",
                request.side,
                order.rejection()
            ));
            error!("{}", err);
            return Err(err);
        }

        info!(
            "Placed {} order at {} => order_id: {} product: {} base_size: {} limit_price: {} hold: {}",
            request.side,
            Utc::now(),
            order.order_id,
            request.product_id,
            request.base_size,
            request.limit_price,
            order.outstanding_hold_amount
        );

        Ok(order)
    }

    /// Cancel an order; returns whether the exchange acknowledged it
    pub async fn cancel(&self, order_id: &str, shutdown: &ShutdownToken) -> Result<bool> {
        let ids = [order_id.to_string()];
        let cancelled = shutdown.run(self.gateway.cancel_orders(&ids)).await?;

        let acknowledged = cancelled.iter().any(|id| id == order_id);
        if acknowledged {
            info!("Cancelled order {}", order_id);
        } else {
            warn!("Cancel of order {} was not acknowledged", order_id);
        }
        Ok(acknowledged)
    }

    pub async fn order(&self, order_id: &str, shutdown: &ShutdownToken) -> Result<Order> {
        shutdown.run(self.gateway.get_order(order_id)).await
    }

    /// Best bid/ask for a single product; a product missing from the answer
    /// is reported with no prices.
    pub async fn best_bid_ask(&self, product_id: &str, shutdown: &ShutdownToken) -> Result<BestBidAsk> {
        let ids = [product_id.to_string()];
        let books = shutdown.run(self.gateway.get_best_bid_ask(&ids)).await?;

        Ok(books
            .into_iter()
            .find(|b| b.product_id == product_id)
            .unwrap_or_else(|| BestBidAsk {
                product_id: product_id.to_string(),
                best_bid: None,
                best_ask: None,
            }))
    }

    /// Preview a buy and enforce positive price and sufficient funds
    fn checked_preview(
        &self,
        product_id: &str,
        side: OrderSide,
        base_size: Decimal,
        price: Decimal,
        available: Decimal,
    ) -> Result<OrderPreview> {
        if price <= Decimal::ZERO {
            let err = PairbotError::NonPositivePrice(price);
            warn!("{}", err);
            return Err(err);
        }

        let preview = preview_order(product_id, side, base_size, price, self.post_only, &self.fees);
        if !preview.is_valid {
            return Err(PairbotError::Validation(
                preview.message.clone().unwrap_or_default(),
            ));
        }

        if preview.total_price_with_fee >= available {
            let err = PairbotError::InsufficientFunds {
                required: preview.total_price_with_fee,
                available,
            };
            warn!("{}", err);
            return Err(err);
        }

        Ok(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::Account;
    use crate::exchange::MockExchangeGateway;
    use rust_decimal_macros::dec;

    fn mock_with_market(
        usd: Decimal,
        lowest: Option<Decimal>,
        bid: Option<Decimal>,
    ) -> MockExchangeGateway {
        let mut mock = MockExchangeGateway::new();
        mock.expect_list_accounts().returning(move || {
            Ok(vec![
                Account::new("USDC", usd, dec!(0)),
                Account::new("DEGEN", dec!(0), dec!(0)),
            ])
        });
        mock.expect_get_lowest_open_or_filled_buy_price()
            .returning(move |_| Ok(lowest));
        mock.expect_get_best_bid_ask().returning(move |ids: &[String]| {
            Ok(vec![BestBidAsk {
                product_id: ids[0].clone(),
                best_bid: bid,
                best_ask: bid.map(|b| b + dec!(0.001)),
            }])
        });
        mock
    }

    fn echo_order(
        status: OrderStatus,
        hold: Decimal,
    ) -> impl Fn(&LimitOrderRequest) -> Result<Order> + Send + 'static {
        move |request: &LimitOrderRequest| {
            let mut order = Order::from_request("order-1", request, status);
            order.outstanding_hold_amount = hold;
            Ok(order)
        }
    }

    fn service(mock: MockExchangeGateway) -> OrderExecutionService {
        OrderExecutionService::new(Arc::new(mock), FeeSchedule::default())
    }

    #[tokio::test]
    async fn test_buy_uses_min_reference_and_markdown() {
        let mut mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.018)));
        mock.expect_create_limit_order()
            .withf(|r: &LimitOrderRequest| {
                r.side == OrderSide::Buy && r.limit_price == dec!(0.0171) && r.post_only
            })
            .times(1)
            .returning(echo_order(OrderStatus::Open, dec!(0.069)));

        let placed = service(mock)
            .buy("DEGEN-USDC", dec!(5), dec!(4), &ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(placed.order.limit_price, Some(dec!(0.0171)));
        assert_eq!(placed.preview.total_price, dec!(0.0684));
        assert_eq!(placed.committed_funds(), dec!(0.069));
    }

    #[tokio::test]
    async fn test_buy_without_lowest_price_uses_best_bid() {
        let mut mock = mock_with_market(dec!(100), None, Some(dec!(0.02)));
        mock.expect_create_limit_order()
            .withf(|r: &LimitOrderRequest| r.limit_price == dec!(0.0198))
            .times(1)
            .returning(echo_order(OrderStatus::Open, dec!(0)));

        let placed = service(mock)
            .buy("DEGEN-USDC", dec!(1), dec!(1), &ShutdownToken::never())
            .await
            .unwrap();

        // No hold reported: fall back to the previewed cost
        assert_eq!(placed.committed_funds(), placed.preview.total_price_with_fee);
    }

    #[tokio::test]
    async fn test_buy_rejects_non_positive_price() {
        let mock = mock_with_market(dec!(100), None, None);

        let err = service(mock)
            .buy("DEGEN-USDC", dec!(5), dec!(4), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::NonPositivePrice(p) if p.is_zero()));

        let mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.018)));
        let err = service(mock)
            .buy("DEGEN-USDC", dec!(100), dec!(4), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::NonPositivePrice(_)));
    }

    #[tokio::test]
    async fn test_buy_insufficient_funds_at_boundary() {
        // 4 * 0.020027 = 0.080108 + 0.000481 fee = 0.080589
        let lowest = Some(dec!(0.020027));
        let mock = mock_with_market(dec!(0.080589), lowest, lowest);

        let err = service(mock)
            .buy("DEGEN-USDC", dec!(0), dec!(4), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PairbotError::InsufficientFunds { required, available }
                if required == dec!(0.080589) && available == dec!(0.080589)
        ));

        let mut mock = mock_with_market(dec!(0.08059), lowest, lowest);
        mock.expect_create_limit_order()
            .times(1)
            .returning(echo_order(OrderStatus::Open, dec!(0.080589)));
        assert!(service(mock)
            .buy("DEGEN-USDC", dec!(0), dec!(4), &ShutdownToken::never())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_exchange_error_status_is_non_retryable_rejection() {
        let mut mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.02)));
        mock.expect_create_limit_order().returning(|request: &LimitOrderRequest| {
            let mut order = Order::from_request("", request, OrderStatus::Error);
            order.reject_message = Some("INVALID_LIMIT_PRICE_POST_ONLY".into());
            Ok(order)
        });

        let err = service(mock)
            .buy("DEGEN-USDC", dec!(1), dec!(1), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::OrderRejected(ref m) if m.contains("INVALID_LIMIT_PRICE_POST_ONLY")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_its_retryability() {
        let mut mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.02)));
        mock.expect_create_limit_order()
            .times(1)
            .returning(|_| Err(PairbotError::Gateway("503 Service Unavailable".into())));

        let err = service(mock)
            .buy("DEGEN-USDC", dec!(1), dec!(1), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::Gateway(ref m) if m.contains("503")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_and_local_failures_are_not_retryable() {
        let failures: [fn() -> PairbotError; 3] = [
            || PairbotError::ClientRequest {
                status: 400,
                message: "INVALID_ARGUMENT".into(),
            },
            || PairbotError::Auth("invalid signature".into()),
            || PairbotError::Internal("bad response body".into()),
        ];

        for failure in failures {
            let mut mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.02)));
            mock.expect_create_limit_order()
                .times(1)
                .returning(move |_| Err(failure()));

            let err = service(mock)
                .buy("DEGEN-USDC", dec!(1), dec!(1), &ShutdownToken::never())
                .await
                .unwrap_err();
            assert!(!err.is_retryable(), "{err}");
            assert!(!matches!(err, PairbotError::Gateway(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn test_prepare_buy_does_not_submit() {
        let mut mock = mock_with_market(dec!(100), Some(dec!(0.02)), Some(dec!(0.018)));
        mock.expect_create_limit_order().times(0);

        let prepared = service(mock)
            .prepare_buy("DEGEN-USDC", dec!(5), dec!(4), &ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(prepared.request.limit_price, dec!(0.0171));
        assert_eq!(prepared.request.side, OrderSide::Buy);
        assert_eq!(prepared.preview.limit_price, dec!(0.0171));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_sends_nothing() {
        let shutdown = GracefulShutdown::new();
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let mut mock = MockExchangeGateway::new();
        mock.expect_create_limit_order().times(0);

        let request = LimitOrderRequest::buy_limit("BTC-USD", dec!(1), dec!(100), true);
        let err = service(mock)
            .submit_limit(&request, &shutdown.token())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::Cancelled));
    }

    #[tokio::test]
    async fn test_sell_marks_up_best_ask() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_list_accounts().returning(|| {
            Ok(vec![
                Account::new("USD", dec!(10), dec!(0)),
                Account::new("BTC", dec!(2), dec!(0)),
            ])
        });
        mock.expect_get_best_bid_ask().returning(|_| {
            Ok(vec![BestBidAsk {
                product_id: "BTC-USD".into(),
                best_bid: Some(dec!(99)),
                best_ask: Some(dec!(100)),
            }])
        });
        mock.expect_create_limit_order()
            .withf(|r: &LimitOrderRequest| r.side == OrderSide::Sell && r.limit_price == dec!(102))
            .times(1)
            .returning(echo_order(OrderStatus::Open, dec!(0)));

        let placed = service(mock)
            .sell("BTC-USD", dec!(2), dec!(1), &ShutdownToken::never())
            .await
            .unwrap();
        assert_eq!(placed.preview.side, OrderSide::Sell);
        assert_eq!(placed.preview.total_price, dec!(102));
    }
}
