use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coordination::ShutdownToken;
use crate::domain::{Order, OrderStatus};
use crate::error::{PairbotError, Result};
use crate::exchange::ExchangeGateway;
use crate::services::{OrderUpdate, OrderUpdateListener};

/// How a wait for an order's fill ended
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled(Order),
    /// Cancelled, expired, failed or rejected without filling
    Closed(Order),
    TimedOut(String),
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled(_))
    }
}

/// Waits for an order to fill: stream updates first, `get_order` polling as
/// the fallback.
pub struct FillWaiter {
    gateway: Arc<dyn ExchangeGateway>,
    listener: Option<Arc<OrderUpdateListener>>,
    poll_interval: Duration,
    max_poll_interval: Duration,
}

impl FillWaiter {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, poll_interval: Duration, max_poll_interval: Duration) -> Self {
        Self {
            gateway,
            listener: None,
            poll_interval,
            max_poll_interval: max_poll_interval.max(poll_interval),
        }
    }

    pub fn with_listener(mut self, listener: Arc<OrderUpdateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Wait until `order_id` fills, closes, `timeout` elapses or shutdown
    /// is requested.
    pub async fn wait(&self, order_id: &str, timeout: Duration, shutdown: &ShutdownToken) -> Result<FillOutcome> {
        let mut updates = match &self.listener {
            Some(listener) => {
                // Subscribe before the first poll so no update slips between them
                let rx = listener.subscribe();
                listener.watch(order_id).await;
                Some(rx)
            }
            None => None,
        };

        let result = self.wait_inner(order_id, timeout, &mut updates, shutdown).await;

        if let Some(listener) = &self.listener {
            listener.unwatch(order_id).await;
        }
        result
    }

    async fn wait_inner(
        &self,
        order_id: &str,
        timeout: Duration,
        updates: &mut Option<broadcast::Receiver<OrderUpdate>>,
        shutdown: &ShutdownToken,
    ) -> Result<FillOutcome> {
        let deadline = Instant::now() + timeout;
        let mut interval = self.poll_interval;

        loop {
            match self.poll(order_id, shutdown).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Polling order {} failed, will retry: {}", order_id, e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                info!("Order {} did not fill within {:?}", order_id, timeout);
                return Ok(FillOutcome::TimedOut(order_id.to_string()));
            }

            let notified = self
                .wait_for_signal(updates, order_id, interval.min(deadline - now), shutdown)
                .await?;
            if !notified {
                interval = (interval * 2).min(self.max_poll_interval);
            }
        }
    }

    /// One status check; `None` while the order is still working
    async fn poll(&self, order_id: &str, shutdown: &ShutdownToken) -> Result<Option<FillOutcome>> {
        let order = shutdown.run(self.gateway.get_order(order_id)).await?;

        match order.status {
            OrderStatus::Filled => {
                info!(
                    "Order {} filled: size {} value after fees {}",
                    order.order_id, order.filled_size, order.total_value_after_fees
                );
                Ok(Some(FillOutcome::Filled(order)))
            }
            status if status.is_terminal() => {
                warn!("Order {} closed without filling: {}", order.order_id, status);
                Ok(Some(FillOutcome::Closed(order)))
            }
            status => {
                debug!(
                    "Order {} is {} ({:.2}% filled)",
                    order.order_id,
                    status,
                    order.fill_pct()
                );
                Ok(None)
            }
        }
    }

    /// Sleep for `duration`, waking early when the stream reports a terminal
    /// status for the order. Returns true when woken by the stream.
    async fn wait_for_signal(
        &self,
        updates: &mut Option<broadcast::Receiver<OrderUpdate>>,
        order_id: &str,
        duration: Duration,
        shutdown: &ShutdownToken,
    ) -> Result<bool> {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            let Some(rx) = updates.as_mut() else {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(PairbotError::Cancelled),
                    _ = &mut sleep => return Ok(false),
                }
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(PairbotError::Cancelled),
                _ = &mut sleep => return Ok(false),
                received = rx.recv() => received,
            };

            match received {
                Ok(update) if update.order_id == order_id && update.status.is_terminal() => {
                    debug!("Stream reported order {} as {}", order_id, update.status);
                    return Ok(true);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Fill waiter lagged {} updates; polling {}", skipped, order_id);
                    return Ok(true);
                }
                Err(RecvError::Closed) => {
                    debug!("Update stream closed; polling only");
                    *updates = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::LimitOrderRequest;
    use crate::exchange::MockExchangeGateway;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn order(status: OrderStatus) -> Order {
        let request = LimitOrderRequest::buy_limit("BTC-USD", dec!(1), dec!(100), true);
        let mut order = Order::from_request("o-1", &request, status);
        if status == OrderStatus::Filled {
            order.filled_size = dec!(1);
            order.total_value_after_fees = dec!(100.6);
        }
        order
    }

    fn waiter(mock: MockExchangeGateway) -> FillWaiter {
        FillWaiter::new(Arc::new(mock), Duration::from_secs(5), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fills_after_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(order(if n < 2 { OrderStatus::Open } else { OrderStatus::Filled }))
        });

        let outcome = waiter(mock)
            .wait("o-1", Duration::from_secs(600), &ShutdownToken::never())
            .await
            .unwrap();

        assert!(outcome.is_filled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(|_| Ok(order(OrderStatus::Open)));

        let started = Instant::now();
        let outcome = waiter(mock)
            .wait("o-1", Duration::from_secs(60), &ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(outcome, FillOutcome::TimedOut("o-1".to_string()));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_order_ends_wait() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(|_| Ok(order(OrderStatus::Cancelled)));

        let outcome = waiter(mock)
            .wait("o-1", Duration::from_secs(60), &ShutdownToken::never())
            .await
            .unwrap();
        assert!(matches!(outcome, FillOutcome::Closed(o) if o.status == OrderStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_poll_errors_keep_waiting() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PairbotError::RateLimited("slow down".into()))
            } else {
                Ok(order(OrderStatus::Filled))
            }
        });

        let outcome = waiter(mock)
            .wait("o-1", Duration::from_secs(60), &ShutdownToken::never())
            .await
            .unwrap();
        assert!(outcome.is_filled());

        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order()
            .returning(|_| Err(PairbotError::Auth("bad key".into())));
        let err = waiter(mock)
            .wait("o-1", Duration::from_secs(60), &ShutdownToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::Auth(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(|_| Ok(order(OrderStatus::Open)));

        let shutdown = Arc::new(GracefulShutdown::new());
        let token = shutdown.token();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.request_shutdown(ShutdownSignal::Graceful);
        });

        let err = waiter(mock)
            .wait("o-1", Duration::from_secs(3600), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PairbotError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_update_wakes_waiter_early() {
        let filled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = filled.clone();
        let mut mock = MockExchangeGateway::new();
        mock.expect_get_order().returning(move |_| {
            Ok(order(if flag.load(Ordering::SeqCst) {
                OrderStatus::Filled
            } else {
                OrderStatus::Open
            }))
        });
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(mock);

        let listener = Arc::new(OrderUpdateListener::new(gateway.clone(), 16));
        let waiter = FillWaiter::new(gateway, Duration::from_secs(300), Duration::from_secs(300))
            .with_listener(listener.clone());

        let feeder = listener.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            filled.store(true, Ordering::SeqCst);
            let message = serde_json::json!({
                "channel": "user",
                "sequence_num": 1,
                "events": [{"type": "update", "orders": [
                    {"order_id": "o-1", "status": "FILLED", "cumulative_quantity": "1"}
                ]}]
            });
            feeder.handle_message(&message.to_string()).await.unwrap();
        });

        let started = Instant::now();
        let outcome = waiter
            .wait("o-1", Duration::from_secs(3600), &ShutdownToken::never())
            .await
            .unwrap();

        assert!(outcome.is_filled());
        assert!(started.elapsed() < Duration::from_secs(300));
        assert!(!listener.is_watching("o-1").await);
    }
}
