//! Buy/sell pairing engine
//!
//! Two drive loops on top of the execution service:
//! - `buy_loop_till_funds_run_out` stacks post-only buys at a growing
//!   markdown until the paying balance is committed
//! - `monitor_and_trade` buys below the best bid, waits for the fill, then
//!   lists the filled size for sale above its cost

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::executor::{OrderExecutionService, PlacedOrder};
use super::fill_wait::{FillOutcome, FillWaiter};
use super::pricing::{markdown_price, markup_price};
use crate::config::AppConfig;
use crate::coordination::{RetryPolicy, ShutdownToken};
use crate::domain::{LimitOrderRequest, Order, OrderSide, Outcome};
use crate::error::{PairbotError, Result};

/// Knobs for both loops
#[derive(Debug, Clone)]
pub struct PairingSettings {
    pub base_size: Decimal,
    pub markdown_step_pct: Decimal,
    pub post_only: bool,
    pub iteration_delay: Duration,
    pub max_iterations: u32,
    pub fill_timeout: Duration,
    pub sell_fill_timeout: Duration,
    pub max_cycles: Option<u32>,
}

impl PairingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let exec = &config.execution;
        Self {
            base_size: config.trading.base_size,
            markdown_step_pct: config.trading.markdown_step_pct,
            post_only: config.trading.post_only,
            iteration_delay: Duration::from_millis(exec.iteration_delay_ms),
            max_iterations: exec.max_iterations,
            fill_timeout: Duration::from_millis(exec.fill_timeout_ms),
            sell_fill_timeout: Duration::from_millis(exec.sell_fill_timeout_ms),
            max_cycles: exec.max_cycles,
        }
    }
}

/// Why the buy loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    FundsExhausted,
    IterationCap,
    Shutdown,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuyLoopReport {
    pub product_id: String,
    pub orders: Vec<PlacedOrder>,
    pub starting_balance: Decimal,
    pub remaining_balance: Decimal,
    pub iterations: u32,
    pub stop_reason: StopReason,
}

impl BuyLoopReport {
    fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            orders: Vec::new(),
            starting_balance: Decimal::ZERO,
            remaining_balance: Decimal::ZERO,
            iterations: 0,
            stop_reason: StopReason::Failed,
        }
    }
}

/// How one monitor cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleResult {
    /// Buy timed out and was cancelled
    BuyCancelled,
    /// Buy closed on the exchange without filling
    BuyClosed,
    SellFilled,
    /// Sell timed out and stays on the book
    SellResting,
    /// Sell closed on the exchange without filling
    SellClosed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub product_id: String,
    pub buy_order_id: String,
    pub buy_price: Decimal,
    pub buy_fill: Option<Order>,
    pub sell_order_id: Option<String>,
    pub sell_price: Option<Decimal>,
    pub result: CycleResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct BuySellPairs {
    executor: Arc<OrderExecutionService>,
    waiter: FillWaiter,
    retry: RetryPolicy,
    settings: PairingSettings,
    shutdown: ShutdownToken,
}

impl BuySellPairs {
    pub fn new(
        executor: Arc<OrderExecutionService>,
        waiter: FillWaiter,
        retry: RetryPolicy,
        settings: PairingSettings,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            executor,
            waiter,
            retry,
            settings,
            shutdown,
        }
    }

    /// Place buys at `start_markdown`, `start_markdown + step`, ... until the
    /// paying balance is used up, a buy fails, the iteration cap is hit or
    /// shutdown is requested.
    pub async fn buy_loop_till_funds_run_out(
        &self,
        product_id: &str,
        base_size: Decimal,
        start_markdown: Decimal,
    ) -> Outcome<BuyLoopReport> {
        let mut report = BuyLoopReport::new(product_id);

        let accounts = match self
            .executor
            .validator()
            .validate(product_id, OrderSide::Buy, &self.shutdown)
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Buy loop for {} could not start: {}", product_id, e);
                return Outcome::error_with_payload(&e, report);
            }
        };

        let mut remaining = accounts.paying_balance();
        report.starting_balance = remaining;
        let mut markdown = start_markdown;

        info!(
            "Starting buy loop for {}: balance {} {}, base size {}, markdown {}%",
            product_id, remaining, accounts.paying.currency, base_size, markdown
        );

        let stop_reason = loop {
            if remaining <= Decimal::ZERO {
                break StopReason::FundsExhausted;
            }
            if self.shutdown.is_cancelled() {
                break StopReason::Shutdown;
            }
            if report.iterations >= self.settings.max_iterations {
                warn!(
                    "Buy loop for {} reached {} iterations with {} left",
                    product_id, report.iterations, remaining
                );
                break StopReason::IterationCap;
            }
            report.iterations += 1;

            let placed = self.place_buy(product_id, markdown, base_size).await;

            match placed {
                Ok(placed) => {
                    remaining -= placed.committed_funds();
                    info!(
                        "Buy {} placed at {} ({}% markdown); remaining balance {}",
                        placed.order.order_id, placed.preview.limit_price, markdown, remaining
                    );
                    report.orders.push(placed);
                }
                Err(PairbotError::Cancelled) => break StopReason::Shutdown,
                Err(e) => {
                    error!(
                        "Buy loop for {} stopped after {} orders: {}",
                        product_id,
                        report.orders.len(),
                        e
                    );
                    report.stop_reason = StopReason::Failed;
                    report.remaining_balance = remaining;
                    return Outcome::error_with_payload(&e, report);
                }
            }

            markdown += self.settings.markdown_step_pct;

            if remaining > Decimal::ZERO && self.shutdown.sleep(self.settings.iteration_delay).await.is_err() {
                break StopReason::Shutdown;
            }
        };

        report.stop_reason = stop_reason;
        report.remaining_balance = remaining;
        info!(
            "Buy loop for {} finished ({:?}): {} orders, remaining balance {}",
            product_id,
            stop_reason,
            report.orders.len(),
            remaining
        );

        let message = format!("{} buy orders placed", report.orders.len());
        Outcome::success(report).with_message(message)
    }

    /// Price a buy once, then retry only its submission. Resubmitting the
    /// same `client_order_id` makes the exchange return the order it already
    /// holds instead of opening another.
    async fn place_buy(&self, product_id: &str, markdown: Decimal, base_size: Decimal) -> Result<PlacedOrder> {
        let prepared = self
            .retry
            .run("buy pricing", &self.shutdown, || {
                self.executor
                    .prepare_buy(product_id, markdown, base_size, &self.shutdown)
            })
            .await?;

        let order = self
            .retry
            .run("buy", &self.shutdown, || {
                self.executor.submit_limit(&prepared.request, &self.shutdown)
            })
            .await?;

        Ok(prepared.placed(order))
    }

    /// Buy `buy_pct` below the best bid, wait for the fill, sell `sell_pct`
    /// above the filled value; repeat until shutdown or the cycle cap.
    pub async fn monitor_and_trade(
        &self,
        product_id: &str,
        buy_pct: Decimal,
        sell_pct: Decimal,
    ) -> Outcome<Vec<CycleReport>> {
        let mut cycles = Vec::new();
        let mut cycle = 0u32;

        info!(
            "Monitoring {}: buy {}% below bid, sell {}% above cost",
            product_id, buy_pct, sell_pct
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.settings.max_cycles.is_some_and(|max| cycle >= max) {
                info!("Reached {} cycles", cycle);
                break;
            }
            cycle += 1;

            match self.run_cycle(cycle, product_id, buy_pct, sell_pct).await {
                Ok(report) => {
                    info!(
                        "Cycle {} for {} finished: {:?} (buy {} @ {}, sell {:?} @ {:?})",
                        report.cycle,
                        product_id,
                        report.result,
                        report.buy_order_id,
                        report.buy_price,
                        report.sell_order_id,
                        report.sell_price
                    );
                    cycles.push(report);
                }
                Err(PairbotError::Cancelled) => break,
                Err(e) => {
                    error!("Monitor loop for {} stopped in cycle {}: {}", product_id, cycle, e);
                    return Outcome::error_with_payload(&e, cycles);
                }
            }
        }

        info!("Monitor loop for {} stopped after {} cycles", product_id, cycles.len());
        Outcome::success(cycles)
    }

    async fn run_cycle(
        &self,
        cycle: u32,
        product_id: &str,
        buy_pct: Decimal,
        sell_pct: Decimal,
    ) -> Result<CycleReport> {
        let started_at = Utc::now();
        let shutdown = &self.shutdown;

        let book = self
            .retry
            .run("best bid", shutdown, || self.executor.best_bid_ask(product_id, shutdown))
            .await?;
        let buy_price = markdown_price(book.best_bid.unwrap_or_default(), buy_pct);
        if buy_price <= Decimal::ZERO {
            return Err(PairbotError::NonPositivePrice(buy_price));
        }

        let request = LimitOrderRequest::buy_limit(
            product_id,
            self.settings.base_size,
            buy_price,
            self.settings.post_only,
        );
        let buy = self
            .retry
            .run("monitor buy", shutdown, || self.executor.submit_limit(&request, shutdown))
            .await?;

        let mut report = CycleReport {
            cycle,
            product_id: product_id.to_string(),
            buy_order_id: buy.order_id.clone(),
            buy_price,
            buy_fill: None,
            sell_order_id: None,
            sell_price: None,
            result: CycleResult::BuyClosed,
            started_at,
            finished_at: started_at,
        };

        let filled = match self.waiter.wait(&buy.order_id, self.settings.fill_timeout, shutdown).await? {
            FillOutcome::Filled(order) => order,
            FillOutcome::Closed(_) => {
                report.finished_at = Utc::now();
                return Ok(report);
            }
            FillOutcome::TimedOut(order_id) => match self.cancel_unfilled_buy(&order_id).await? {
                Some(order) => order,
                None => {
                    report.result = CycleResult::BuyCancelled;
                    report.finished_at = Utc::now();
                    return Ok(report);
                }
            },
        };

        let sell_price = markup_price(filled.total_value_after_fees, sell_pct);
        if sell_price <= Decimal::ZERO {
            return Err(PairbotError::NonPositivePrice(sell_price));
        }
        let sell_size = if filled.filled_size > Decimal::ZERO {
            filled.filled_size
        } else {
            self.settings.base_size
        };
        report.buy_fill = Some(filled);

        let request = LimitOrderRequest::sell_limit(product_id, sell_size, sell_price, self.settings.post_only);
        let sell = self
            .retry
            .run("monitor sell", shutdown, || self.executor.submit_limit(&request, shutdown))
            .await?;
        report.sell_order_id = Some(sell.order_id.clone());
        report.sell_price = Some(sell_price);

        report.result = match self
            .waiter
            .wait(&sell.order_id, self.settings.sell_fill_timeout, shutdown)
            .await?
        {
            FillOutcome::Filled(_) => CycleResult::SellFilled,
            FillOutcome::Closed(_) => CycleResult::SellClosed,
            FillOutcome::TimedOut(order_id) => {
                warn!(
                    "Sell {} at {} did not fill within {:?}; leaving it on the book",
                    order_id, sell_price, self.settings.sell_fill_timeout
                );
                CycleResult::SellResting
            }
        };
        report.finished_at = Utc::now();

        Ok(report)
    }

    /// Cancel a timed-out buy. If the cancel is refused because the order
    /// filled in the meantime, return the filled order.
    async fn cancel_unfilled_buy(&self, order_id: &str) -> Result<Option<Order>> {
        if self.executor.cancel(order_id, &self.shutdown).await? {
            return Ok(None);
        }

        let order = self.executor.order(order_id, &self.shutdown).await?;
        if order.is_filled() {
            info!("Buy {} filled while being cancelled", order_id);
            Ok(Some(order))
        } else {
            Ok(None)
        }
    }
}
