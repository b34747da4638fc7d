#![allow(dead_code)]

use async_trait::async_trait;
use pairbot::domain::{Account, BestBidAsk, LimitOrderRequest, Order, OrderSide, OrderStatus};
use pairbot::error::{PairbotError, Result};
use pairbot::exchange::{ChannelType, ExchangeGateway};
use pairbot::strategy::{round_price, FeeSchedule};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// When the fake reports a placed order as filled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Filled on the first lookup
    Immediately,
    /// Filled once the order has been looked up this many times
    AfterPolls(u32),
    Never,
}

/// In-memory exchange: balances move with holds, orders fill per `FillMode`.
/// Like Coinbase, a repeated `client_order_id` returns the existing order.
pub struct FakeGateway {
    pub paying: String,
    pub buying: String,
    accounts: Mutex<HashMap<String, Account>>,
    best_bid: Mutex<Option<Decimal>>,
    best_ask: Mutex<Option<Decimal>>,
    lowest_buy: Mutex<Option<Decimal>>,
    buy_fill: Mutex<FillMode>,
    sell_fill: Mutex<FillMode>,
    orders: Mutex<HashMap<String, Order>>,
    polls: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<LimitOrderRequest>>,
    submissions: Mutex<Vec<LimitOrderRequest>>,
    create_errors: Mutex<VecDeque<PairbotError>>,
    lost_responses: Mutex<VecDeque<PairbotError>>,
    create_delay: Mutex<Option<Duration>>,
    cancelled: Mutex<Vec<String>>,
    stream: Mutex<Option<mpsc::Receiver<String>>>,
    fees: FeeSchedule,
}

impl FakeGateway {
    pub fn new(product_id: &str, paying_balance: Decimal, buying_balance: Decimal) -> Self {
        let (buying, paying) = product_id.split_once('-').unwrap();
        let mut accounts = HashMap::new();
        accounts.insert(paying.to_string(), Account::new(paying, paying_balance, Decimal::ZERO));
        accounts.insert(buying.to_string(), Account::new(buying, buying_balance, Decimal::ZERO));

        Self {
            paying: paying.to_string(),
            buying: buying.to_string(),
            accounts: Mutex::new(accounts),
            best_bid: Mutex::new(None),
            best_ask: Mutex::new(None),
            lowest_buy: Mutex::new(None),
            buy_fill: Mutex::new(FillMode::Never),
            sell_fill: Mutex::new(FillMode::Never),
            orders: Mutex::new(HashMap::new()),
            polls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            create_errors: Mutex::new(VecDeque::new()),
            lost_responses: Mutex::new(VecDeque::new()),
            create_delay: Mutex::new(None),
            cancelled: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
            fees: FeeSchedule::default(),
        }
    }

    pub fn with_book(self, bid: Decimal, ask: Decimal) -> Self {
        *self.best_bid.lock().unwrap() = Some(bid);
        *self.best_ask.lock().unwrap() = Some(ask);
        self
    }

    pub fn with_lowest_buy(self, price: Decimal) -> Self {
        *self.lowest_buy.lock().unwrap() = Some(price);
        self
    }

    pub fn with_fills(self, buy: FillMode, sell: FillMode) -> Self {
        *self.buy_fill.lock().unwrap() = buy;
        *self.sell_fill.lock().unwrap() = sell;
        self
    }

    /// Fail the next order submission with `err`
    pub fn fail_next_create(&self, err: PairbotError) {
        self.create_errors.lock().unwrap().push_back(err);
    }

    /// Accept the next new order, then answer with `err` as if the response
    /// was lost in transit
    pub fn lose_next_create_response(&self, err: PairbotError) {
        self.lost_responses.lock().unwrap().push_back(err);
    }

    /// Hold every order submission for `delay` before answering
    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.create_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Sender feeding the next `subscribe_order_events` call
    pub fn stream_sender(&self) -> mpsc::Sender<String> {
        let (tx, rx) = mpsc::channel(64);
        *self.stream.lock().unwrap() = Some(rx);
        tx
    }

    /// Orders the exchange accepted, one per distinct `client_order_id`
    pub fn requests(&self) -> Vec<LimitOrderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every call to `create_limit_order`, including repeats and failures
    pub fn submissions(&self) -> Vec<LimitOrderRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_id).cloned()
    }

    pub fn balance(&self, currency: &str) -> Decimal {
        self.accounts.lock().unwrap()[currency].available_balance
    }

    /// Mark an order filled right away
    pub fn fill(&self, order_id: &str) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(order_id) {
            self.apply_fill(order);
        }
    }

    fn apply_fill(&self, order: &mut Order) {
        let size = order.base_size.unwrap_or_default();
        let value = size * order.limit_price.unwrap_or_default();
        let fee = round_price(value * self.fees.maker_rate);
        order.status = OrderStatus::Filled;
        order.filled_size = size;
        order.average_filled_price = order.limit_price;
        order.total_fees = fee;
        order.total_value_after_fees = value + fee;
        order.outstanding_hold_amount = Decimal::ZERO;
    }

    fn hold_for(&self, request: &LimitOrderRequest) -> Decimal {
        request.value() + round_price(request.value() * self.fees.maker_rate)
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    fn is_dry_run(&self) -> bool {
        false
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.lock().unwrap().values().cloned().collect())
    }

    async fn get_best_bid_ask(&self, product_ids: &[String]) -> Result<Vec<BestBidAsk>> {
        Ok(product_ids
            .iter()
            .map(|id| BestBidAsk {
                product_id: id.clone(),
                best_bid: *self.best_bid.lock().unwrap(),
                best_ask: *self.best_ask.lock().unwrap(),
            })
            .collect())
    }

    async fn get_lowest_open_or_filled_buy_price(&self, _product_id: &str) -> Result<Option<Decimal>> {
        Ok(*self.lowest_buy.lock().unwrap())
    }

    async fn create_limit_order(&self, request: &LimitOrderRequest) -> Result<Order> {
        self.submissions.lock().unwrap().push(request.clone());

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.create_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let existing = self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.client_order_id.as_deref() == Some(request.client_order_id.as_str()))
            .cloned();
        if let Some(order) = existing {
            return Ok(order);
        }

        self.requests.lock().unwrap().push(request.clone());

        let order_id = format!("order-{}", self.requests.lock().unwrap().len());
        let mut order = Order::from_request(&order_id, request, OrderStatus::Open);

        let mut accounts = self.accounts.lock().unwrap();
        match request.side {
            OrderSide::Buy => {
                let hold = self.hold_for(request);
                let account = accounts.get_mut(&self.paying).unwrap();
                account.available_balance -= hold;
                account.hold += hold;
                order.outstanding_hold_amount = hold;
            }
            OrderSide::Sell => {
                let account = accounts.get_mut(&self.buying).unwrap();
                account.available_balance -= request.base_size;
                account.hold += request.base_size;
            }
        }

        drop(accounts);
        self.orders.lock().unwrap().insert(order_id, order.clone());

        if let Some(err) = self.lost_responses.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let polls = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(order_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| PairbotError::Gateway(format!("unknown order {order_id}")))?;

        if order.status == OrderStatus::Open {
            let mode = match order.side {
                OrderSide::Buy => *self.buy_fill.lock().unwrap(),
                OrderSide::Sell => *self.sell_fill.lock().unwrap(),
            };
            let filled = match mode {
                FillMode::Immediately => true,
                FillMode::AfterPolls(n) => polls >= n,
                FillMode::Never => false,
            };
            if filled {
                self.apply_fill(order);
            }
        }
        Ok(order.clone())
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>> {
        let mut orders = self.orders.lock().unwrap();
        let mut cancelled = Vec::new();
        for id in order_ids {
            if let Some(order) = orders.get_mut(id) {
                if order.status == OrderStatus::Open {
                    order.status = OrderStatus::Cancelled;
                    cancelled.push(id.clone());
                }
            }
        }
        self.cancelled.lock().unwrap().extend(cancelled.iter().cloned());
        Ok(cancelled)
    }

    async fn subscribe_order_events(
        &self,
        _product_ids: &[String],
        _channel: ChannelType,
    ) -> Result<mpsc::Receiver<String>> {
        match self.stream.lock().unwrap().take() {
            Some(rx) => Ok(rx),
            None => {
                let (_, rx) = mpsc::channel(1);
                Ok(rx)
            }
        }
    }
}

/// A user-channel message reporting one order
pub fn user_message(sequence_num: u64, order_id: &str, status: &str, filled: &str) -> String {
    serde_json::json!({
        "channel": "user",
        "client_id": "",
        "timestamp": "2024-05-01T12:00:00.000000Z",
        "sequence_num": sequence_num,
        "events": [{
            "type": "update",
            "orders": [{
                "order_id": order_id,
                "status": status,
                "cumulative_quantity": filled,
                "total_value_after_fees": "0"
            }]
        }]
    })
    .to_string()
}
