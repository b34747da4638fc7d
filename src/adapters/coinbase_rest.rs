//! Coinbase Advanced Trade REST adapter
//!
//! Implements `ExchangeGateway` against the v3 brokerage API. In dry-run
//! mode reads still hit the exchange while order placement and cancels are
//! simulated locally.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use super::coinbase_ws::{CoinbaseWebSocket, CoinbaseWsConfig};
use crate::config::AppConfig;
use crate::coordination::ShutdownToken;
use crate::domain::{Account, BestBidAsk, LimitOrderRequest, Order, OrderSide, OrderStatus};
use crate::error::{PairbotError, Result};
use crate::exchange::{ChannelType, ExchangeGateway};
use crate::signing::{ApiCredentials, HmacAuth};
use crate::strategy::pricing::{round_price, FeeSchedule};

const API_PREFIX: &str = "/api/v3/brokerage";

const ACCOUNTS_PAGE_LIMIT: u32 = 250;

const STREAM_CHANNEL_CAPACITY: usize = 1024;

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct MoneyValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AccountWire {
    #[serde(default)]
    uuid: String,
    currency: String,
    available_balance: MoneyValue,
    #[serde(default)]
    hold: Option<MoneyValue>,
}

#[derive(Debug, Deserialize)]
struct AccountsPage {
    #[serde(default)]
    accounts: Vec<AccountWire>,
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct PriceLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct PriceBook {
    product_id: String,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
}

#[derive(Debug, Deserialize)]
struct BestBidAskResponse {
    #[serde(default)]
    pricebooks: Vec<PriceBook>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitGtcWire {
    #[serde(default)]
    base_size: Option<String>,
    #[serde(default)]
    limit_price: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderConfigurationWire {
    #[serde(default)]
    limit_limit_gtc: Option<LimitGtcWire>,
}

#[derive(Debug, Deserialize)]
struct OrderWire {
    order_id: String,
    #[serde(default)]
    client_order_id: Option<String>,
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    order_configuration: Option<OrderConfigurationWire>,
    #[serde(default)]
    filled_size: Option<String>,
    #[serde(default)]
    average_filled_price: Option<String>,
    #[serde(default)]
    total_fees: Option<String>,
    #[serde(default)]
    total_value_after_fees: Option<String>,
    #[serde(default)]
    outstanding_hold_amount: Option<String>,
    #[serde(default)]
    reject_reason: Option<String>,
    #[serde(default)]
    reject_message: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: OrderWire,
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<OrderWire>,
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct CreateSuccess {
    order_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct CreateError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_details: Option<String>,
    #[serde(default)]
    preview_failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    success_response: Option<CreateSuccess>,
    #[serde(default)]
    error_response: Option<CreateError>,
}

#[derive(Debug, Deserialize)]
struct CancelResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    failure_reason: Option<String>,
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    results: Vec<CancelResult>,
}

fn parse_decimal(raw: Option<&str>) -> Option<Decimal> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

impl OrderWire {
    fn limit(&self) -> Option<&LimitGtcWire> {
        self.order_configuration
            .as_ref()
            .and_then(|c| c.limit_limit_gtc.as_ref())
    }

    fn into_order(self) -> Result<Order> {
        let side = OrderSide::from_str(&self.side)
            .map_err(|e| PairbotError::Gateway(format!("order {}: {}", self.order_id, e)))?;
        let limit_price = self.limit().and_then(|l| parse_decimal(l.limit_price.as_deref()));
        let base_size = self.limit().and_then(|l| parse_decimal(l.base_size.as_deref()));

        Ok(Order {
            status: OrderStatus::from_exchange(&self.status),
            limit_price,
            base_size,
            filled_size: parse_decimal(self.filled_size.as_deref()).unwrap_or_default(),
            average_filled_price: parse_decimal(self.average_filled_price.as_deref()),
            total_fees: parse_decimal(self.total_fees.as_deref()).unwrap_or_default(),
            total_value_after_fees: parse_decimal(self.total_value_after_fees.as_deref())
                .unwrap_or_default(),
            outstanding_hold_amount: parse_decimal(self.outstanding_hold_amount.as_deref())
                .unwrap_or_default(),
            created_at: self
                .created_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            client_order_id: non_empty(self.client_order_id),
            reject_reason: non_empty(self.reject_reason),
            reject_message: non_empty(self.reject_message),
            order_id: self.order_id,
            product_id: self.product_id,
            side,
        })
    }

    /// Price this buy counts at when looking for the lowest open/filled buy
    fn reference_price(&self) -> Option<Decimal> {
        match OrderStatus::from_exchange(&self.status) {
            OrderStatus::Open => self.limit().and_then(|l| parse_decimal(l.limit_price.as_deref())),
            OrderStatus::Filled => parse_decimal(self.average_filled_price.as_deref()),
            _ => None,
        }
    }
}

impl CreateOrderResponse {
    fn failure_message(&self) -> String {
        let from_error = self.error_response.as_ref().and_then(|e| {
            [&e.message, &e.error_details, &e.error, &e.preview_failure_reason]
                .into_iter()
                .flatten()
                .find(|s| !s.is_empty())
                .cloned()
        });
        from_error
            .or_else(|| non_empty(self.failure_reason.clone()))
            .unwrap_or_else(|| "order creation failed".to_string())
    }
}

// ==================== Client ====================

pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    auth: HmacAuth,
    ws_config: CoinbaseWsConfig,
    fees: FeeSchedule,
    dry_run: bool,
    /// Orders placed in dry-run mode, reported back as filled
    simulated: Mutex<HashMap<String, Order>>,
    shutdown: ShutdownToken,
}

impl CoinbaseClient {
    pub fn new(config: &AppConfig, credentials: ApiCredentials, shutdown: ShutdownToken) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pairbot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PairbotError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let dry_run = config.dry_run.enabled;
        info!(
            "Created Coinbase client for {} (dry_run={})",
            config.exchange.rest_url, dry_run
        );

        Ok(Self {
            http,
            base_url: config.exchange.rest_url.trim_end_matches('/').to_string(),
            auth: HmacAuth::new(credentials),
            ws_config: CoinbaseWsConfig {
                url: config.exchange.ws_url.clone(),
                reconnect_delay: Duration::from_millis(config.listener.reconnect_delay_ms),
                max_reconnect_delay: Duration::from_millis(config.listener.max_reconnect_delay_ms),
            },
            fees: config.fees.schedule(),
            dry_run,
            simulated: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T> {
        // Signature covers the path without the query string
        let path = format!("{}{}", API_PREFIX, endpoint);
        let url = format!("{}{}", self.base_url, path);
        let body_text = body.as_ref().map(Value::to_string);

        let headers = self
            .auth
            .build_headers(method.as_str(), &path, body_text.as_deref())?;
        let mut req = self.http.request(method.clone(), &url).headers(headers);

        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body_text {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(status_error(&method, &path, status, &text));
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order> {
        let response: OrderResponse = self
            .request_json(Method::GET, &format!("/orders/historical/{}", order_id), &[], None)
            .await?;
        response.order.into_order()
    }

    /// Record a simulated order; it reports as filled on the next lookup
    async fn simulate_order(&self, request: &LimitOrderRequest) -> Order {
        let order_id = format!("dry-run-{}", request.client_order_id);
        let mut order = Order::from_request(&order_id, request, OrderStatus::Open);
        order.outstanding_hold_amount = request.value() + round_price(request.value() * self.fees.maker_rate);

        info!(
            "[DRY RUN] Would place {} {} {} @ {} (order {})",
            request.side, request.base_size, request.product_id, request.limit_price, order_id
        );

        self.simulated.lock().await.insert(order_id, order.clone());
        order
    }

    async fn simulated_fill(&self, order_id: &str) -> Option<Order> {
        let simulated = self.simulated.lock().await;
        let mut order = simulated.get(order_id)?.clone();

        if order.status == OrderStatus::Open {
            let value = order.base_size.unwrap_or_default() * order.limit_price.unwrap_or_default();
            let fee = round_price(value * self.fees.maker_rate);
            order.status = OrderStatus::Filled;
            order.filled_size = order.base_size.unwrap_or_default();
            order.average_filled_price = order.limit_price;
            order.total_fees = fee;
            order.total_value_after_fees = value + fee;
            order.outstanding_hold_amount = Decimal::ZERO;
        }
        Some(order)
    }
}

#[async_trait]
impl ExchangeGateway for CoinbaseClient {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    #[instrument(skip(self))]
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = vec![("limit", ACCOUNTS_PAGE_LIMIT.to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }

            let page: AccountsPage = self.request_json(Method::GET, "/accounts", &query, None).await?;
            for wire in page.accounts {
                accounts.push(Account {
                    uuid: wire.uuid,
                    currency: wire.currency,
                    available_balance: parse_decimal(Some(&wire.available_balance.value)).unwrap_or_default(),
                    hold: wire
                        .hold
                        .and_then(|h| parse_decimal(Some(&h.value)))
                        .unwrap_or_default(),
                });
            }

            if !page.has_next || page.cursor.is_empty() {
                break;
            }
            cursor = page.cursor;
        }

        debug!("Fetched {} accounts", accounts.len());
        Ok(accounts)
    }

    #[instrument(skip(self))]
    async fn get_best_bid_ask(&self, product_ids: &[String]) -> Result<Vec<BestBidAsk>> {
        let query: Vec<(&str, String)> = product_ids
            .iter()
            .map(|id| ("product_ids", id.clone()))
            .collect();

        let response: BestBidAskResponse = self
            .request_json(Method::GET, "/best_bid_ask", &query, None)
            .await?;

        Ok(response
            .pricebooks
            .into_iter()
            .map(|book| BestBidAsk {
                best_bid: book.bids.first().and_then(|l| parse_decimal(Some(&l.price))),
                best_ask: book.asks.first().and_then(|l| parse_decimal(Some(&l.price))),
                product_id: book.product_id,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_lowest_open_or_filled_buy_price(&self, product_id: &str) -> Result<Option<Decimal>> {
        let mut lowest: Option<Decimal> = None;
        let mut cursor = String::new();

        loop {
            let mut query = vec![
                ("product_id", product_id.to_string()),
                ("order_side", "BUY".to_string()),
                ("order_status", "OPEN".to_string()),
                ("order_status", "FILLED".to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }

            let page: OrdersPage = self
                .request_json(Method::GET, "/orders/historical/batch", &query, None)
                .await?;

            lowest = page
                .orders
                .iter()
                .filter_map(OrderWire::reference_price)
                .filter(|p| *p > Decimal::ZERO)
                .chain(lowest)
                .min();

            if !page.has_next || page.cursor.is_empty() {
                break;
            }
            cursor = page.cursor;
        }

        debug!("Lowest open/filled buy price for {}: {:?}", product_id, lowest);
        Ok(lowest)
    }

    #[instrument(skip(self, request), fields(side = %request.side, product = %request.product_id))]
    async fn create_limit_order(&self, request: &LimitOrderRequest) -> Result<Order> {
        if self.dry_run {
            return Ok(self.simulate_order(request).await);
        }

        let body = json!({
            "client_order_id": request.client_order_id,
            "product_id": request.product_id,
            "side": request.side.as_str(),
            "order_configuration": {
                "limit_limit_gtc": {
                    "base_size": request.base_size.normalize().to_string(),
                    "limit_price": round_price(request.limit_price).normalize().to_string(),
                    "post_only": request.post_only,
                }
            }
        });

        let response: CreateOrderResponse = self
            .request_json(Method::POST, "/orders", &[], Some(body))
            .await?;

        match (response.success, &response.success_response) {
            (true, Some(created)) => match self.fetch_order(&created.order_id).await {
                Ok(order) => Ok(order),
                // The order exists; a failed lookup must not look like a failed placement
                Err(e) => {
                    warn!(
                        "Placed {} order {} but could not fetch it: {}",
                        request.side, created.order_id, e
                    );
                    Ok(Order::from_request(&created.order_id, request, OrderStatus::Pending))
                }
            },
            _ => {
                let message = response.failure_message();
                warn!("Coinbase refused {} order: {}", request.side, message);

                let mut order = Order::from_request("", request, OrderStatus::Error);
                order.reject_reason = non_empty(response.failure_reason.clone());
                order.reject_message = Some(message);
                Ok(order)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: &str) -> Result<Order> {
        if self.dry_run {
            if let Some(order) = self.simulated_fill(order_id).await {
                return Ok(order);
            }
        }
        self.fetch_order(order_id).await
    }

    #[instrument(skip(self))]
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>> {
        if self.dry_run {
            info!("[DRY RUN] Would cancel {:?}", order_ids);
            let mut simulated = self.simulated.lock().await;
            for id in order_ids {
                if let Some(order) = simulated.get_mut(id) {
                    order.status = OrderStatus::Cancelled;
                }
            }
            return Ok(order_ids.to_vec());
        }

        let response: CancelResponse = self
            .request_json(
                Method::POST,
                "/orders/batch_cancel",
                &[],
                Some(json!({ "order_ids": order_ids })),
            )
            .await?;

        let mut cancelled = Vec::new();
        for result in response.results {
            if result.success {
                cancelled.push(result.order_id);
            } else {
                warn!(
                    "Cancel of {} failed: {}",
                    result.order_id,
                    result.failure_reason.unwrap_or_default()
                );
            }
        }
        Ok(cancelled)
    }

    async fn subscribe_order_events(
        &self,
        product_ids: &[String],
        channel: ChannelType,
    ) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let socket = CoinbaseWebSocket::new(
            self.ws_config.clone(),
            self.auth.clone(),
            product_ids.to_vec(),
            channel,
        );
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = socket.run(tx, shutdown).await {
                warn!("Coinbase WebSocket task ended: {}", e);
            }
        });

        Ok(rx)
    }
}

/// Classify a non-success HTTP answer
fn status_error(method: &Method, path: &str, status: StatusCode, body: &str) -> PairbotError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return PairbotError::RateLimited(format!("Coinbase API rate limited for {} {}", method, path));
    }

    if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
        return PairbotError::ClientRequest {
            status: status.as_u16(),
            message: format!("Coinbase API {} {} failed: body={}", method, path, body),
        };
    }

    PairbotError::Gateway(format!(
        "Coinbase API {} {} failed: status={} body={}",
        method, path, status, body
    ))
}
