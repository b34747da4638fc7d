//! Order-update listener
//!
//! Consumes raw messages from the exchange's streaming channel, decodes the
//! event envelope and broadcasts updates for the orders being watched.
//! Malformed messages are logged and dropped; the stream keeps going.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::coordination::ShutdownToken;
use crate::domain::OrderStatus;
use crate::error::{PairbotError, Result};
use crate::exchange::{ChannelType, ExchangeGateway};

const BROADCAST_CAPACITY: usize = 256;

/// Streaming envelope shared by every channel
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub channel: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub sequence_num: u64,
    #[serde(default)]
    pub events: Vec<StreamEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub orders: Vec<StreamOrder>,
}

/// Order record nested in a user-channel event; numbers arrive as strings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamOrder {
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub order_side: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cumulative_quantity: Option<String>,
    #[serde(default)]
    pub leaves_quantity: Option<String>,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub total_fees: Option<String>,
    #[serde(default)]
    pub total_value_after_fees: Option<String>,
}

/// A change to a watched order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub product_id: Option<String>,
    pub status: OrderStatus,
    pub cumulative_quantity: Decimal,
    pub leaves_quantity: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    pub total_fees: Option<Decimal>,
    pub total_value_after_fees: Option<Decimal>,
    pub event_type: String,
    pub sequence_num: u64,
    pub received_at: DateTime<Utc>,
}

impl OrderUpdate {
    fn from_stream(order: &StreamOrder, event_type: &str, sequence_num: u64) -> Self {
        Self {
            order_id: order.order_id.clone(),
            client_order_id: order.client_order_id.clone().filter(|s| !s.is_empty()),
            product_id: order.product_id.clone(),
            status: OrderStatus::from_exchange(&order.status),
            cumulative_quantity: parse_decimal(&order.cumulative_quantity).unwrap_or_default(),
            leaves_quantity: parse_decimal(&order.leaves_quantity),
            avg_price: parse_decimal(&order.avg_price),
            total_fees: parse_decimal(&order.total_fees),
            total_value_after_fees: parse_decimal(&order.total_value_after_fees),
            event_type: event_type.to_string(),
            sequence_num,
            received_at: Utc::now(),
        }
    }

    fn key(&self) -> UpdateKey {
        UpdateKey {
            order_id: self.order_id.clone(),
            status: self.status,
            cumulative_quantity: self.cumulative_quantity.normalize(),
        }
    }
}

fn parse_decimal(raw: &Option<String>) -> Option<Decimal> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
}

/// Decode one raw stream message
pub fn decode_envelope(raw: &str) -> Result<StreamEnvelope> {
    serde_json::from_str(raw).map_err(|e| PairbotError::StreamDecode(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UpdateKey {
    order_id: String,
    status: OrderStatus,
    cumulative_quantity: Decimal,
}

/// Bounded memory of recently emitted updates
#[derive(Debug)]
struct DedupeWindow {
    capacity: usize,
    order: VecDeque<UpdateKey>,
    seen: HashSet<UpdateKey>,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns false if the key was already recorded
    fn insert(&mut self, key: UpdateKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }
}

/// Listener counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerStats {
    pub messages: u64,
    pub decode_errors: u64,
    pub updates_emitted: u64,
    pub duplicates_dropped: u64,
    pub sequence_gaps: u64,
}

pub struct OrderUpdateListener {
    gateway: Arc<dyn ExchangeGateway>,
    /// Order ids whose updates are broadcast
    watched: RwLock<HashSet<String>>,
    /// Broadcast every order update regardless of `watched`
    watch_all: bool,
    dedupe: Mutex<DedupeWindow>,
    last_sequence: Mutex<Option<u64>>,
    stats: RwLock<ListenerStats>,
    tx: broadcast::Sender<OrderUpdate>,
}

impl OrderUpdateListener {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, dedupe_window: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            gateway,
            watched: RwLock::new(HashSet::new()),
            watch_all: false,
            dedupe: Mutex::new(DedupeWindow::new(dedupe_window)),
            last_sequence: Mutex::new(None),
            stats: RwLock::new(ListenerStats::default()),
            tx,
        }
    }

    /// Broadcast updates for every order on the stream
    pub fn watching_all(mut self) -> Self {
        self.watch_all = true;
        self
    }

    pub async fn watch(&self, order_id: &str) {
        if self.watched.write().await.insert(order_id.to_string()) {
            debug!("Watching order {}", order_id);
        }
    }

    pub async fn unwatch(&self, order_id: &str) {
        if self.watched.write().await.remove(order_id) {
            debug!("Stopped watching order {}", order_id);
        }
    }

    pub async fn is_watching(&self, order_id: &str) -> bool {
        self.watch_all || self.watched.read().await.contains(order_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderUpdate> {
        self.tx.subscribe()
    }

    pub async fn stats(&self) -> ListenerStats {
        self.stats.read().await.clone()
    }

    /// Subscribe to the channel and process messages until shutdown or until
    /// the transport closes the stream.
    pub async fn run(
        &self,
        product_ids: &[String],
        channel: ChannelType,
        shutdown: &ShutdownToken,
    ) -> Result<ListenerStats> {
        info!(
            "Subscribing to {} channel for {}",
            channel,
            product_ids.join(",")
        );
        let mut rx = shutdown
            .run(self.gateway.subscribe_order_events(product_ids, channel))
            .await?;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Order listener shutting down");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(raw) => {
                        if let Err(e) = self.handle_message(&raw).await {
                            warn!("Dropping stream message: {}", e);
                        }
                    }
                    None => {
                        info!("Order event stream closed");
                        break;
                    }
                }
            }
        }

        Ok(self.stats().await)
    }

    /// Decode one message and broadcast updates for watched orders; returns
    /// the updates emitted.
    pub async fn handle_message(&self, raw: &str) -> Result<Vec<OrderUpdate>> {
        self.stats.write().await.messages += 1;

        let envelope = match decode_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.write().await.decode_errors += 1;
                return Err(e);
            }
        };

        self.track_sequence(&envelope).await;

        let mut emitted = Vec::new();
        for event in &envelope.events {
            for order in &event.orders {
                if !self.is_watching(&order.order_id).await {
                    continue;
                }

                let update = OrderUpdate::from_stream(order, &event.event_type, envelope.sequence_num);
                if !self.dedupe.lock().await.insert(update.key()) {
                    self.stats.write().await.duplicates_dropped += 1;
                    debug!(
                        "Duplicate update for {} ({} {})",
                        update.order_id, update.status, update.cumulative_quantity
                    );
                    continue;
                }

                info!(
                    "Order {} is {} (filled {}, event {})",
                    update.order_id, update.status, update.cumulative_quantity, update.event_type
                );
                // No receivers is fine: nobody is waiting right now
                let _ = self.tx.send(update.clone());
                emitted.push(update);
            }
        }

        self.stats.write().await.updates_emitted += emitted.len() as u64;
        Ok(emitted)
    }

    async fn track_sequence(&self, envelope: &StreamEnvelope) {
        let mut last = self.last_sequence.lock().await;
        let seq = envelope.sequence_num;

        match *last {
            Some(prev) if seq > prev + 1 => {
                warn!(
                    "Sequence gap on {} channel: expected {}, got {} ({} missed)",
                    envelope.channel,
                    prev + 1,
                    seq,
                    seq - prev - 1
                );
                self.stats.write().await.sequence_gaps += 1;
            }
            Some(prev) if seq <= prev => {
                // Sequence restarts after a reconnect
                debug!("Sequence reset on {} channel: {} -> {}", envelope.channel, prev, seq);
            }
            _ => {}
        }
        *last = Some(seq);
    }
}
