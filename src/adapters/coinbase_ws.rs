//! Coinbase Advanced Trade WebSocket transport
//!
//! Holds one authenticated subscription open and forwards every text frame
//! to an `mpsc` channel. Decoding is left to the consumer.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::coordination::ShutdownToken;
use crate::error::{PairbotError, Result};
use crate::exchange::ChannelType;
use crate::signing::HmacAuth;

/// How often to send ping frames
const PING_INTERVAL_SECS: u64 = 30;

/// A connection with no frames for this long is considered dead
const STALE_TIMEOUT_SECS: u64 = 90;

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct CoinbaseWsConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

/// Signed subscribe request
#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: &'a [String],
    channel: &'a str,
    api_key: &'a str,
    timestamp: String,
    signature: String,
}

/// Why a connection ended without error
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// Server closed or went silent; reconnect
    Closed,
    /// Nobody is reading any more
    ReceiverDropped,
    Shutdown,
}

pub struct CoinbaseWebSocket {
    config: CoinbaseWsConfig,
    auth: HmacAuth,
    product_ids: Vec<String>,
    channel: ChannelType,
}

impl CoinbaseWebSocket {
    pub fn new(config: CoinbaseWsConfig, auth: HmacAuth, product_ids: Vec<String>, channel: ChannelType) -> Self {
        Self {
            config,
            auth,
            product_ids,
            channel,
        }
    }

    fn subscribe_message(&self, channel: ChannelType) -> Result<String> {
        let (timestamp, signature) = self
            .auth
            .sign_subscription(channel.as_str(), &self.product_ids)?;

        Ok(serde_json::to_string(&SubscribeMessage {
            kind: "subscribe",
            product_ids: &self.product_ids,
            channel: channel.as_str(),
            api_key: self.auth.api_key(),
            timestamp,
            signature,
        })?)
    }

    /// Linear backoff capped at the max delay, plus up to 25% jitter
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let delay = (self.config.reconnect_delay * attempt.clamp(1, 10)).min(self.config.max_reconnect_delay);
        let jitter_range = delay.as_millis() as u64 / 4;
        if jitter_range == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range))
    }

    /// Run the connection with automatic reconnection until shutdown or
    /// until `tx`'s receiver is dropped.
    pub async fn run(&self, tx: mpsc::Sender<String>, shutdown: ShutdownToken) -> Result<()> {
        let mut attempt: u32 = 0;

        info!(
            "Starting Coinbase WebSocket for {} on {} channel",
            self.product_ids.join(","),
            self.channel
        );

        loop {
            match self.connect_and_stream(&tx, &shutdown).await {
                Ok(StreamEnd::Shutdown) => {
                    info!("Coinbase WebSocket stopped by shutdown");
                    return Ok(());
                }
                Ok(StreamEnd::ReceiverDropped) => {
                    info!("Coinbase WebSocket consumer went away");
                    return Ok(());
                }
                Ok(StreamEnd::Closed) => {
                    info!("Coinbase WebSocket connection closed");
                    attempt = 1;
                }
                Err(PairbotError::Cancelled) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    error!("Coinbase WebSocket error (attempt {}): {}", attempt, e);
                }
            }

            let delay = self.reconnect_delay(attempt);
            info!("Reconnecting to Coinbase in {:?} (attempt {})", delay, attempt + 1);
            if shutdown.sleep(delay).await.is_err() {
                return Ok(());
            }
        }
    }

    async fn connect_and_stream(&self, tx: &mpsc::Sender<String>, shutdown: &ShutdownToken) -> Result<StreamEnd> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| PairbotError::Internal(format!("Invalid WebSocket URL: {}", e)))?;

        info!("Connecting to Coinbase WebSocket: {}", url);

        let (ws_stream, _) = shutdown
            .run(async {
                tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect_async(url.as_str()))
                    .await
                    .map_err(|_| PairbotError::Gateway("Coinbase WebSocket connection timeout".to_string()))?
                    .map_err(PairbotError::WebSocket)
            })
            .await?;

        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(self.subscribe_message(self.channel)?)).await?;
        if self.channel == ChannelType::User {
            // Keeps the user channel open while no orders change
            write
                .send(Message::Text(self.subscribe_message(ChannelType::Heartbeats)?))
                .await?;
        }
        info!("Subscribed to Coinbase {} channel", self.channel);

        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
        let stale_after = Duration::from_secs(STALE_TIMEOUT_SECS);
        let stale = tokio::time::sleep(stale_after);
        tokio::pin!(stale);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(StreamEnd::Shutdown);
                }
                _ = tx.closed() => return Ok(StreamEnd::ReceiverDropped),
                _ = &mut stale => {
                    warn!("No Coinbase frames for {:?}; reconnecting", stale_after);
                    return Ok(StreamEnd::Closed);
                }
                msg = read.next() => {
                    stale.as_mut().reset(Instant::now() + stale_after);
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(text).await.is_err() {
                                return Ok(StreamEnd::ReceiverDropped);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Received close frame from Coinbase: {:?}", frame);
                            return Ok(StreamEnd::Closed);
                        }
                        Some(Err(e)) => return Err(PairbotError::WebSocket(e)),
                        None => return Ok(StreamEnd::Closed),
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        error!("Failed to send ping: {}", e);
                        return Ok(StreamEnd::Closed);
                    }
                    debug!("Sent ping to Coinbase");
                }
            }
        }
    }
}
