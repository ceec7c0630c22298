//! Streaming LTP feed over the OpenAlgo WebSocket.
//!
//! A background task owns the socket; callers hold a cheap [`LtpStream`]
//! handle that reads from a shared last-value cache.
//!
//! ```text
//! LtpStream::spawn()
//!        │
//!        ├─► connection task: connect → authenticate → resubscribe → read loop
//!        │        └─► PriceCache (symbol → StreamTick)
//!        │
//!        └─► handle: subscribe() / last_tick() / is_connected() / shutdown()
//! ```
//!
//! # Message Format
//!
//! ```json
//! {"action": "authenticate", "api_key": "..."}
//! {"action": "subscribe", "symbol": "NIFTY02DEC2524500CE", "exchange": "NFO", "mode": 1}
//! {"type": "market_data", "symbol": "NIFTY02DEC2524500CE", "data": {"ltp": 101.5}}
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breakout_core::{ApiConfig, FeedConfig};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::broker::{StreamTick, StreamingFeed};
use crate::normalize::parse_decimal;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// LTP-only subscription mode.
const MODE_LTP: u8 = 1;

#[derive(Debug, Clone)]
pub struct LtpStreamConfig {
    pub url: String,
    pub api_key: String,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
}

impl LtpStreamConfig {
    #[must_use]
    pub fn from_config(feed: &FeedConfig, api: &ApiConfig) -> Self {
        Self {
            url: feed.url.clone(),
            api_key: api.key.clone(),
            reconnect_interval: Duration::from_secs(feed.reconnect_interval_seconds.max(1)),
            ping_interval: PING_INTERVAL,
        }
    }
}

#[derive(Error, Debug)]
enum StreamError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed: {0}")]
    Closed(String),
}

// =============================================================================
// Price Cache
// =============================================================================

/// Last value per symbol with receive and change timestamps.
#[derive(Debug, Default)]
pub struct PriceCache {
    ticks: RwLock<HashMap<String, StreamTick>>,
}

impl PriceCache {
    /// Records an update. `changed_at` only moves when the value differs.
    pub fn update(&self, symbol: &str, price: Decimal, at: Instant) {
        let mut ticks = self.ticks.write();
        match ticks.get_mut(symbol) {
            Some(tick) => {
                if tick.price != price {
                    tick.price = price;
                    tick.changed_at = at;
                }
                tick.received_at = at;
            }
            None => {
                ticks.insert(
                    symbol.to_string(),
                    StreamTick {
                        price,
                        received_at: at,
                        changed_at: at,
                    },
                );
            }
        }
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<StreamTick> {
        self.ticks.read().get(symbol).copied()
    }
}

/// Extracts `(symbol, ltp)` from a market data frame.
fn parse_ltp(text: &str) -> Option<(String, Decimal)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type").and_then(Value::as_str);
    if kind.is_some_and(|k| k != "market_data") {
        return None;
    }
    let symbol = value.get("symbol").and_then(Value::as_str)?.to_string();
    let ltp = value
        .get("data")
        .and_then(|d| d.get("ltp"))
        .or_else(|| value.get("ltp"))
        .and_then(parse_decimal)
        .filter(|p| *p > Decimal::ZERO)?;
    Some((symbol, ltp))
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Subscribe { symbol: String, exchange: String },
    Shutdown,
}

/// State shared between the handle and the connection task.
#[derive(Default)]
struct Shared {
    cache: PriceCache,
    connected: AtomicBool,
    /// symbol → exchange, replayed after every reconnect.
    subscriptions: RwLock<HashMap<String, String>>,
}

/// Handle to the streaming connection. Dropping every clone stops the task.
#[derive(Clone)]
pub struct LtpStream {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl LtpStream {
    /// Starts the connection task. Connection failures are retried forever
    /// until [`LtpStream::shutdown`].
    #[must_use]
    pub fn spawn(config: LtpStreamConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        tokio::spawn(run_connection_loop(config, Arc::clone(&shared), command_rx));
        Self { shared, command_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

impl StreamingFeed for LtpStream {
    fn subscribe(&self, symbol: &str, exchange: &str) -> bool {
        self.shared
            .subscriptions
            .write()
            .insert(symbol.to_string(), exchange.to_string());
        self.command_tx
            .send(Command::Subscribe {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
            })
            .is_ok()
    }

    fn last_tick(&self, symbol: &str) -> Option<StreamTick> {
        self.shared.cache.get(symbol)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

// =============================================================================
// Connection Loop
// =============================================================================

async fn run_connection_loop(
    config: LtpStreamConfig,
    shared: Arc<Shared>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        info!(url = %config.url, "Connecting to price stream");

        match connect_and_run(&config, &shared, &mut command_rx).await {
            Ok(()) => {
                shared.connected.store(false, Ordering::Release);
                info!("Price stream closed");
                return;
            }
            Err(e) => {
                shared.connected.store(false, Ordering::Release);
                warn!(error = %e, delay = ?config.reconnect_interval, "Price stream disconnected");
            }
        }

        // Honour shutdown while waiting; queued subscriptions are replayed on connect.
        let wait = sleep(config.reconnect_interval);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                () = &mut wait => break,
                cmd = command_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        info!("Price stream shutdown during reconnect wait");
                        return;
                    }
                    Some(Command::Subscribe { .. }) => {}
                }
            }
        }
    }
}

async fn connect_and_run(
    config: &LtpStreamConfig,
    shared: &Shared,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), StreamError> {
    let (ws, _response) = timeout(CONNECT_TIMEOUT, connect_async(config.url.as_str()))
        .await
        .map_err(|_| StreamError::Connect("timed out".to_string()))?
        .map_err(|e| StreamError::Connect(e.to_string()))?;

    let (mut write, mut read) = ws.split();

    let auth = json!({"action": "authenticate", "api_key": config.api_key});
    write.send(Message::Text(auth.to_string())).await?;

    timeout(AUTH_TIMEOUT, async {
        while let Some(msg) = read.next().await {
            if let Message::Text(text) = msg? {
                let reply: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                match reply.get("status").and_then(Value::as_str) {
                    Some("success") => return Ok(()),
                    Some("error") => {
                        let message = reply.get("message").and_then(Value::as_str).unwrap_or("rejected");
                        return Err(StreamError::Auth(message.to_string()));
                    }
                    _ => debug!(frame = %text, "Ignoring frame before authentication"),
                }
            }
        }
        Err(StreamError::Closed("closed during authentication".to_string()))
    })
    .await
    .map_err(|_| StreamError::Auth("no reply".to_string()))??;

    let pending: Vec<(String, String)> = shared
        .subscriptions
        .read()
        .iter()
        .map(|(s, e)| (s.clone(), e.clone()))
        .collect();
    for (symbol, exchange) in &pending {
        write.send(subscribe_frame(symbol, exchange)).await?;
    }

    shared.connected.store(true, Ordering::Release);
    info!(subscriptions = pending.len(), "Price stream authenticated");

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(Command::Subscribe { symbol, exchange }) => {
                    debug!(%symbol, %exchange, "Subscribing");
                    write.send(subscribe_frame(&symbol, &exchange)).await?;
                }
                Some(Command::Shutdown) | None => {
                    let _ = write.close().await;
                    return Ok(());
                }
            },

            _ = ping.tick() => {
                write.send(Message::Ping(Vec::new())).await?;
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some((symbol, ltp)) = parse_ltp(&text) {
                        shared.cache.update(&symbol, ltp, Instant::now());
                    }
                }
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    return Err(StreamError::Closed(
                        frame.map_or_else(|| "close frame".to_string(), |f| f.reason.to_string()),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::WebSocket(e)),
                None => return Err(StreamError::Closed("stream ended".to_string())),
            },
        }
    }
}

fn subscribe_frame(symbol: &str, exchange: &str) -> Message {
    Message::Text(
        json!({
            "action": "subscribe",
            "symbol": symbol,
            "exchange": exchange,
            "mode": MODE_LTP,
        })
        .to_string(),
    )
}
