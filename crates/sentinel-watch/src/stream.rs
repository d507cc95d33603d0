//! CLOB WebSocket client for live order-book and trade events.
//!
//! Maintains a persistent connection, subscribes to the monitored market
//! set, normalizes inbound messages into metrics-engine mutations, and
//! reconnects with capped exponential backoff on transport failure.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_market::{OrderBook, OrderBookLevel, Side, Trade};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::SharedEngine;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Errors that can occur on the stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Stream ended unexpectedly")]
    StreamEnded,
}

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub connect_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

/// Subscription message for one market channel.
#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    action: &'static str,
    channel: &'static str,
    market: &'a str,
}

/// Reconnect delay for the given failure count: initial * 2^attempt, capped.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    // 2^6 seconds already clears any sane cap; avoids shift overflow.
    let factor = 2u32.pow(attempt.min(6));
    initial.saturating_mul(factor).min(max)
}

/// CLOB WebSocket client.
pub struct MarketStream {
    config: StreamConfig,
    engine: SharedEngine,
    /// Monitored market ids; a change re-issues subscriptions.
    markets: watch::Receiver<Vec<String>>,
    /// Market ids whose state changed, consumed by the evaluator.
    updates: mpsc::UnboundedSender<String>,
}

impl MarketStream {
    pub fn new(
        config: StreamConfig,
        engine: SharedEngine,
        markets: watch::Receiver<Vec<String>>,
        updates: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            config,
            engine,
            markets,
            updates,
        }
    }

    /// Runs the stream with automatic reconnection until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), StreamError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.try_recv().is_ok() {
                info!("Market stream: shutdown signal received");
                return Ok(());
            }

            match self.run_session(&mut shutdown, &mut attempt).await {
                Ok(()) => {
                    info!("Market stream: clean shutdown");
                    return Ok(());
                }
                Err(e) => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.initial_reconnect_delay,
                        self.config.max_reconnect_delay,
                    );
                    attempt = attempt.saturating_add(1);
                    warn!("Market stream error: {e}, reconnecting in {delay:?}");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => {
                            info!("Market stream: shutdown during reconnect delay");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Runs a single WebSocket session until error or shutdown.
    async fn run_session(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
        attempt: &mut u32,
    ) -> Result<(), StreamError> {
        info!("Connecting to CLOB WebSocket at {}", self.config.ws_url);

        let connect_result = timeout(
            self.config.connect_timeout,
            connect_async(self.config.ws_url.as_str()),
        )
        .await;

        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(StreamError::Connection(e.to_string())),
            Err(_) => return Err(StreamError::Timeout),
        };

        info!("CLOB WebSocket connected");

        let (mut write, mut read) = ws_stream.split();

        let engine = &self.engine;
        let updates = &self.updates;
        let markets = &mut self.markets;

        let mut subscribed: HashSet<String> =
            markets.borrow_and_update().iter().cloned().collect();
        subscribe_all(&mut write, &subscribed).await?;

        // The session reached the subscribed state; backoff starts over on
        // the next failure.
        *attempt = 0;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            route_message(engine, updates, &subscribed, &text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!("CLOB WebSocket closed by server: {frame:?}");
                            return Err(StreamError::StreamEnded);
                        }
                        Some(Err(e)) => {
                            return Err(StreamError::WebSocket(e));
                        }
                        None => {
                            return Err(StreamError::StreamEnded);
                        }
                        _ => {}
                    }
                }

                changed = markets.changed() => {
                    if changed.is_err() {
                        // Sender gone; only happens on teardown.
                        return Err(StreamError::StreamEnded);
                    }
                    subscribed = markets.borrow_and_update().iter().cloned().collect();
                    info!("Monitored set changed, re-subscribing to {} markets", subscribed.len());
                    subscribe_all(&mut write, &subscribed).await?;
                }

                _ = shutdown.recv() => {
                    info!("Market stream session: shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

/// Normalize one inbound text frame and route it to the metrics engine.
async fn route_message(
    engine: &SharedEngine,
    updates: &mpsc::UnboundedSender<String>,
    subscribed: &HashSet<String>,
    text: &str,
) {
    let Some(event) = normalize_message(text, Utc::now()) else {
        return;
    };

    match event {
        StreamEvent::Book { market_id, book } => {
            if !subscribed.contains(&market_id) {
                return;
            }
            engine
                .write()
                .await
                .apply_order_book(&market_id, book, Utc::now());
            let _ = updates.send(market_id);
        }
        StreamEvent::Trade { market_id, trade } => {
            if !subscribed.contains(&market_id) {
                return;
            }
            engine
                .write()
                .await
                .apply_trades(&market_id, vec![trade], Utc::now());
            let _ = updates.send(market_id);
        }
        StreamEvent::NewMarket { market_id } => {
            info!("New market announced on stream: {market_id}");
        }
    }
}

/// Send one subscribe request per monitored market.
async fn subscribe_all(write: &mut WsSink, market_ids: &HashSet<String>) -> Result<(), StreamError> {
    for market_id in market_ids {
        let payload = SubscribeMessage {
            action: "subscribe",
            channel: "market",
            market: market_id,
        };
        let msg = serde_json::to_string(&payload)?;
        write.send(Message::Text(msg.into())).await?;
        debug!("Subscribed to market {market_id}");
    }
    Ok(())
}

/// A normalized inbound event.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Book { market_id: String, book: OrderBook },
    Trade { market_id: String, trade: Trade },
    NewMarket { market_id: String },
}

/// Generic message for detecting the type tag.
#[derive(Debug, Deserialize)]
struct TypeTag {
    #[serde(rename = "type", alias = "event")]
    tag: Option<String>,
}

/// Order-book level as either a `[price, size]` pair or an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Pair(Decimal, Decimal),
    Object { price: Decimal, size: Decimal },
}

impl From<RawLevel> for OrderBookLevel {
    fn from(raw: RawLevel) -> Self {
        match raw {
            RawLevel::Pair(price, size) => OrderBookLevel { price, size },
            RawLevel::Object { price, size } => OrderBookLevel { price, size },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawBookData {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

/// Order-book snapshot/delta form. Levels may live at the top level or
/// nested under `data`.
#[derive(Debug, Deserialize)]
struct RawBookMessage {
    #[serde(rename = "marketId", alias = "market_id")]
    market_id: Option<String>,
    #[serde(default)]
    bids: Option<Vec<RawLevel>>,
    #[serde(default)]
    asks: Option<Vec<RawLevel>>,
    #[serde(default)]
    data: Option<RawBookData>,
}

/// Best bid/ask update form; sizes default to 1.
#[derive(Debug, Deserialize)]
struct RawBestBidAsk {
    #[serde(rename = "marketId", alias = "market_id")]
    market_id: Option<String>,
    #[serde(rename = "bestBid", alias = "best_bid")]
    best_bid: Option<Decimal>,
    #[serde(rename = "bestBidSize", alias = "best_bid_size")]
    best_bid_size: Option<Decimal>,
    #[serde(rename = "bestAsk", alias = "best_ask")]
    best_ask: Option<Decimal>,
    #[serde(rename = "bestAskSize", alias = "best_ask_size")]
    best_ask_size: Option<Decimal>,
}

/// Trade form.
#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "marketId", alias = "market_id")]
    market_id: Option<String>,
    id: Option<String>,
    trade_id: Option<String>,
    price: Option<Decimal>,
    size: Option<Decimal>,
    side: Option<String>,
    timestamp: Option<Decimal>,
}

/// New-market notice form.
#[derive(Debug, Deserialize)]
struct RawNewMarket {
    #[serde(rename = "marketId", alias = "market_id")]
    market_id: Option<String>,
}

/// Classify and normalize one inbound frame. Malformed payloads are logged
/// and dropped; they never raise into the session loop.
pub(crate) fn normalize_message(text: &str, received_at: DateTime<Utc>) -> Option<StreamEvent> {
    let tag: TypeTag = match serde_json::from_str(text) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to parse stream message: {e}");
            return None;
        }
    };

    match tag.tag.as_deref() {
        Some("l2") | Some("book") => normalize_book(text),
        Some("best_bid_ask") | Some("bb") => normalize_best_bid_ask(text),
        Some("trade") => normalize_trade(text, received_at),
        Some("new_market") => {
            let msg: RawNewMarket = serde_json::from_str(text).ok()?;
            Some(StreamEvent::NewMarket {
                market_id: msg.market_id?,
            })
        }
        other => {
            debug!("Ignoring stream message type: {other:?}");
            None
        }
    }
}

fn normalize_book(text: &str) -> Option<StreamEvent> {
    let msg: RawBookMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse book message: {e}");
            return None;
        }
    };

    let market_id = msg.market_id?;
    let data = msg.data.unwrap_or_default();
    let bids = msg.bids.unwrap_or(data.bids);
    let asks = msg.asks.unwrap_or(data.asks);

    Some(StreamEvent::Book {
        market_id,
        book: OrderBook {
            bids: bids.into_iter().map(Into::into).collect(),
            asks: asks.into_iter().map(Into::into).collect(),
        },
    })
}

fn normalize_best_bid_ask(text: &str) -> Option<StreamEvent> {
    let msg: RawBestBidAsk = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse best bid/ask message: {e}");
            return None;
        }
    };

    let market_id = msg.market_id?;
    let level = |price: Option<Decimal>, size: Option<Decimal>| {
        price.map(|price| OrderBookLevel {
            price,
            size: size.unwrap_or(dec!(1)),
        })
    };

    Some(StreamEvent::Book {
        market_id,
        book: OrderBook {
            bids: level(msg.best_bid, msg.best_bid_size).into_iter().collect(),
            asks: level(msg.best_ask, msg.best_ask_size).into_iter().collect(),
        },
    })
}

fn normalize_trade(text: &str, received_at: DateTime<Utc>) -> Option<StreamEvent> {
    let msg: RawTrade = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse trade message: {e}");
            return None;
        }
    };

    let market_id = msg.market_id?;
    let (Some(price), Some(size)) = (msg.price, msg.size) else {
        warn!("Trade message for {market_id} missing price or size, dropping");
        return None;
    };

    let timestamp = timestamp_ms(msg.timestamp, received_at);
    let id = msg
        .id
        .or(msg.trade_id)
        .unwrap_or_else(|| format!("{}-{}-{}", timestamp.timestamp_millis(), price, size));

    Some(StreamEvent::Trade {
        market_id,
        trade: Trade {
            id,
            price,
            size,
            side: Side::from_tag(msg.side.as_deref()),
            timestamp,
        },
    })
}

/// Millisecond timestamp (number or numeric string) to UTC, with fallback.
pub(crate) fn timestamp_ms(raw: Option<Decimal>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|d| d.to_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(fallback)
}
