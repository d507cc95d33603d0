//! Data-API trade poller.
//!
//! Lower-frequency gap-filling source: on a fixed interval it fetches recent
//! trades for each monitored market and feeds them into the same metrics
//! path as the stream. Trade-id dedup in the engine absorbs the overlap.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use sentinel_market::{Side, Trade};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::stream::timestamp_ms;
use crate::SharedEngine;

/// Maximum trades requested per market per cycle.
const TRADE_LIMIT: usize = 200;

/// Errors for a single market fetch.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Data API responded {0}")]
    Status(reqwest::StatusCode),
}

/// Configuration for the trade poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub data_api_base_url: String,
    /// Already floored at 60s by the config layer.
    pub poll_interval: Duration,
    pub max_markets: usize,
}

/// Polling fallback client.
pub struct TradePoller {
    config: PollerConfig,
    http: Client,
    engine: SharedEngine,
    markets: watch::Receiver<Vec<String>>,
}

impl TradePoller {
    pub fn new(
        config: PollerConfig,
        engine: SharedEngine,
        markets: watch::Receiver<Vec<String>>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http,
            engine,
            markets,
        }
    }

    /// Runs the poll loop until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Starting trade poller with {}s interval",
            self.config.poll_interval.as_secs()
        );
        let mut timer = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.poll_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Trade poller received shutdown signal");
                    return;
                }
            }
        }
    }

    /// One cycle over the monitored markets. Per-market failures are logged
    /// and skipped without aborting the rest of the cycle.
    async fn poll_cycle(&self) {
        let market_ids: Vec<String> = self
            .markets
            .borrow()
            .iter()
            .take(self.config.max_markets)
            .cloned()
            .collect();

        for market_id in market_ids {
            match self.fetch_trades(&market_id).await {
                Ok(trades) => {
                    let count = trades.len();
                    self.engine
                        .write()
                        .await
                        .apply_trades(&market_id, trades, Utc::now());
                    debug!("Polled {count} trades for market {market_id}");
                }
                Err(e) => {
                    warn!("Trade poll failed for market {market_id}: {e}");
                }
            }
        }
    }

    /// Fetch recent trades for one market.
    async fn fetch_trades(&self, market_id: &str) -> Result<Vec<Trade>, PollError> {
        let url = format!(
            "{}/trades?market={}&limit={}",
            self.config.data_api_base_url, market_id, TRADE_LIMIT
        );
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PollError::Status(response.status()));
        }
        let body: TradesResponse = response.json().await?;
        Ok(parse_trades(body, Utc::now()))
    }
}

/// Data-API trades response: either a bare array or wrapped under `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TradesResponse {
    Wrapped { data: Vec<RawPollTrade> },
    Bare(Vec<RawPollTrade>),
}

/// Trade-like record with the same field tolerance as the stream form.
#[derive(Debug, Deserialize)]
struct RawPollTrade {
    id: Option<String>,
    transaction_hash: Option<String>,
    price: Option<Decimal>,
    size: Option<Decimal>,
    amount: Option<Decimal>,
    side: Option<String>,
    timestamp: Option<Decimal>,
    time: Option<Decimal>,
}

/// Normalize the response into trades, dropping records without numerics.
fn parse_trades(response: TradesResponse, received_at: DateTime<Utc>) -> Vec<Trade> {
    let records = match response {
        TradesResponse::Wrapped { data } => data,
        TradesResponse::Bare(records) => records,
    };

    records
        .into_iter()
        .filter_map(|raw| {
            let price = raw.price?;
            let size = raw.size.or(raw.amount)?;
            let timestamp = timestamp_ms(raw.timestamp.or(raw.time), received_at);
            let id = raw.id.or_else(|| {
                raw.transaction_hash
                    .map(|hash| format!("{hash}-{price}-{size}"))
            })?;
            Some(Trade {
                id,
                price,
                size,
                side: Side::from_tag(raw.side.as_deref()),
                timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse_json(json: &str, received_at: DateTime<Utc>) -> Vec<Trade> {
        let response: TradesResponse = serde_json::from_str(json).unwrap();
        parse_trades(response, received_at)
    }

    #[test]
    fn test_parse_bare_array() {
        let now = Utc::now();
        let json = r#"[
            {"id": "t1", "price": "0.55", "size": "20", "side": "sell", "timestamp": 1704067200000},
            {"id": "t2", "price": 0.56, "size": 10}
        ]"#;

        let trades = parse_json(json, now);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id, "t1");
        assert_eq!(trades[0].price, dec!(0.55));
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[1].side, Side::Buy);
        assert_eq!(trades[1].timestamp, now);
    }

    #[test]
    fn test_parse_wrapped_with_aliases() {
        let now = Utc::now();
        let json = r#"{"data": [
            {"transaction_hash": "0xabc", "price": 0.4, "amount": 5, "time": 1704067200000}
        ]}"#;

        let trades = parse_json(json, now);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "0xabc-0.4-5");
        assert_eq!(trades[0].size, dec!(5));
        assert_eq!(trades[0].timestamp.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_parse_skips_incomplete_records() {
        let now = Utc::now();
        let json = r#"[
            {"id": "no-price", "size": 10},
            {"id": "ok", "price": 0.5, "size": 10},
            {"price": 0.5, "size": 10}
        ]"#;

        let trades = parse_json(json, now);
        // The record without a price and the one without any id are dropped.
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "ok");
    }
}
