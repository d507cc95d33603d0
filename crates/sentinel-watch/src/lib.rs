//! Polymarket surveillance bot.
//!
//! Watches discovered markets over the CLOB WebSocket and the Data-API
//! polling fallback, feeds the shared metrics engine, and drives throttled
//! Discord alerting.

use std::sync::Arc;

use sentinel_market::MetricsEngine;
use tokio::sync::RwLock;

pub mod cache;
pub mod config;
pub mod discovery;
pub mod notify;
pub mod poller;
pub mod stream;

/// Metrics engine shared between the stream, the poller and the evaluator.
pub type SharedEngine = Arc<RwLock<MetricsEngine>>;
