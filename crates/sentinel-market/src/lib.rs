//! Shared domain logic for the Polymarket sentinel.
//!
//! This crate contains:
//! - Common types (Market, OrderBook, Trade, MarketMetrics, ScoreBreakdown)
//! - The rolling-window metrics engine
//! - The pure anomaly scoring function
//! - The alert cooldown policy
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod alerts;
pub mod engine;
pub mod score;
pub mod types;

pub use alerts::{AlertKind, AlertPolicy};
pub use engine::{EngineConfig, MetricsEngine};
pub use score::compute_score;
pub use types::*;
