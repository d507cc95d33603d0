//! Shared types for the Polymarket sentinel.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A market instrument supplied by discovery.
///
/// The id is opaque and case-sensitive; the core only keys state by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    /// Display question/title for notifications.
    pub question: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse a side tag, defaulting to Buy for absent or unrecognized values.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(s) if s.eq_ignore_ascii_case("sell") => Side::Sell,
            _ => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// A single order-book price level. Price is a probability in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Two-sided order book: bids descending by price, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    /// Best bid price, if any bids are present.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price, if any asks are present.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price: average of best bid/ask, the single side if only one is
    /// present, None for an empty book.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / dec!(2)),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }

    /// Best ask minus best bid; None unless both sides are non-empty.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Sum of bid sizes across the retained levels.
    pub fn bid_depth(&self) -> Decimal {
        self.bids.iter().map(|l| l.size).sum()
    }

    /// Sum of ask sizes across the retained levels.
    pub fn ask_depth(&self) -> Decimal {
        self.asks.iter().map(|l| l.size).sum()
    }
}

/// An executed trade. Ids are unique per market; duplicates are absorbed
/// by the engine without double counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

/// A mid-price sample, recorded whenever the mid changes.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Confidence label for the adjusted probability estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

impl ConfidenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLabel::Low => "low",
            ConfidenceLabel::Medium => "medium",
            ConfidenceLabel::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived per-market metrics, recomputed on demand and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct MarketMetrics {
    /// Mid price of the current book, if any side is present.
    pub p_market: Option<Decimal>,
    /// Probability estimate adjusted for spread and depth.
    pub p_adjusted: Option<Decimal>,
    /// Confidence in the adjusted probability, in [0, 1].
    pub confidence: Decimal,
    pub confidence_label: ConfidenceLabel,
    pub spread: Option<Decimal>,
    /// Bid depth summed over the retained top-N levels.
    pub depth_bid_top: Decimal,
    /// Ask depth summed over the retained top-N levels.
    pub depth_ask_top: Decimal,
    /// (bid depth - ask depth) / total depth, in [-1, 1]; 0 for an empty book.
    pub imbalance: Decimal,
    /// Population std-dev of mid samples over the trailing 5 minutes.
    pub volatility_short: Decimal,
    /// Trades per minute over the trailing 5 minutes.
    pub trades_per_min: Decimal,
    /// Notional volume per minute over the trailing 5 minutes.
    pub volume_per_min: Decimal,
    /// 5-minute volume rate vs one-sixth of the 30-minute rate.
    pub volume_growth: Decimal,
}

/// Score category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreCategory {
    Ok,
    Attention,
    Suspect,
}

impl ScoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCategory::Ok => "OK",
            ScoreCategory::Attention => "Attention",
            ScoreCategory::Suspect => "Suspect",
        }
    }
}

impl std::fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Weighted anomaly score derived from a metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub spread_score: Decimal,
    pub liquidity_score: Decimal,
    pub imbalance_score: Decimal,
    pub noise_score: Decimal,
    pub activity_score: Decimal,
    /// Weighted final score in [0, 100].
    pub final_score: Decimal,
    pub category: ScoreCategory,
}

/// Alert thresholds, each a positive numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub spread: Decimal,
    pub liquidity: Decimal,
    pub imbalance: Decimal,
    pub noise: Decimal,
    pub activity: Decimal,
    pub suspect_score: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            spread: dec!(0.05),
            liquidity: dec!(500),
            imbalance: dec!(0.35),
            noise: dec!(0.25),
            activity: dec!(0.3),
            suspect_score: dec!(70),
        }
    }
}

impl AlertThresholds {
    /// True when every threshold is strictly positive.
    pub fn is_valid(&self) -> bool {
        self.spread > Decimal::ZERO
            && self.liquidity > Decimal::ZERO
            && self.imbalance > Decimal::ZERO
            && self.noise > Decimal::ZERO
            && self.activity > Decimal::ZERO
            && self.suspect_score > Decimal::ZERO
    }
}
