//! Rolling-window metrics engine.
//!
//! Maintains per-market state (normalized order book, mid-price history,
//! deduplicated trade log) and derives liquidity/volatility/activity metrics
//! on demand. All methods take explicit timestamps so the sliding windows are
//! testable without wall-clock time; the `*_now` variants are the runtime
//! entry points.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::types::{
    ConfidenceLabel, MarketMetrics, OrderBook, OrderBookLevel, PricePoint, Trade,
};

/// Trailing window for the short-term volatility estimate.
const SHORT_WINDOW_MIN: i64 = 5;

/// Retention window for price history and trades.
const LONG_WINDOW_MIN: i64 = 30;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of price levels retained per book side.
    pub top_depth_levels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_depth_levels: 10,
        }
    }
}

/// Per-market state: one order book, price history, trade log plus id set.
///
/// Created lazily on first reference and never evicted; memory is bounded by
/// the 30-minute pruning of history and trades.
#[derive(Debug, Default)]
struct MarketState {
    order_book: OrderBook,
    price_history: Vec<PricePoint>,
    trades: Vec<Trade>,
    trade_ids: HashSet<String>,
}

impl MarketState {
    fn prune_history(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(LONG_WINDOW_MIN);
        self.price_history.retain(|p| p.timestamp >= cutoff);
    }

    /// Drops trades older than the retention window and rebuilds the dedup
    /// id set from the survivors so it cannot grow unbounded.
    fn prune_trades(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(LONG_WINDOW_MIN);
        self.trades.retain(|t| t.timestamp >= cutoff);
        self.trade_ids = self.trades.iter().map(|t| t.id.clone()).collect();
    }
}

/// Stateful metrics engine keyed by market id.
#[derive(Debug, Default)]
pub struct MetricsEngine {
    config: EngineConfig,
    state: HashMap<String, MarketState>,
}

impl MetricsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    /// Get-or-create the state for a market.
    fn state_mut(&mut self, market_id: &str) -> &mut MarketState {
        self.state
            .entry(market_id.to_string())
            .or_default()
    }

    /// Replace the stored book with the sorted/truncated form, record a mid
    /// price sample when one exists, then prune.
    pub fn apply_order_book(&mut self, market_id: &str, book: OrderBook, now: DateTime<Utc>) {
        let top = self.config.top_depth_levels;
        let state = self.state_mut(market_id);
        state.order_book = normalize_book(book, top);

        if let Some(mid) = state.order_book.mid() {
            state.price_history.push(PricePoint {
                price: mid,
                timestamp: now,
            });
        }
        state.prune_history(now);
    }

    /// Absorb trades idempotently. Duplicate ids (from either source) are
    /// skipped; each accepted trade records a mid-price sample at the current
    /// book mid, falling back to the trade's own price.
    pub fn apply_trades(&mut self, market_id: &str, trades: Vec<Trade>, now: DateTime<Utc>) {
        let state = self.state_mut(market_id);
        for trade in trades {
            if !state.trade_ids.insert(trade.id.clone()) {
                continue;
            }
            let price = state.order_book.mid().unwrap_or(trade.price);
            state.price_history.push(PricePoint {
                price,
                timestamp: trade.timestamp,
            });
            state.trades.push(trade);
        }
        state.prune_history(now);
        state.prune_trades(now);
    }

    /// Compute the metrics snapshot for a market at `now`. Prunes first, so
    /// nothing older than the retention window contributes.
    pub fn snapshot_at(&mut self, market_id: &str, now: DateTime<Utc>) -> MarketMetrics {
        let state = self.state_mut(market_id);
        state.prune_history(now);
        state.prune_trades(now);

        let book = &state.order_book;
        let mid = book.mid();
        let spread = book.spread();

        let depth_bid_top = book.bid_depth();
        let depth_ask_top = book.ask_depth();
        let total_depth = depth_bid_top + depth_ask_top;
        let imbalance = if total_depth.is_zero() {
            Decimal::ZERO
        } else {
            (depth_bid_top - depth_ask_top) / total_depth
        };

        let volatility_short = volatility(&state.price_history, SHORT_WINDOW_MIN, now);

        let (trades_per_min, volume_per_min) = rate_over(&state.trades, SHORT_WINDOW_MIN, now);
        let (_, volume_long) = rate_over(&state.trades, LONG_WINDOW_MIN, now);
        // 5m rate vs one-sixth of the 30m rate; any recent volume counts as
        // growth when the long window is empty. Downstream thresholds are
        // calibrated against this exact formula.
        let volume_growth = if volume_long.is_zero() {
            volume_per_min
        } else {
            volume_per_min / (volume_long / dec!(6))
        };

        let (p_adjusted, confidence, confidence_label) =
            adjusted_probability(mid, spread, total_depth);

        MarketMetrics {
            p_market: mid,
            p_adjusted,
            confidence,
            confidence_label,
            spread,
            depth_bid_top,
            depth_ask_top,
            imbalance,
            volatility_short,
            trades_per_min,
            volume_per_min,
            volume_growth,
        }
    }

    /// Snapshot at the current wall-clock time.
    pub fn snapshot(&mut self, market_id: &str) -> MarketMetrics {
        self.snapshot_at(market_id, Utc::now())
    }
}

/// Sort each side (bids descending, asks ascending) and keep the N most
/// competitive levels.
fn normalize_book(mut book: OrderBook, top: usize) -> OrderBook {
    book.bids.sort_by(|a, b| b.price.cmp(&a.price));
    book.asks.sort_by(|a, b| a.price.cmp(&b.price));
    book.bids.truncate(top);
    book.asks.truncate(top);
    book
}

/// Population standard deviation of mid samples within the trailing window;
/// 0 with fewer than 2 samples.
fn volatility(history: &[PricePoint], window_min: i64, now: DateTime<Utc>) -> Decimal {
    let cutoff = now - Duration::minutes(window_min);
    let windowed: Vec<Decimal> = history
        .iter()
        .filter(|p| p.timestamp >= cutoff)
        .map(|p| p.price)
        .collect();
    if windowed.len() < 2 {
        return Decimal::ZERO;
    }
    let n = Decimal::from(windowed.len());
    let mean = windowed.iter().copied().sum::<Decimal>() / n;
    let variance = windowed
        .iter()
        .map(|p| (*p - mean) * (*p - mean))
        .sum::<Decimal>()
        / n;
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

/// Trade count and notional volume within the trailing window, each
/// normalized to a per-minute rate.
fn rate_over(trades: &[Trade], window_min: i64, now: DateTime<Utc>) -> (Decimal, Decimal) {
    let cutoff = now - Duration::minutes(window_min);
    let minutes = Decimal::from(window_min);
    let mut count = 0usize;
    let mut volume = Decimal::ZERO;
    for trade in trades.iter().filter(|t| t.timestamp >= cutoff) {
        count += 1;
        volume += (trade.price * trade.size).abs();
    }
    (Decimal::from(count) / minutes, volume / minutes)
}

/// Adjusted probability and confidence from mid, spread and total depth.
///
/// A wide spread discounts the estimate toward uncertainty; thin depth pulls
/// it slightly toward the extremes of the current mid.
fn adjusted_probability(
    mid: Option<Decimal>,
    spread: Option<Decimal>,
    total_depth: Decimal,
) -> (Option<Decimal>, Decimal, ConfidenceLabel) {
    let Some(mid) = mid else {
        return (None, Decimal::ZERO, ConfidenceLabel::Low);
    };

    let spread_penalty = match spread {
        Some(s) => (s / dec!(0.1)).min(Decimal::ONE),
        None => dec!(0.2),
    };
    let depth_boost = (total_depth / dec!(1000)).min(Decimal::ONE);
    let confidence = (dec!(0.2) + dec!(0.6) * depth_boost - dec!(0.3) * spread_penalty)
        .clamp(Decimal::ZERO, Decimal::ONE);
    let adjusted = mid * (Decimal::ONE - spread_penalty * dec!(0.2))
        + (mid - dec!(0.5)) * dec!(0.05) * (Decimal::ONE - depth_boost);

    let label = if confidence > dec!(0.66) {
        ConfidenceLabel::High
    } else if confidence > dec!(0.33) {
        ConfidenceLabel::Medium
    } else {
        ConfidenceLabel::Low
    };

    (Some(adjusted), confidence, label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn level(price: Decimal, size: Decimal) -> OrderBookLevel {
        OrderBookLevel { price, size }
    }

    fn trade(id: &str, price: Decimal, size: Decimal, timestamp: DateTime<Utc>) -> Trade {
        Trade {
            id: id.to_string(),
            price,
            size,
            side: Side::Buy,
            timestamp,
        }
    }

    fn sample_book() -> OrderBook {
        OrderBook {
            bids: vec![level(dec!(0.45), dec!(100)), level(dec!(0.44), dec!(50))],
            asks: vec![level(dec!(0.55), dec!(100)), level(dec!(0.56), dec!(50))],
        }
    }

    #[test]
    fn test_snapshot_mid_spread_imbalance() {
        let mut engine = MetricsEngine::new(EngineConfig {
            top_depth_levels: 3,
        });
        let now = Utc::now();
        engine.apply_order_book("m1", sample_book(), now);

        let metrics = engine.snapshot_at("m1", now);
        assert_eq!(metrics.p_market, Some(dec!(0.50)));
        assert_eq!(metrics.spread, Some(dec!(0.10)));
        assert_eq!(metrics.imbalance, Decimal::ZERO);
        assert_eq!(metrics.depth_bid_top, dec!(150));
        assert_eq!(metrics.depth_ask_top, dec!(150));
    }

    #[test]
    fn test_book_sorted_and_truncated() {
        let mut engine = MetricsEngine::new(EngineConfig {
            top_depth_levels: 2,
        });
        let now = Utc::now();
        // Unsorted input with three levels per side; only the two most
        // competitive survive.
        let book = OrderBook {
            bids: vec![
                level(dec!(0.43), dec!(300)),
                level(dec!(0.45), dec!(100)),
                level(dec!(0.44), dec!(200)),
            ],
            asks: vec![
                level(dec!(0.57), dec!(300)),
                level(dec!(0.55), dec!(100)),
                level(dec!(0.56), dec!(200)),
            ],
        };
        engine.apply_order_book("m1", book, now);

        let metrics = engine.snapshot_at("m1", now);
        assert_eq!(metrics.depth_bid_top, dec!(300));
        assert_eq!(metrics.depth_ask_top, dec!(300));
        assert_eq!(metrics.p_market, Some(dec!(0.50)));
    }

    #[test]
    fn test_trade_dedup() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.apply_trades(
            "m2",
            vec![
                trade("t1", dec!(0.6), dec!(50), now),
                trade("t1", dec!(0.6), dec!(50), now),
                trade("t2", dec!(0.62), dec!(25), now),
            ],
            now,
        );

        let metrics = engine.snapshot_at("m2", now);
        // Two distinct trades over 5 minutes.
        assert_eq!(metrics.trades_per_min, dec!(0.4));
        // (0.6*50 + 0.62*25) / 5
        assert_eq!(metrics.volume_per_min, dec!(9.1));
    }

    #[test]
    fn test_duplicate_across_calls() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.apply_trades("m2", vec![trade("t1", dec!(0.6), dec!(50), now)], now);
        engine.apply_trades("m2", vec![trade("t1", dec!(0.6), dec!(50), now)], now);

        let metrics = engine.snapshot_at("m2", now);
        assert_eq!(metrics.trades_per_min, dec!(0.2));
    }

    #[test]
    fn test_trades_per_min_bounds() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        let trades = vec![
            trade("a", dec!(0.5), dec!(10), now),
            trade("b", dec!(0.5), dec!(10), now),
            trade("c", dec!(0.5), dec!(10), now),
        ];
        engine.apply_trades("m3", trades, now);

        let metrics = engine.snapshot_at("m3", now);
        assert!(metrics.trades_per_min > Decimal::ZERO);
        assert!(metrics.trades_per_min < dec!(5));
        assert_eq!(metrics.trades_per_min, dec!(0.6));
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.apply_order_book("m1", sample_book(), now);
        engine.apply_trades("m1", vec![trade("t1", dec!(0.5), dec!(20), now)], now);

        let first = engine.snapshot_at("m1", now);
        let second = engine.snapshot_at("m1", now);
        assert_eq!(first.p_market, second.p_market);
        assert_eq!(first.volatility_short, second.volatility_short);
        assert_eq!(first.trades_per_min, second.trades_per_min);
        assert_eq!(first.volume_growth, second.volume_growth);
    }

    #[test]
    fn test_pruning_drops_old_trades() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        let old = now - Duration::minutes(31);
        engine.apply_trades("m4", vec![trade("old", dec!(0.5), dec!(100), old)], old);
        engine.apply_trades("m4", vec![trade("new", dec!(0.5), dec!(10), now)], now);

        let metrics = engine.snapshot_at("m4", now);
        // Only the fresh trade contributes: 0.5*10/5.
        assert_eq!(metrics.volume_per_min, dec!(1.0));
        assert_eq!(metrics.trades_per_min, dec!(0.2));
    }

    #[test]
    fn test_pruned_trade_id_can_reappear() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let t0 = Utc::now();
        engine.apply_trades("m5", vec![trade("t1", dec!(0.5), dec!(10), t0)], t0);

        // After the retention window passes, the id set is rebuilt and the
        // same id counts again.
        let later = t0 + Duration::minutes(31);
        engine.apply_trades("m5", vec![trade("t1", dec!(0.5), dec!(10), later)], later);

        let metrics = engine.snapshot_at("m5", later);
        assert_eq!(metrics.trades_per_min, dec!(0.2));
    }

    #[test]
    fn test_volatility_needs_two_samples() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.apply_order_book("m6", sample_book(), now);

        let metrics = engine.snapshot_at("m6", now);
        assert_eq!(metrics.volatility_short, Decimal::ZERO);
    }

    #[test]
    fn test_volatility_from_mid_changes() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        let book_at = |bid: Decimal, ask: Decimal| OrderBook {
            bids: vec![level(bid, dec!(100))],
            asks: vec![level(ask, dec!(100))],
        };
        engine.apply_order_book("m7", book_at(dec!(0.40), dec!(0.44)), now - Duration::minutes(2));
        engine.apply_order_book("m7", book_at(dec!(0.48), dec!(0.52)), now - Duration::minutes(1));

        let metrics = engine.snapshot_at("m7", now);
        // Samples 0.42 and 0.50: population std-dev is 0.04.
        assert!((metrics.volatility_short - dec!(0.04)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_volume_growth_recent_only() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.apply_trades("m8", vec![trade("t1", dec!(0.5), dec!(60), now)], now);

        let metrics = engine.snapshot_at("m8", now);
        // 5m rate = 6/min, 30m rate = 1/min; growth = 6 / (1/6) = 36.
        assert_eq!(metrics.volume_per_min, dec!(6));
        assert_eq!(metrics.volume_growth, dec!(36));
    }

    #[test]
    fn test_trade_mid_fallback_price_point() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        // No book yet: the trade's own price seeds the history.
        engine.apply_trades(
            "m9",
            vec![
                trade("t1", dec!(0.30), dec!(10), now - Duration::minutes(1)),
                trade("t2", dec!(0.40), dec!(10), now),
            ],
            now,
        );

        let metrics = engine.snapshot_at("m9", now);
        // Two samples 0.30/0.40: std-dev 0.05.
        assert!((metrics.volatility_short - dec!(0.05)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_confidence_no_mid() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        let metrics = engine.snapshot_at("empty", now);
        assert_eq!(metrics.p_market, None);
        assert_eq!(metrics.p_adjusted, None);
        assert_eq!(metrics.confidence, Decimal::ZERO);
        assert_eq!(metrics.confidence_label, ConfidenceLabel::Low);
    }

    #[test]
    fn test_confidence_deep_tight_book() {
        let mut engine = MetricsEngine::new(EngineConfig::default());
        let now = Utc::now();
        let book = OrderBook {
            bids: vec![level(dec!(0.49), dec!(600))],
            asks: vec![level(dec!(0.51), dec!(600))],
        };
        engine.apply_order_book("m10", book, now);

        let metrics = engine.snapshot_at("m10", now);
        // spread_penalty = 0.02/0.1 = 0.2, depth_boost = 1.2 -> 1:
        // confidence = 0.2 + 0.6 - 0.06 = 0.74.
        assert_eq!(metrics.confidence, dec!(0.74));
        assert_eq!(metrics.confidence_label, ConfidenceLabel::High);
        // adjusted = 0.5 * (1 - 0.2*0.2) + 0 = 0.48.
        assert_eq!(metrics.p_adjusted, Some(dec!(0.48)));
    }
}
