//! Anomaly scoring.
//!
//! Pure function of (metrics, thresholds) -> weighted score breakdown.
//! Each component is the ratio of an observed metric to its threshold,
//! scaled to 0-100 and clamped.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{AlertThresholds, MarketMetrics, ScoreBreakdown, ScoreCategory};

const HUNDRED: Decimal = dec!(100);

/// Boundary between Ok and Attention.
const ATTENTION_SCORE: Decimal = dec!(40);

fn ratio_score(value: Decimal, threshold: Decimal) -> Decimal {
    (value / threshold * HUNDRED).clamp(Decimal::ZERO, HUNDRED)
}

/// Compute the weighted anomaly score for a metrics snapshot.
///
/// Thresholds must be strictly positive; the config layer substitutes
/// defaults for anything else before the engine runs.
pub fn compute_score(metrics: &MarketMetrics, thresholds: &AlertThresholds) -> ScoreBreakdown {
    let spread_score = match metrics.spread {
        Some(spread) => ratio_score(spread, thresholds.spread),
        None => Decimal::ZERO,
    };

    let total_depth = metrics.depth_bid_top + metrics.depth_ask_top;
    // Inverse relationship: the thinner the book, the higher the score.
    let liquidity_score = if total_depth.is_zero() {
        HUNDRED
    } else {
        ratio_score(thresholds.liquidity, total_depth)
    };

    let imbalance_score = ratio_score(metrics.imbalance.abs(), thresholds.imbalance);
    let noise_score = ratio_score(metrics.volatility_short, thresholds.noise);
    let activity_score = ratio_score(metrics.volume_growth, thresholds.activity);

    let final_score = (dec!(0.25) * spread_score
        + dec!(0.25) * liquidity_score
        + dec!(0.20) * imbalance_score
        + dec!(0.15) * noise_score
        + dec!(0.15) * activity_score)
        .clamp(Decimal::ZERO, HUNDRED);

    let category = if final_score >= thresholds.suspect_score {
        ScoreCategory::Suspect
    } else if final_score >= ATTENTION_SCORE {
        ScoreCategory::Attention
    } else {
        ScoreCategory::Ok
    };

    ScoreBreakdown {
        spread_score,
        liquidity_score,
        imbalance_score,
        noise_score,
        activity_score,
        final_score,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfidenceLabel;

    fn metrics() -> MarketMetrics {
        MarketMetrics {
            p_market: Some(dec!(0.5)),
            p_adjusted: Some(dec!(0.48)),
            confidence: dec!(0.3),
            confidence_label: ConfidenceLabel::Low,
            spread: Some(dec!(0.2)),
            depth_bid_top: dec!(50),
            depth_ask_top: dec!(60),
            imbalance: dec!(0.25),
            volatility_short: dec!(0.3),
            trades_per_min: dec!(1),
            volume_per_min: dec!(10),
            volume_growth: dec!(1),
        }
    }

    #[test]
    fn test_suspect_classification() {
        let score = compute_score(&metrics(), &AlertThresholds::default());
        assert!(score.final_score >= dec!(70));
        assert_eq!(score.category, ScoreCategory::Suspect);
    }

    #[test]
    fn test_component_scores() {
        let score = compute_score(&metrics(), &AlertThresholds::default());
        // spread 0.2 / 0.05 -> clamped at 100.
        assert_eq!(score.spread_score, dec!(100));
        // liquidity 500 / 110 -> clamped at 100.
        assert_eq!(score.liquidity_score, dec!(100));
        // |0.25| / 0.35 * 100.
        assert!((score.imbalance_score - dec!(71.428571)).abs() < dec!(0.001));
        // 0.3 / 0.25 -> clamped at 100.
        assert_eq!(score.noise_score, dec!(100));
        // 1 / 0.3 -> clamped at 100.
        assert_eq!(score.activity_score, dec!(100));
    }

    #[test]
    fn test_quiet_market_is_ok() {
        let quiet = MarketMetrics {
            spread: Some(dec!(0.01)),
            depth_bid_top: dec!(800),
            depth_ask_top: dec!(800),
            imbalance: Decimal::ZERO,
            volatility_short: dec!(0.01),
            volume_growth: dec!(0.1),
            ..metrics()
        };
        let score = compute_score(&quiet, &AlertThresholds::default());
        assert_eq!(score.category, ScoreCategory::Ok);
        assert!(score.final_score < dec!(40));
    }

    #[test]
    fn test_empty_book_maxes_liquidity_score() {
        let empty = MarketMetrics {
            p_market: None,
            p_adjusted: None,
            spread: None,
            depth_bid_top: Decimal::ZERO,
            depth_ask_top: Decimal::ZERO,
            ..metrics()
        };
        let score = compute_score(&empty, &AlertThresholds::default());
        assert_eq!(score.spread_score, Decimal::ZERO);
        assert_eq!(score.liquidity_score, dec!(100));
    }

    #[test]
    fn test_attention_band() {
        let mild = MarketMetrics {
            spread: Some(dec!(0.04)),
            depth_bid_top: dec!(200),
            depth_ask_top: dec!(200),
            imbalance: dec!(0.1),
            volatility_short: dec!(0.05),
            volume_growth: dec!(0.2),
            ..metrics()
        };
        let score = compute_score(&mild, &AlertThresholds::default());
        // spread 80, liquidity 100 (500/400=125 clamped), imbalance ~28.6,
        // noise 20, activity ~66.7 -> final ~63.7.
        assert_eq!(score.category, ScoreCategory::Attention);
    }
}
