//! Alert cooldown policy.
//!
//! Stateful gate between scoring and notification: decides, per market and
//! alert kind, whether a newly computed score should actually notify.
//! New-market notifications are driven by discovery and bypass this policy.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{AlertThresholds, MarketMetrics, ScoreBreakdown};

/// Volume growth ratio at which a volume-spike alert is considered.
const VOLUME_SPIKE_GROWTH: Decimal = dec!(2);

/// Alert kinds, each with its own cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Final score crossed the suspect threshold.
    SuspectScore,
    /// Short-window volume running well ahead of the trailing baseline.
    VolumeSpike,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SuspectScore => "suspect_score",
            AlertKind::VolumeSpike => "volume_spike",
        }
    }

    /// Minimum time between two alerts of this kind for the same market.
    pub fn cooldown(&self) -> Duration {
        match self {
            AlertKind::SuspectScore => Duration::minutes(15),
            AlertKind::VolumeSpike => Duration::minutes(10),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cooldown/dedup gate. Last-sent timestamps are recorded per
/// (market, kind) and only mutated when a kind actually fires.
#[derive(Debug, Default)]
pub struct AlertPolicy {
    last_sent: HashMap<(String, AlertKind), DateTime<Utc>>,
}

impl AlertPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a scored snapshot and return the alert kinds that fire now.
    ///
    /// Firing a kind records its timestamp before returning, so repeated
    /// evaluations within the same tick cannot double-fire.
    pub fn evaluate(
        &mut self,
        market_id: &str,
        metrics: &MarketMetrics,
        score: &ScoreBreakdown,
        thresholds: &AlertThresholds,
        now: DateTime<Utc>,
    ) -> Vec<AlertKind> {
        let mut fired = Vec::new();

        if score.final_score >= thresholds.suspect_score
            && self.try_fire(market_id, AlertKind::SuspectScore, now)
        {
            fired.push(AlertKind::SuspectScore);
        }

        if metrics.volume_growth >= VOLUME_SPIKE_GROWTH
            && metrics.trades_per_min > Decimal::ZERO
            && self.try_fire(market_id, AlertKind::VolumeSpike, now)
        {
            fired.push(AlertKind::VolumeSpike);
        }

        fired
    }

    /// Record the kind as sent if it is out of cooldown; returns whether it
    /// fired.
    fn try_fire(&mut self, market_id: &str, kind: AlertKind, now: DateTime<Utc>) -> bool {
        let key = (market_id.to_string(), kind);
        if let Some(last) = self.last_sent.get(&key) {
            if now - *last <= kind.cooldown() {
                return false;
            }
        }
        self.last_sent.insert(key, now);
        true
    }
}
