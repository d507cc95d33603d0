//! Discord webhook notifier.
//!
//! Renders metrics and scores into a single embed per alert. Dry-run mode
//! (or a missing webhook URL) logs the alert instead of posting. Delivery is
//! at-most-once: webhook failures are logged and never retried.

use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_market::{Market, MarketMetrics, ScoreBreakdown, ScoreCategory};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

/// Embed accent colors.
const COLOR_SUSPECT: u32 = 15158332;
const COLOR_ATTENTION: u32 = 16776960;
const COLOR_OK: u32 = 3066993;

#[derive(Debug, Error)]
enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook responded {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Discord webhook client.
pub struct Notifier {
    webhook_url: Option<String>,
    dry_run: bool,
    http: Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, dry_run: bool) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            webhook_url,
            dry_run,
            http,
        }
    }

    /// Send one alert embed for a market.
    pub async fn send_alert(
        &self,
        title: &str,
        market: &Market,
        metrics: &MarketMetrics,
        score: &ScoreBreakdown,
        category: &str,
    ) {
        let embed = build_embed(title, market, metrics, score, category);
        self.dispatch(&market.id, title, embed).await;
    }

    /// Send a plain text summary embed.
    pub async fn send_summary(&self, title: &str, body: &str) {
        let embed = json!({
            "title": title,
            "description": body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "color": COLOR_OK,
        });
        self.dispatch("summary", title, embed).await;
    }

    async fn dispatch(&self, market_id: &str, title: &str, embed: Value) {
        let Some(url) = self.webhook_url.as_deref().filter(|_| !self.dry_run) else {
            info!("DRY RUN - alert: {embed}");
            return;
        };

        match self.post(url, embed).await {
            Ok(()) => info!("Alert sent to Discord: {market_id} {title}"),
            Err(e) => error!("Discord webhook failed: {e}"),
        }
    }

    async fn post(&self, url: &str, embed: Value) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(url)
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }
}

/// Percentage rendering for nullable probabilities.
fn percent_or_na(value: Option<Decimal>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * dec!(100)),
        None => "N/A".to_string(),
    }
}

fn decimal_or_na(value: Option<Decimal>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "N/A".to_string(),
    }
}

fn build_embed(
    title: &str,
    market: &Market,
    metrics: &MarketMetrics,
    score: &ScoreBreakdown,
    category: &str,
) -> Value {
    let color = match score.category {
        ScoreCategory::Suspect => COLOR_SUSPECT,
        ScoreCategory::Attention => COLOR_ATTENTION,
        ScoreCategory::Ok => COLOR_OK,
    };

    json!({
        "title": format!("{title} | {category}"),
        "url": market.url,
        "description": market.question,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "fields": [
            { "name": "Market prob.", "value": percent_or_na(metrics.p_market), "inline": true },
            { "name": "Adjusted prob.", "value": percent_or_na(metrics.p_adjusted), "inline": true },
            { "name": "Confidence", "value": metrics.confidence_label.as_str(), "inline": true },
            { "name": "Spread", "value": decimal_or_na(metrics.spread), "inline": true },
            { "name": "Depth bid topN", "value": format!("{:.2}", metrics.depth_bid_top), "inline": true },
            { "name": "Depth ask topN", "value": format!("{:.2}", metrics.depth_ask_top), "inline": true },
            { "name": "Imbalance", "value": format!("{:.3}", metrics.imbalance), "inline": true },
            { "name": "Trades/min", "value": format!("{:.2}", metrics.trades_per_min), "inline": true },
            { "name": "Volume/min", "value": format!("{:.2}", metrics.volume_per_min), "inline": true },
            { "name": "Volume growth", "value": format!("{:.2}", metrics.volume_growth), "inline": true },
            { "name": "Score", "value": format!("{:.1}", score.final_score), "inline": true },
            { "name": "Category", "value": score.category.as_str(), "inline": true },
        ],
        "footer": { "text": "Read-only surveillance - no trade execution" },
        "color": color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_market::ConfidenceLabel;

    fn market() -> Market {
        Market {
            id: "m1".to_string(),
            question: "Will it happen?".to_string(),
            slug: None,
            url: Some("https://polymarket.com/market/will-it-happen".to_string()),
        }
    }

    fn metrics() -> MarketMetrics {
        MarketMetrics {
            p_market: Some(dec!(0.525)),
            p_adjusted: Some(dec!(0.51)),
            confidence: dec!(0.7),
            confidence_label: ConfidenceLabel::High,
            spread: Some(dec!(0.02)),
            depth_bid_top: dec!(150),
            depth_ask_top: dec!(120),
            imbalance: dec!(0.111),
            volatility_short: dec!(0.01),
            trades_per_min: dec!(0.4),
            volume_per_min: dec!(12.5),
            volume_growth: dec!(1.5),
        }
    }

    fn score(category: ScoreCategory) -> ScoreBreakdown {
        ScoreBreakdown {
            spread_score: dec!(40),
            liquidity_score: dec!(100),
            imbalance_score: dec!(30),
            noise_score: dec!(4),
            activity_score: dec!(50),
            final_score: dec!(49.1),
            category,
        }
    }

    #[test]
    fn test_embed_fields() {
        let embed = build_embed(
            "Odds anomaly detected",
            &market(),
            &metrics(),
            &score(ScoreCategory::Attention),
            "Attention",
        );
        assert_eq!(embed["title"], "Odds anomaly detected | Attention");
        assert_eq!(embed["description"], "Will it happen?");
        assert_eq!(embed["fields"][0]["value"], "52.5%");
        assert_eq!(embed["fields"][3]["value"], "0.0200");
        assert_eq!(embed["color"], COLOR_ATTENTION);
    }

    #[test]
    fn test_embed_null_metrics() {
        let empty = MarketMetrics {
            p_market: None,
            p_adjusted: None,
            spread: None,
            ..metrics()
        };
        let embed = build_embed("New market detected", &market(), &empty, &score(ScoreCategory::Ok), "New");
        assert_eq!(embed["fields"][0]["value"], "N/A");
        assert_eq!(embed["fields"][1]["value"], "N/A");
        assert_eq!(embed["fields"][3]["value"], "N/A");
        assert_eq!(embed["color"], COLOR_OK);
    }

    #[test]
    fn test_suspect_color() {
        let embed = build_embed(
            "Odds anomaly detected",
            &market(),
            &metrics(),
            &score(ScoreCategory::Suspect),
            "Suspect",
        );
        assert_eq!(embed["color"], COLOR_SUSPECT);
    }
}
