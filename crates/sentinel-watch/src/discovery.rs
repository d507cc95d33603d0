//! Market discovery via the Gamma API.
//!
//! Polls the paginated `/markets` listing on a fixed interval and emits
//! discrete events on a channel consumed by the evaluator dispatcher:
//! one `Universe` per completed poll and one `NewMarket` per id not yet in
//! the seen-market cache.

use std::time::Duration;

use reqwest::Client;
use sentinel_market::Market;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::cache::MarketCache;

/// Markets requested per page.
const PAGE_SIZE: usize = 100;

/// Errors from a discovery page fetch.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gamma API responded {0}")]
    Status(reqwest::StatusCode),
}

/// Discovery events consumed by the dispatcher loop.
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// A market id seen for the first time.
    NewMarket(Market),
    /// The full universe from one completed poll.
    Universe(Vec<Market>),
}

/// Configuration for discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub gamma_base_url: String,
    pub poll_interval: Duration,
}

/// Gamma market discovery client.
pub struct GammaDiscovery {
    config: DiscoveryConfig,
    http: Client,
    cache: MarketCache,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl GammaDiscovery {
    pub fn new(
        config: DiscoveryConfig,
        cache: MarketCache,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http,
            cache,
            events,
        }
    }

    /// Runs the discovery loop until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Starting Gamma discovery with {}s interval",
            self.config.poll_interval.as_secs()
        );
        let mut timer = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.poll().await;
                }
                _ = shutdown.recv() => {
                    info!("Discovery received shutdown signal");
                    return;
                }
            }
        }
    }

    /// One full poll over the paginated listing. A page failure ends the
    /// poll with whatever was collected so far.
    async fn poll(&mut self) {
        let mut universe = Vec::new();
        let mut page = 1usize;

        loop {
            match self.fetch_page(page).await {
                Ok(markets) => {
                    let full_page = markets.len() == PAGE_SIZE;
                    universe.extend(markets);
                    if !full_page {
                        break;
                    }
                    page += 1;
                }
                Err(e) => {
                    warn!("Discovery page {page} failed: {e}");
                    break;
                }
            }
        }

        debug!("Discovery poll complete: {} markets", universe.len());

        for market in &universe {
            if self.cache.add(&market.id) {
                info!("New market discovered: {} ({})", market.id, market.question);
                let _ = self.events.send(DiscoveryEvent::NewMarket(market.clone()));
            }
        }

        if !universe.is_empty() {
            let _ = self.events.send(DiscoveryEvent::Universe(universe));
        }
    }

    /// Fetch and normalize one listing page.
    async fn fetch_page(&self, page: usize) -> Result<Vec<Market>, DiscoveryError> {
        let url = format!(
            "{}/markets?page={}&limit={}",
            self.config.gamma_base_url, page, PAGE_SIZE
        );
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status()));
        }
        let body: MarketsResponse = response.json().await?;
        Ok(parse_markets(body))
    }
}

/// Gamma listing response: either a bare array or wrapped under `markets`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketsResponse {
    Wrapped { markets: Vec<RawGammaMarket> },
    Bare(Vec<RawGammaMarket>),
}

/// Market row with alias tolerance.
#[derive(Debug, Deserialize)]
struct RawGammaMarket {
    id: Option<String>,
    market_id: Option<String>,
    slug: Option<String>,
    question: Option<String>,
    title: Option<String>,
    url: Option<String>,
}

/// Normalize listing rows; rows without any usable id are dropped.
fn parse_markets(response: MarketsResponse) -> Vec<Market> {
    let rows = match response {
        MarketsResponse::Wrapped { markets } => markets,
        MarketsResponse::Bare(rows) => rows,
    };

    rows.into_iter()
        .filter_map(|raw| {
            let id = raw
                .id
                .or(raw.market_id)
                .or_else(|| raw.slug.clone())?;
            let question = raw
                .question
                .or(raw.title)
                .unwrap_or_else(|| "Unnamed market".to_string());
            let url = raw.url.or_else(|| {
                raw.slug
                    .as_ref()
                    .map(|slug| format!("https://polymarket.com/market/{slug}"))
            });
            Some(Market {
                id,
                question,
                slug: raw.slug,
                url,
            })
        })
        .collect()
}
