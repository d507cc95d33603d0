//! Sentinel-watch: read-only surveillance bot for Polymarket markets.
//!
//! Usage:
//!   sentinel-watch [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/sentinel.toml)
//!   --log-level <LEVEL>     Log level (overrides config)
//!   --webhook-url <URL>     Discord webhook URL (overrides config)
//!   --dry-run               Log alerts instead of posting them

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use rust_decimal_macros::dec;
use sentinel_market::{
    compute_score, AlertKind, AlertPolicy, AlertThresholds, EngineConfig, Market, MarketMetrics,
    MetricsEngine, ScoreBreakdown,
};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::interval;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sentinel_watch::cache::MarketCache;
use sentinel_watch::config::WatchConfig;
use sentinel_watch::discovery::{DiscoveryConfig, DiscoveryEvent, GammaDiscovery};
use sentinel_watch::notify::Notifier;
use sentinel_watch::poller::{PollerConfig, TradePoller};
use sentinel_watch::stream::{MarketStream, StreamConfig};
use sentinel_watch::SharedEngine;

/// CLI arguments for sentinel-watch.
#[derive(Parser, Debug)]
#[command(name = "sentinel-watch")]
#[command(about = "Read-only surveillance bot for Polymarket markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/sentinel.toml")]
    config: PathBuf,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Discord webhook URL (overrides config file)
    #[arg(long)]
    webhook_url: Option<String>,

    /// Log alerts instead of posting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config errors are never fatal: fall back to documented defaults.
    let mut config = if args.config.exists() {
        match WatchConfig::from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config {:?}: {e:#}, using defaults", args.config);
                WatchConfig::default()
            }
        }
    } else {
        warn!("Config file not found at {:?}, using defaults", args.config);
        WatchConfig::default()
    };

    config.apply_overrides(args.log_level, args.webhook_url, args.dry_run);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting sentinel-watch");
    if config.discord_webhook_url.is_none() {
        warn!("No Discord webhook configured; alerts will only be logged");
    }

    let engine: SharedEngine = Arc::new(RwLock::new(MetricsEngine::new(EngineConfig {
        top_depth_levels: config.top_depth_levels,
    })));
    let notifier = Arc::new(Notifier::new(
        config.discord_webhook_url.clone(),
        config.dry_run,
    ));
    let cache = MarketCache::load(&config.cache_path);
    info!("Seen-market cache loaded with {} entries", cache.len());

    // Monitored market ids, capped and pushed by the evaluator.
    let (monitored_tx, monitored_rx) = watch::channel(Vec::new());
    // Discovery events and market-update ids, both consumed by the evaluator.
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let discovery = GammaDiscovery::new(
        DiscoveryConfig {
            gamma_base_url: config.gamma_base_url.clone(),
            poll_interval: config.discovery_interval,
        },
        cache,
        event_tx,
    );
    let discovery_handle = tokio::spawn(discovery.run(shutdown_tx.subscribe()));
    info!("Discovery task started");

    let stream = MarketStream::new(
        StreamConfig {
            ws_url: config.clob_ws_url.clone(),
            connect_timeout: config.connect_timeout,
            initial_reconnect_delay: config.initial_reconnect_delay,
            max_reconnect_delay: config.max_reconnect_delay,
        },
        Arc::clone(&engine),
        monitored_rx.clone(),
        update_tx,
    );
    let stream_shutdown = shutdown_tx.subscribe();
    let stream_handle = tokio::spawn(async move {
        if let Err(e) = stream.run(stream_shutdown).await {
            error!("Market stream error: {e}");
        }
    });
    info!("Market stream task started");

    let poller = TradePoller::new(
        PollerConfig {
            data_api_base_url: config.data_api_base_url.clone(),
            poll_interval: config.poll_interval,
            max_markets: config.max_monitored_markets,
        },
        Arc::clone(&engine),
        monitored_rx,
    );
    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));
    info!("Trade poller task started");

    let evaluator_handle = spawn_evaluator(
        Arc::clone(&engine),
        Arc::clone(&notifier),
        config.thresholds.clone(),
        config.max_monitored_markets,
        config.summary_interval,
        monitored_tx,
        event_rx,
        update_rx,
        shutdown_tx.subscribe(),
    );
    info!("Evaluator task started");

    info!("All tasks running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(10);
    tokio::select! {
        _ = async {
            let _ = discovery_handle.await;
            let _ = stream_handle.await;
            let _ = poller_handle.await;
            let _ = evaluator_handle.await;
        } => {
            info!("All tasks completed");
        }
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Spawn the evaluator dispatcher: the single consumer of discovery events
/// and market updates, owner of the known-market map and the alert policy.
#[allow(clippy::too_many_arguments)]
fn spawn_evaluator(
    engine: SharedEngine,
    notifier: Arc<Notifier>,
    thresholds: AlertThresholds,
    max_monitored: usize,
    summary_interval: Duration,
    monitored_tx: watch::Sender<Vec<String>>,
    mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    mut updates: mpsc::UnboundedReceiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut markets: HashMap<String, Market> = HashMap::new();
        // Insertion order, so the monitored cap keeps the oldest markets.
        let mut order: Vec<String> = Vec::new();
        let mut policy = AlertPolicy::new();

        let mut summary_timer = interval(summary_interval);
        // Skip the immediate first tick.
        summary_timer.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(DiscoveryEvent::NewMarket(market)) => {
                            register_market(&mut markets, &mut order, market.clone());
                            push_monitored(&monitored_tx, &order, max_monitored);

                            let (metrics, score) =
                                snapshot_and_score(&engine, &market.id, &thresholds).await;
                            notifier
                                .send_alert("New market detected", &market, &metrics, &score, "New")
                                .await;
                        }
                        Some(DiscoveryEvent::Universe(list)) => {
                            for market in list {
                                register_market(&mut markets, &mut order, market);
                            }
                            push_monitored(&monitored_tx, &order, max_monitored);
                        }
                        None => return,
                    }
                }

                update = updates.recv() => {
                    match update {
                        Some(market_id) => {
                            evaluate_market(
                                &engine,
                                &notifier,
                                &markets,
                                &mut policy,
                                &thresholds,
                                &market_id,
                            )
                            .await;
                        }
                        None => return,
                    }
                }

                _ = summary_timer.tick() => {
                    send_summary(&engine, &notifier, &markets, &thresholds).await;
                }

                _ = shutdown.recv() => {
                    info!("Evaluator received shutdown signal");
                    return;
                }
            }
        }
    })
}

fn register_market(
    markets: &mut HashMap<String, Market>,
    order: &mut Vec<String>,
    market: Market,
) {
    if !markets.contains_key(&market.id) {
        order.push(market.id.clone());
    }
    markets.insert(market.id.clone(), market);
}

/// Push the capped monitored id list to the stream and the poller.
fn push_monitored(tx: &watch::Sender<Vec<String>>, order: &[String], max: usize) {
    let ids: Vec<String> = order.iter().take(max).cloned().collect();
    let _ = tx.send(ids);
}

async fn snapshot_and_score(
    engine: &SharedEngine,
    market_id: &str,
    thresholds: &AlertThresholds,
) -> (MarketMetrics, ScoreBreakdown) {
    let metrics = engine.write().await.snapshot(market_id);
    let score = compute_score(&metrics, thresholds);
    (metrics, score)
}

/// Score one updated market and dispatch whatever the alert policy lets
/// through.
async fn evaluate_market(
    engine: &SharedEngine,
    notifier: &Notifier,
    markets: &HashMap<String, Market>,
    policy: &mut AlertPolicy,
    thresholds: &AlertThresholds,
    market_id: &str,
) {
    let Some(market) = markets.get(market_id) else {
        return;
    };

    let (metrics, score) = snapshot_and_score(engine, market_id, thresholds).await;

    for kind in policy.evaluate(market_id, &metrics, &score, thresholds, Utc::now()) {
        let (title, category) = match kind {
            AlertKind::SuspectScore => ("Odds anomaly detected", score.category.as_str()),
            AlertKind::VolumeSpike => ("Volume spike", "Activity"),
        };
        notifier
            .send_alert(title, market, &metrics, &score, category)
            .await;
    }
}

/// Periodic digest: top markets by score and by volume.
async fn send_summary(
    engine: &SharedEngine,
    notifier: &Notifier,
    markets: &HashMap<String, Market>,
    thresholds: &AlertThresholds,
) {
    let mut scored = Vec::new();
    {
        let mut engine = engine.write().await;
        for id in markets.keys() {
            let metrics = engine.snapshot(id);
            let score = compute_score(&metrics, thresholds);
            scored.push((id.clone(), metrics, score));
        }
    }

    let mut suspects: Vec<_> = scored
        .iter()
        .filter(|(_, _, score)| score.final_score >= dec!(40))
        .collect();
    suspects.sort_by(|a, b| b.2.final_score.cmp(&a.2.final_score));
    suspects.truncate(10);

    let mut active: Vec<_> = scored.iter().collect();
    active.sort_by(|a, b| b.1.volume_per_min.cmp(&a.1.volume_per_min));
    active.truncate(10);

    let name_of = |id: &str| {
        markets
            .get(id)
            .map(|m| m.question.clone())
            .unwrap_or_else(|| id.to_string())
    };

    let top_suspects = suspects
        .iter()
        .enumerate()
        .map(|(i, (id, _, score))| format!("{}. {} ({:.1})", i + 1, name_of(id), score.final_score))
        .collect::<Vec<_>>()
        .join("\n");
    let top_active = active
        .iter()
        .enumerate()
        .map(|(i, (id, metrics, _))| {
            format!("{}. {} ({:.2}/min)", i + 1, name_of(id), metrics.volume_per_min)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let suspects_block = if top_suspects.is_empty() {
        "None".to_string()
    } else {
        top_suspects
    };
    let active_block = if top_active.is_empty() {
        "None".to_string()
    } else {
        top_active
    };

    let body = format!("Top suspects:\n{suspects_block}\n\nTop active:\n{active_block}");
    info!("Sending periodic summary for {} markets", markets.len());
    notifier.send_summary("30m summary", &body).await;
}
