// =============================================================================
// EES Engine — Main Entry Point
// =============================================================================
//
// Wires every injected service (§9 "global singletons -> injected
// services"), restores persisted state or falls back to broker
// reconciliation, then spawns the long-lived worker roster: the session
// scheduler (scan/position ticks), the risk counter listener, the OAuth
// keep-alive ticker, the periodic reconciler, and the state-save loop.
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ees_engine::app_state::AppState;
use ees_engine::broker::BrokerClient;
use ees_engine::config::Config;
use ees_engine::data_fabric::provider::QuoteProvider;
use ees_engine::data_fabric::providers::{AlphaVantageProvider, BrokerProvider, PolygonProvider, YahooProvider};
use ees_engine::data_fabric::DataFabric;
use ees_engine::events::EventSink;
use ees_engine::execution::{reconcile_once, OrderExecutor};
use ees_engine::oauth::OAuthSessionManager;
use ees_engine::persistence;
use ees_engine::position::PositionStore;
use ees_engine::scan::{PositionWorker, ScanWorker};
use ees_engine::secret_store::FileSecretStore;
use ees_engine::sentiment::{FileSentimentSource, SentimentFilter};
use ees_engine::session::{SessionConfig, SessionScheduler, SessionState};
use ees_engine::trailing::{TrailingEngine, TrailingParams};
use ees_engine::types;
use ees_engine::universe::Universe;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn provider_roster(order: &[String], broker: Arc<BrokerClient>) -> Vec<Arc<dyn QuoteProvider>> {
    let mut roster: Vec<Arc<dyn QuoteProvider>> = Vec::with_capacity(order.len());
    for id in order {
        let provider: Arc<dyn QuoteProvider> = match id.as_str() {
            "broker" => Arc::new(BrokerProvider::new(broker.clone())),
            "polygon" => Arc::new(PolygonProvider::new(
                env_or("EES_POLYGON_BASE_URL", "https://api.polygon.io"),
                std::env::var("EES_POLYGON_API_KEY").ok(),
            )),
            "alphavantage" => Arc::new(AlphaVantageProvider::new(
                env_or("EES_ALPHAVANTAGE_BASE_URL", "https://www.alphavantage.co"),
                std::env::var("EES_ALPHAVANTAGE_API_KEY").ok(),
            )),
            "yahoo" => Arc::new(YahooProvider::new(env_or("EES_YAHOO_BASE_URL", "https://query1.finance.yahoo.com"), None)),
            other => {
                warn!(provider = other, "unrecognized provider in providerOrder, skipping");
                continue;
            }
        };
        roster.push(provider);
    }
    roster
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("EES engine starting up");

    let config_path = PathBuf::from(env_or("EES_CONFIG_PATH", "config.toml"));
    let config = Config::load(&config_path)?;
    info!(environment = %config.environment, timezone = %config.exchange_timezone, "config loaded");

    let events = EventSink::new(EVENT_CHANNEL_CAPACITY);

    let secrets_path = PathBuf::from(env_or("EES_SECRETS_PATH", "credentials.json"));
    let secret_store = Arc::new(FileSecretStore::new(secrets_path));
    let oauth = Arc::new(OAuthSessionManager::new(config.environment, env_or("EES_BROKER_BASE_URL", "https://api.sandbox.broker.example"), secret_store, events.clone()).await?);

    let broker = Arc::new(BrokerClient::new(
        env_or("EES_BROKER_BASE_URL", "https://api.sandbox.broker.example"),
        env_or("EES_BROKER_ACCOUNT_ID", "default"),
        oauth.clone(),
    ));

    let universe = Arc::new(Universe::load(Path::new(&config.universe_path))?);

    let sentiment_entries = match &config.sentiment_path {
        Some(path) => universe::load_sentiment_map(Path::new(path)).unwrap_or_else(|err| {
            warn!(error = %err, "failed to load sentiment map, starting with none");
            Default::default()
        }),
        None => Default::default(),
    };
    let sentiment = Arc::new(SentimentFilter::new(
        Arc::new(FileSentimentSource::new(sentiment_entries)),
        chrono::Duration::seconds(900),
    ));

    let positions = Arc::new(PositionStore::new());

    let data_fabric = Arc::new(DataFabric::new(
        provider_roster(&config.provider_order, broker.clone()),
        chrono::Duration::seconds(config.quote_ttl_sec as i64),
        chrono::Duration::seconds(config.bar_ttl_sec as i64),
        events.clone(),
    ));

    let executor = Arc::new(OrderExecutor::new(broker.clone(), positions.clone(), events.clone()));

    let trailing_params = TrailingParams {
        breakeven_trigger_pct: config.breakeven_trigger_pct,
        min_trail_pct: config.trail_base_min_pct,
        max_trail_pct: config.trail_base_max_pct,
        explosive_trigger_pct: config.explosive_trigger_pct,
        moon_trigger_pct: config.moon_trigger_pct,
        max_holding: chrono::Duration::hours(config.max_holding_duration_hours),
        ..TrailingParams::default()
    };
    let trailing = Arc::new(TrailingEngine::new(
        positions.clone(),
        data_fabric.clone(),
        executor.clone(),
        events.clone(),
        trailing_params,
    ));

    let session_state = Arc::new(SessionState::new(&config.exchange_timezone));

    let state_path = PathBuf::from(env_or("EES_STATE_PATH", "state.json"));
    restore_or_reconcile(&state_path, &positions, &broker, &events).await;

    let app_state = Arc::new(AppState::new(
        config.clone(),
        events.clone(),
        positions.clone(),
        data_fabric,
        oauth.clone(),
        broker.clone(),
        universe,
        sentiment,
        executor,
        trailing,
        session_state.clone(),
    ));

    let scheduler = Arc::new(SessionScheduler::new(
        session_state,
        Arc::new(ScanWorker::new(app_state.clone())),
        Arc::new(PositionWorker::new(app_state.clone())),
        events.clone(),
        SessionConfig { scan_interval_sec: config.scan_interval_sec, position_tick_sec: config.position_tick_sec },
    ));

    tokio::spawn(scheduler.run());
    tokio::spawn(app_state.clone().run_risk_counter_listener());
    tokio::spawn(keep_alive_ticker(broker.clone(), config.keep_alive_interval_sec));
    tokio::spawn(reconcile_ticker(app_state.clone(), config.reconcile_interval_sec));
    tokio::spawn(state_save_loop(app_state.clone(), state_path));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    Ok(())
}

/// Startup recovery (§9 "persistence race"): a clean `state.json` is
/// trusted for its open positions; anything corrupt, absent, or simply
/// never written falls back to reconciling directly from the broker.
async fn restore_or_reconcile(state_path: &Path, positions: &PositionStore, broker: &BrokerClient, events: &EventSink) {
    match persistence::load(state_path) {
        persistence::LoadOutcome::Loaded(state) => {
            info!(count = state.positions.len(), "restored positions from persisted state");
            for position in state.positions {
                positions.insert(position);
            }
        }
        persistence::LoadOutcome::Absent => {
            info!("no persisted state found, reconciling from broker");
            reconcile_once(broker, positions, events).await;
        }
        persistence::LoadOutcome::Corrupt => {
            warn!("persisted state was corrupt, reconciling from broker");
            reconcile_once(broker, positions, events).await;
        }
    }
}

async fn keep_alive_ticker(broker: Arc<BrokerClient>, interval_sec: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_sec));
    loop {
        ticker.tick().await;
        if let Err(err) = broker.renew_access_token().await {
            error!(error = %err, "OAuth keep-alive renewal failed");
        }
    }
}

async fn reconcile_ticker(state: Arc<AppState>, interval_sec: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_sec));
    loop {
        ticker.tick().await;
        if state.session.phase() == types::Phase::Open {
            reconcile_once(&state.broker, &state.positions, &state.events).await;
        }
    }
}

async fn state_save_loop(state: Arc<AppState>, state_path: PathBuf) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        ticker.tick().await;
        let persisted = persistence::PersistedState::new(
            persistence::PersistedSessionState { phase: state.session.phase(), entered_at: chrono::Utc::now() },
            state.positions.open_snapshots(),
            Vec::new(),
            persistence::PersistedCounters {
                trades_today: state.trades_today(),
                realized_pnl_today: state.realized_pnl_today(),
            },
        );
        if let Err(err) = persistence::save(&state_path, &persisted) {
            error!(error = %err, "failed to save persisted state");
        }
    }
}
