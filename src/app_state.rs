// =============================================================================
// Central Application State
// =============================================================================
//
// The service locator the rest of the engine is built around (§9 "global
// singletons -> injected services"). Every subsystem is constructed once in
// `main` and handed to `AppState::new` as an `Arc`; nothing in here reaches
// for a global. Daily risk counters are the one piece of genuinely shared
// mutable state that doesn't already own its own synchronization.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;

use crate::broker::BrokerClient;
use crate::config::Config;
use crate::data_fabric::DataFabric;
use crate::events::EventSink;
use crate::oauth::OAuthSessionManager;
use crate::position::PositionStore;
use crate::sentiment::{FileSentimentSource, SentimentFilter};
use crate::session::SessionState;
use crate::trailing::TrailingEngine;
use crate::universe::Universe;

use crate::execution::OrderExecutor;

/// Resettable per-trading-day risk counters (§4.6 risk gates, §8.3
/// boundary behaviors). Rolls over the first time it's touched on a new
/// exchange day rather than on a timer, so a crashed-and-restarted
/// process still starts the day fresh.
struct RiskCounters {
    day: RwLock<NaiveDate>,
    trades_today: AtomicU32,
    consecutive_losses: AtomicU32,
    realized_pnl_today: RwLock<f64>,
}

impl RiskCounters {
    fn new(today: NaiveDate) -> Self {
        Self {
            day: RwLock::new(today),
            trades_today: AtomicU32::new(0),
            consecutive_losses: AtomicU32::new(0),
            realized_pnl_today: RwLock::new(0.0),
        }
    }

    fn roll_over_if_new_day(&self, today: NaiveDate) {
        let mut day = self.day.write();
        if *day != today {
            *day = today;
            self.trades_today.store(0, Ordering::Relaxed);
            self.consecutive_losses.store(0, Ordering::Relaxed);
            *self.realized_pnl_today.write() = 0.0;
        }
    }

    fn record(&self, today: NaiveDate, realized_pnl: f64) {
        self.roll_over_if_new_day(today);
        self.trades_today.fetch_add(1, Ordering::Relaxed);
        *self.realized_pnl_today.write() += realized_pnl;
        if realized_pnl < 0.0 {
            self.consecutive_losses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.consecutive_losses.store(0, Ordering::Relaxed);
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub events: EventSink,
    pub positions: Arc<PositionStore>,
    pub data_fabric: Arc<DataFabric>,
    pub oauth: Arc<OAuthSessionManager>,
    pub broker: Arc<BrokerClient>,
    pub universe: Arc<Universe>,
    pub sentiment: Arc<SentimentFilter<FileSentimentSource>>,
    pub executor: Arc<OrderExecutor>,
    pub trailing: Arc<TrailingEngine<OrderExecutor>>,
    pub session: Arc<SessionState>,
    risk: RiskCounters,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        events: EventSink,
        positions: Arc<PositionStore>,
        data_fabric: Arc<DataFabric>,
        oauth: Arc<OAuthSessionManager>,
        broker: Arc<BrokerClient>,
        universe: Arc<Universe>,
        sentiment: Arc<SentimentFilter<FileSentimentSource>>,
        executor: Arc<OrderExecutor>,
        trailing: Arc<TrailingEngine<OrderExecutor>>,
        session: Arc<SessionState>,
    ) -> Self {
        let today = Utc::now().with_timezone(&session.timezone()).date_naive();
        Self {
            config,
            events,
            positions,
            data_fabric,
            oauth,
            broker,
            universe,
            sentiment,
            executor,
            trailing,
            session,
            risk: RiskCounters::new(today),
        }
    }

    fn exchange_today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.session.timezone()).date_naive()
    }

    /// Called by the order executor's exit path once a position closes
    /// (§4.6 risk gates feed off realized results, not unrealized).
    pub fn record_trade_result(&self, realized_pnl: f64) {
        self.risk.record(self.exchange_today(), realized_pnl);
    }

    pub fn trades_today(&self) -> u32 {
        self.risk.roll_over_if_new_day(self.exchange_today());
        self.risk.trades_today.load(Ordering::Relaxed)
    }

    pub fn realized_pnl_today(&self) -> f64 {
        self.risk.roll_over_if_new_day(self.exchange_today());
        *self.risk.realized_pnl_today.read()
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.risk.roll_over_if_new_day(self.exchange_today());
        self.risk.consecutive_losses.load(Ordering::Relaxed)
    }

    /// §4.6 invariant: new entries stop once today's realized loss
    /// exceeds `maxDailyLossPct` of starting equity, or after
    /// `maxConsecutiveLosses` losing trades in a row, until the next
    /// exchange day rolls the counters over.
    pub fn risk_halted(&self, starting_equity: f64) -> bool {
        self.risk.roll_over_if_new_day(self.exchange_today());
        let loss_limit = -(starting_equity * self.config.max_daily_loss_pct / 100.0);
        let pnl = *self.risk.realized_pnl_today.read();
        if starting_equity > 0.0 && pnl <= loss_limit {
            return true;
        }
        self.risk.consecutive_losses.load(Ordering::Relaxed) >= self.config.max_consecutive_losses
    }

    pub fn concurrent_position_room(&self) -> usize {
        self.config.max_concurrent_positions.saturating_sub(self.positions.open_count())
    }

    /// Folds realized P&L from closed positions into the daily risk
    /// counters without coupling the executor to `AppState` directly —
    /// it only knows `EventSink` (§9 "callback flows -> explicit tasks +
    /// channels"). Meant to be spawned once at startup and run forever.
    pub async fn run_risk_counter_listener(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches!(event.kind, crate::events::EventKind::PositionClosed) {
                        if let Some(pnl) = event.payload.get("realizedPnl").and_then(|v| v.as_f64()) {
                            self.record_trade_result(pnl);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "risk counter listener lagged behind the event sink");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
