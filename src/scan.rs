// =============================================================================
// Scan Worker (§4.1 scanWorker, §4.4, §4.6)
// =============================================================================
//
// Runs once per coalesced scan tick. Evaluates every tracked symbol that
// doesn't already have an open position, aggregates strategy verdicts,
// sizes a candidate order, and hands it to the executor. All entries
// are gated by the session phase and the daily risk counters before a
// single provider call is made.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::data_fabric::Timeframe;
use crate::events::{Event, EventKind};
use crate::indicators;
use crate::session::{PositionTicker, ScanTicker};
use crate::signals::{aggregator::aggregate_verdicts, strategies::evaluate_all, StrategyInput};
use crate::sizer::size_position;
use crate::types::Phase;

const BARS_PER_SYMBOL: usize = 260;
const MAX_QUOTE_WAIT_MS: i64 = 1500;

pub struct ScanWorker {
    state: Arc<AppState>,
}

impl ScanWorker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn evaluate_symbol(&self, symbol: &crate::universe::Symbol) {
        if self.state.positions.has_open_position(&symbol.symbol) {
            return;
        }
        if self.state.concurrent_position_room() == 0 {
            return;
        }

        let quote = match self.state.data_fabric.get_quote(&symbol.symbol, MAX_QUOTE_WAIT_MS).await {
            Ok(quote) => quote,
            Err(err) => {
                debug!(symbol = %symbol.symbol, error = %err, "scan: no quote, skipping");
                return;
            }
        };
        let bars = match self.state.data_fabric.get_bars(&symbol.symbol, Timeframe::M1, BARS_PER_SYMBOL).await {
            Ok(bars) => bars,
            Err(err) => {
                debug!(symbol = %symbol.symbol, error = %err, "scan: no bar history, skipping");
                return;
            }
        };

        let indicator_set = indicators::compute(&bars);
        let sentiment = self.state.sentiment.evaluate(&symbol.underlying_id, symbol.direction);

        let input = StrategyInput {
            symbol: &symbol.symbol,
            direction: symbol.direction,
            quote: &quote,
            bars: &bars,
            indicators: &indicator_set,
            sentiment,
        };
        let verdicts = evaluate_all(&input);

        let signal = aggregate_verdicts(
            &symbol.symbol,
            sentiment.score,
            sentiment.decision,
            indicator_set.volume_ratio20.unwrap_or(1.0),
            self.state.config.min_agreeing_strategies,
            self.state.config.min_composite_confidence,
            &verdicts,
        );
        let signal = match signal {
            Ok(signal) => signal,
            Err(rejection) => {
                debug!(symbol = %symbol.symbol, reason = rejection.reason_code(), "scan: signal rejected");
                self.state.events.emit(
                    Event::new(EventKind::SignalRejected, serde_json::json!({"reason": rejection.reason_code()}))
                        .with_symbol(&symbol.symbol),
                );
                return;
            }
        };

        let balance = match self.state.broker.get_balance().await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(symbol = %symbol.symbol, error = %err, "scan: could not fetch balance, skipping entry");
                return;
            }
        };

        let intent = size_position(
            balance.free,
            self.state.positions.open_market_value(),
            self.state.positions.open_count(),
            1,
            &signal,
            quote.ask,
        );
        let Some(intent) = intent else {
            debug!(symbol = %symbol.symbol, "scan: sized position below minimum, skipping");
            return;
        };

        if self.state.risk_halted(balance.free + self.state.positions.open_market_value()) {
            debug!(symbol = %symbol.symbol, "scan: risk gate halted, skipping entry");
            return;
        }

        if let Err(err) = self.state.executor.enter(&intent, signal.confidence, Phase::Open).await {
            debug!(symbol = %symbol.symbol, error = %err, "scan: entry rejected");
        }
    }
}

#[async_trait]
impl ScanTicker for ScanWorker {
    async fn scan_tick(&self) {
        let symbols: Vec<_> = self.state.universe.all().cloned().collect();
        let futures = symbols.iter().map(|symbol| self.evaluate_symbol(symbol));
        join_all(futures).await;
    }
}

pub struct PositionWorker {
    state: Arc<AppState>,
}

impl PositionWorker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PositionTicker for PositionWorker {
    async fn position_tick(&self) {
        self.state.trailing.tick().await;
    }
}
