// =============================================================================
// Stealth Trailing Engine (§4.7)
// =============================================================================
//
// Ticks every open position in parallel, advances its stealth state
// machine, and hands off the first fired exit trigger to an
// `ExitHandler`. The engine itself never places orders — it only
// decides *that* a position should exit and marks it in-flight so the
// next tick is a no-op until the order settles (§4.7 idempotent-per-
// tick cancellation semantics).
// =============================================================================

pub mod state;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::data_fabric::{DataFabric, Timeframe};
use crate::events::{Event, EventKind, EventSink};
use crate::indicators::{self, IndicatorSet};
use crate::position::{Position, PositionStore};

pub use state::{ExitContext, ExitReason, TrailingParams};

/// Receives the engine's exit decisions. Implemented by the order
/// executor; kept as a trait here so the trailing engine has no
/// compile-time dependency on execution/broker plumbing.
#[async_trait]
pub trait ExitHandler: Send + Sync {
    async fn request_exit(&self, position: &Position, reason: ExitReason);
}

pub struct TrailingEngine<H: ExitHandler> {
    positions: Arc<PositionStore>,
    data_fabric: Arc<DataFabric>,
    exit_handler: Arc<H>,
    events: EventSink,
    params: TrailingParams,
}

impl<H: ExitHandler> TrailingEngine<H> {
    pub fn new(
        positions: Arc<PositionStore>,
        data_fabric: Arc<DataFabric>,
        exit_handler: Arc<H>,
        events: EventSink,
        params: TrailingParams,
    ) -> Self {
        Self { positions, data_fabric, exit_handler, events, params }
    }

    /// Evaluates every open position concurrently. Each position is
    /// mutated under `PositionStore::update`'s per-position-equivalent
    /// lock, so two ticks can never race on the same position's stop.
    pub async fn tick(&self) {
        let snapshots = self.positions.open_snapshots();
        if snapshots.is_empty() {
            return;
        }

        let futures = snapshots.into_iter().map(|snapshot| self.evaluate_one(snapshot));
        join_all(futures).await;
    }

    async fn evaluate_one(&self, snapshot: Position) {
        if snapshot.exit_order_in_flight {
            return;
        }

        let bars = match self.data_fabric.get_bars(&snapshot.symbol, Timeframe::M1, 260).await {
            Ok(bars) => bars,
            Err(err) => {
                warn!(symbol = %snapshot.symbol, error = %err, "trailing tick: could not fetch bars, skipping");
                return;
            }
        };

        let indicator_set: IndicatorSet = indicators::compute(&bars);
        let ctx = ExitContext {
            rsi14: indicator_set.rsi14,
            macd_hist: indicator_set.macd_hist,
            selling_volume_ratio: selling_volume_ratio(&indicator_set, &bars),
        };

        let id = snapshot.id.clone();
        let mut fired = None;
        let mut trail_pct_applied = 0.0;

        self.positions.update(&id, |position| {
            let previous_mode = position.stealth_mode;
            let previous_stop = position.stop_price;

            trail_pct_applied = state::advance_state(position, indicator_set.atr14, &self.params);
            fired = state::evaluate_exit(position, trail_pct_applied, &ctx, &self.params, chrono::Utc::now());

            if position.stealth_mode != previous_mode {
                info!(
                    symbol = %position.symbol,
                    position_id = %position.id,
                    from = %previous_mode,
                    to = %position.stealth_mode,
                    "stealth mode advanced"
                );
            }
            if position.stop_price != previous_stop {
                self.events.emit(
                    Event::new(
                        EventKind::StopAdjusted,
                        serde_json::json!({
                            "previousStop": previous_stop.as_f64(),
                            "newStop": position.stop_price.as_f64(),
                            "mode": position.stealth_mode.to_string(),
                        }),
                    )
                    .with_symbol(&position.symbol)
                    .with_position(&position.id),
                );
            }

            if fired.is_some() {
                position.exit_order_in_flight = true;
            }
        });

        if let Some(reason) = fired {
            if let Some(current) = self.positions.snapshot(&id) {
                info!(symbol = %current.symbol, position_id = %current.id, reason = %reason, "trailing exit triggered");
                self.exit_handler.request_exit(&current, reason).await;
            }
        }
    }
}

/// Approximates the sentiment's "selling volume surge" gate from the
/// bars we already have: the ordinary volume ratio, scoped down-weight
/// when the most recent candle closed lower than it opened.
fn selling_volume_ratio(indicator_set: &IndicatorSet, bars: &[crate::data_fabric::Bar]) -> Option<f64> {
    let ratio = indicator_set.volume_ratio20?;
    let last = bars.last()?;
    if last.close < last.open {
        Some(ratio)
    } else {
        Some(0.0)
    }
}

/// How often the trailing engine ticks (§6.5 `positionTickSec`); the
/// caller spawns a `tokio::time::interval` loop using this as a
/// fallback default when config is unavailable.
pub const DEFAULT_TICK_INTERVAL: StdDuration = StdDuration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSet;
    use crate::price::Price;
    use chrono::Utc;

    fn bar(open: f64, close: f64, volume: f64) -> crate::data_fabric::Bar {
        crate::data_fabric::Bar {
            timestamp: Utc::now(),
            open: Price::from_f64(open),
            high: Price::from_f64(open.max(close) + 0.1),
            low: Price::from_f64(open.min(close) - 0.1),
            close: Price::from_f64(close),
            volume,
        }
    }

    #[test]
    fn selling_volume_ratio_zero_on_up_close() {
        let bars = vec![bar(50.0, 50.5, 1000.0)];
        let set = IndicatorSet { volume_ratio20: Some(2.0), ..Default::default() };
        assert_eq!(selling_volume_ratio(&set, &bars), Some(0.0));
    }

    #[test]
    fn selling_volume_ratio_passes_through_on_down_close() {
        let bars = vec![bar(50.5, 50.0, 1000.0)];
        let set = IndicatorSet { volume_ratio20: Some(2.0), ..Default::default() };
        assert_eq!(selling_volume_ratio(&set, &bars), Some(2.0));
    }
}
