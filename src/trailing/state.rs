// =============================================================================
// Stealth trailing state machine — pure decision functions (§4.7)
// =============================================================================
//
// Kept free of I/O and locking so the ratchet invariant and exit-trigger
// ordering can be unit tested without a position store or event sink.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::price::Price;
use crate::position::{Position, StealthMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopHit,
    TakeProfit,
    MomentumExit,
    VolumeAnomaly,
    TimeExit,
    DivergenceExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopHit => "StopHit",
            Self::TakeProfit => "TakeProfit",
            Self::MomentumExit => "MomentumExit",
            Self::VolumeAnomaly => "VolumeAnomaly",
            Self::TimeExit => "TimeExit",
            Self::DivergenceExit => "DivergenceExit",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrailingParams {
    pub initial_stop_pct: f64,
    pub breakeven_trigger_pct: f64,
    pub breakeven_offset_pct: f64,
    pub trailing_activate_pct: f64,
    pub min_trail_pct: f64,
    pub max_trail_pct: f64,
    pub explosive_trigger_pct: f64,
    pub explosive_tighten_factor: f64,
    pub explosive_tp_pct: f64,
    pub moon_trigger_pct: f64,
    pub moon_tighten_factor: f64,
    pub moon_tp_pct: f64,
    pub rsi_close_threshold: f64,
    pub selling_surge_threshold: f64,
    pub tightened_trail_factor: f64,
    pub max_holding: chrono::Duration,
}

impl Default for TrailingParams {
    fn default() -> Self {
        Self {
            initial_stop_pct: 0.02,
            breakeven_trigger_pct: 0.005,
            breakeven_offset_pct: 0.001,
            trailing_activate_pct: 0.01,
            min_trail_pct: 0.005,
            max_trail_pct: 0.05,
            explosive_trigger_pct: 0.10,
            explosive_tighten_factor: 0.6,
            explosive_tp_pct: 0.10,
            moon_trigger_pct: 0.25,
            moon_tighten_factor: 0.4,
            moon_tp_pct: 0.25,
            rsi_close_threshold: 45.0,
            selling_surge_threshold: 1.4,
            tightened_trail_factor: 0.2,
            max_holding: chrono::Duration::hours(4),
        }
    }
}

/// Initializes a freshly-filled position's stop (Inactive state entry).
pub fn initialize_stop(entry_price: Price, params: &TrailingParams) -> Price {
    entry_price.scaled_by(1.0 - params.initial_stop_pct)
}

/// Volatility-scaled trail distance, clamped to `[minTrailPct, maxTrailPct]`.
fn base_trail_pct(atr14: Option<f64>, close: f64, params: &TrailingParams) -> f64 {
    let raw = match atr14 {
        Some(atr) if close > 0.0 => atr / close,
        _ => params.min_trail_pct,
    };
    raw.clamp(params.min_trail_pct, params.max_trail_pct)
}

/// Advances `position.stealth_mode` forward (never backward) and
/// ratchets `stop_price`/`take_profit_price` accordingly. Returns the
/// trail percentage actually applied, for logging.
pub fn advance_state(position: &mut Position, atr14: Option<f64>, params: &TrailingParams) -> f64 {
    let pnl_pct = position.unrealized_pnl_pct;
    let close = position.current_price.as_f64();
    let mut trail_pct = base_trail_pct(atr14, close, params);

    let target_mode = if pnl_pct >= params.moon_trigger_pct {
        StealthMode::Moon
    } else if pnl_pct >= params.explosive_trigger_pct {
        StealthMode::Explosive
    } else if pnl_pct >= params.trailing_activate_pct {
        StealthMode::Trailing
    } else if pnl_pct >= params.breakeven_trigger_pct {
        StealthMode::Breakeven
    } else {
        StealthMode::Inactive
    };

    if target_mode > position.stealth_mode {
        position.stealth_mode = target_mode;
    }

    match position.stealth_mode {
        StealthMode::Inactive => {}
        StealthMode::Breakeven => {
            let candidate = position.entry_price.scaled_by(1.0 + params.breakeven_offset_pct);
            position.raise_stop(candidate);
        }
        StealthMode::Trailing => {
            let candidate = position.highest_price_since_entry.scaled_by(1.0 - trail_pct);
            position.raise_stop(candidate);
        }
        StealthMode::Explosive => {
            trail_pct *= params.explosive_tighten_factor;
            let candidate = position.highest_price_since_entry.scaled_by(1.0 - trail_pct);
            position.raise_stop(candidate);
            let tp_candidate = position.entry_price.scaled_by(1.0 + params.explosive_tp_pct);
            if tp_candidate > position.take_profit_price {
                position.take_profit_price = tp_candidate;
            }
        }
        StealthMode::Moon => {
            trail_pct *= params.moon_tighten_factor;
            let candidate = position.highest_price_since_entry.scaled_by(1.0 - trail_pct);
            position.raise_stop(candidate);
            let tp_candidate = position.entry_price.scaled_by(1.0 + params.moon_tp_pct);
            if tp_candidate > position.take_profit_price {
                position.take_profit_price = tp_candidate;
            }
        }
    }

    trail_pct
}

/// Extra per-tick signals needed by the exit-trigger evaluation that
/// aren't stored on `Position` itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitContext {
    pub rsi14: Option<f64>,
    pub macd_hist: Option<f64>,
    pub selling_volume_ratio: Option<f64>,
}

/// Evaluates the six exit triggers in §4.7's mandated order. Returns the
/// first one that fires, or `None`. When trigger 4 (volume anomaly)
/// fires it tightens the stop in place and returns `None` — it is not
/// an exit.
pub fn evaluate_exit(
    position: &mut Position,
    trail_pct_applied: f64,
    ctx: &ExitContext,
    params: &TrailingParams,
    now: DateTime<Utc>,
) -> Option<ExitReason> {
    let last_price = position.current_price;

    // 1. Hard stop.
    if last_price <= position.stop_price {
        return Some(ExitReason::StopHit);
    }

    // 2. Take profit.
    if position.take_profit_price.is_positive() && last_price >= position.take_profit_price {
        return Some(ExitReason::TakeProfit);
    }

    // 3. Momentum loss.
    let trending_state = matches!(
        position.stealth_mode,
        StealthMode::Trailing | StealthMode::Explosive | StealthMode::Moon
    );
    if trending_state {
        if let Some(rsi) = ctx.rsi14 {
            if rsi < params.rsi_close_threshold {
                return Some(ExitReason::MomentumExit);
            }
        }
    }

    // 4. Volume anomaly (selling surge): tighten, don't exit.
    if let Some(ratio) = ctx.selling_volume_ratio {
        if ratio >= params.selling_surge_threshold && position.unrealized_pnl_pct > 0.0 {
            let tightened = trail_pct_applied * params.tightened_trail_factor;
            let candidate = last_price.scaled_by(1.0 - tightened);
            let new_stop = std::cmp::max(position.stop_price, candidate);
            position.raise_stop(new_stop);
        }
    }

    // 5. Time stop.
    if now - position.entry_time >= params.max_holding {
        return Some(ExitReason::TimeExit);
    }

    // 6. Divergence.
    if position.unrealized_pnl_pct < 0.0 {
        if let (Some(hist), Some(rsi)) = (ctx.macd_hist, ctx.rsi14) {
            if hist < 0.0 && rsi < 45.0 {
                return Some(ExitReason::DivergenceExit);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn position_at(entry: f64, current: f64) -> Position {
        let mut p = Position::open("TQQQ", Side::Buy, 70, Price::from_f64(entry), 0.95);
        p.stop_price = initialize_stop(Price::from_f64(entry), &TrailingParams::default());
        p.mark(Price::from_f64(current));
        p
    }

    #[test]
    fn stealth_mode_never_regresses() {
        let mut p = position_at(50.0, 55.0);
        let params = TrailingParams::default();
        advance_state(&mut p, Some(0.3), &params);
        assert_eq!(p.stealth_mode, StealthMode::Explosive);
        p.mark(Price::from_f64(50.1));
        advance_state(&mut p, Some(0.3), &params);
        assert_eq!(p.stealth_mode, StealthMode::Explosive, "must not regress to an earlier state");
    }

    #[test]
    fn stop_price_only_ratchets_upward() {
        let mut p = position_at(50.0, 50.3);
        let params = TrailingParams::default();
        advance_state(&mut p, Some(0.1), &params);
        let stop_after_first = p.stop_price;
        p.mark(Price::from_f64(50.1));
        advance_state(&mut p, Some(0.1), &params);
        assert!(p.stop_price >= stop_after_first);
    }

    #[test]
    fn scenario_a_initial_stop_is_49() {
        let stop = initialize_stop(Price::from_f64(50.0), &TrailingParams::default());
        assert_eq!(stop, Price::from_f64(49.00));
    }

    #[test]
    fn breakeven_raises_stop_to_entry_plus_offset() {
        let mut p = position_at(50.0, 50.26);
        let params = TrailingParams::default();
        advance_state(&mut p, Some(0.1), &params);
        assert_eq!(p.stealth_mode, StealthMode::Breakeven);
        assert_eq!(p.stop_price, Price::from_f64(50.05));
    }

    #[test]
    fn hard_stop_exit_fires_first() {
        let mut p = position_at(50.0, 48.5);
        p.stop_price = Price::from_f64(49.0);
        let reason = evaluate_exit(&mut p, 0.01, &ExitContext::default(), &TrailingParams::default(), Utc::now());
        assert_eq!(reason, Some(ExitReason::StopHit));
    }

    #[test]
    fn time_stop_fires_after_max_holding() {
        let mut p = position_at(50.0, 51.0);
        p.entry_time = Utc::now() - chrono::Duration::hours(5);
        p.stop_price = Price::from_f64(10.0);
        let reason = evaluate_exit(&mut p, 0.01, &ExitContext::default(), &TrailingParams::default(), Utc::now());
        assert_eq!(reason, Some(ExitReason::TimeExit));
    }

    #[test]
    fn volume_anomaly_tightens_but_does_not_exit() {
        let mut p = position_at(50.0, 51.0);
        p.stop_price = Price::from_f64(10.0);
        let ctx = ExitContext { selling_volume_ratio: Some(2.0), ..Default::default() };
        let reason = evaluate_exit(&mut p, 0.02, &ctx, &TrailingParams::default(), Utc::now());
        assert_eq!(reason, None);
        assert!(p.stop_price > Price::from_f64(10.0));
    }

    #[test]
    fn divergence_exit_requires_negative_pnl_and_weak_momentum() {
        let mut p = position_at(50.0, 49.5);
        p.stop_price = Price::from_f64(10.0);
        let ctx = ExitContext { macd_hist: Some(-0.2), rsi14: Some(40.0), ..Default::default() };
        let reason = evaluate_exit(&mut p, 0.02, &ctx, &TrailingParams::default(), Utc::now());
        assert_eq!(reason, Some(ExitReason::DivergenceExit));
    }
}
