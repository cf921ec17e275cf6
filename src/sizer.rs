// =============================================================================
// Position Sizer (§4.6)
// =============================================================================

use crate::price::Price;
use crate::signals::CompositeSignal;
use crate::types::{AgreementLevel, Side};

const RESERVE_FRACTION: f64 = 0.80;
const MIN_POSITION_VALUE: f64 = 50.0;
const MAX_EXPOSURE_FRACTION: f64 = 0.35;
const SLIPPAGE_BUFFER: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub max_price: Price,
}

fn utilization(concurrent: usize) -> f64 {
    if concurrent <= 5 {
        0.90
    } else if concurrent <= 10 {
        0.80
    } else {
        0.70
    }
}

fn confidence_multiplier(confidence: f64) -> f64 {
    if confidence >= 0.99 {
        2.5
    } else if confidence >= 0.975 {
        2.0
    } else {
        1.0
    }
}

/// §4.6 steps 1-12. Returns `None` if the sized position fails the
/// minimum-value or zero-quantity gate.
pub fn size_position(
    cash_available_for_investment: f64,
    owned_positions_market_value: f64,
    owned_count: usize,
    n_candidates: usize,
    signal: &CompositeSignal,
    ask: Price,
) -> Option<OrderIntent> {
    let portfolio_value = cash_available_for_investment + owned_positions_market_value;
    let trading_capital = portfolio_value * RESERVE_FRACTION;

    let concurrent = owned_count + n_candidates;
    let util = utilization(concurrent);
    let fair_share = trading_capital / (concurrent.max(1) as f64);

    let confidence_mult = confidence_multiplier(signal.confidence);
    let agreement_bonus = signal.agreement_level.sizing_bonus();

    let boosted_value = fair_share * util * confidence_mult * (1.0 + agreement_bonus);

    let confidence_weight = (0.5 + (signal.confidence - 0.85) * 2.0 + agreement_bonus * 0.3).clamp(0.7, 1.3);
    let confidence_scaled_allocation = fair_share * confidence_weight;

    let position_value = boosted_value
        .min(confidence_scaled_allocation)
        .min(portfolio_value * MAX_EXPOSURE_FRACTION);

    if position_value < MIN_POSITION_VALUE {
        return None;
    }

    let ask_f64 = ask.as_f64();
    if ask_f64 <= 0.0 {
        return None;
    }
    let quantity = (position_value / ask_f64).floor() as u64;
    if quantity == 0 {
        return None;
    }

    // Shrink to fit if, after a hypothetical fill, total exposure would
    // exceed trading capital (§4.6 invariant check).
    let hypothetical_exposure = owned_positions_market_value + quantity as f64 * ask_f64;
    let quantity = if hypothetical_exposure > trading_capital {
        let room = (trading_capital - owned_positions_market_value).max(0.0);
        (room / ask_f64).floor() as u64
    } else {
        quantity
    };
    if quantity == 0 {
        return None;
    }

    Some(OrderIntent {
        symbol: signal.symbol.clone(),
        side: Side::Buy,
        quantity,
        max_price: ask.scaled_by(1.0 + SLIPPAGE_BUFFER),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(confidence: f64, level: AgreementLevel) -> CompositeSignal {
        CompositeSignal {
            symbol: "TQQQ".to_string(),
            confidence,
            agreement_level: level,
            strategy_count: 3,
            contributing_strategies: vec![],
            sentiment_score: 0.5,
            volume_ratio: 1.0,
            rationale: String::new(),
        }
    }

    /// §8.4 Scenario A: ask=50.00, cash=$10,000, zero owned positions,
    /// one candidate, composite confidence 1.0 (capped), agreement High.
    #[test]
    fn scenario_a_happy_path_entry() {
        let sig = signal(1.0, AgreementLevel::High);
        let intent = size_position(10_000.0, 0.0, 0, 1, &sig, Price::from_f64(50.00)).unwrap();
        assert_eq!(intent.quantity, 70);
    }

    #[test]
    fn rejects_below_min_position_value() {
        let sig = signal(0.91, AgreementLevel::Low);
        let intent = size_position(60.0, 0.0, 0, 1, &sig, Price::from_f64(50.00));
        assert!(intent.is_none());
    }

    #[test]
    fn utilization_steps_down_with_more_concurrent_candidates() {
        assert_eq!(utilization(3), 0.90);
        assert_eq!(utilization(8), 0.80);
        assert_eq!(utilization(15), 0.70);
    }

    #[test]
    fn shrinks_quantity_to_respect_trading_capital() {
        let sig = signal(1.0, AgreementLevel::Maximum);
        // Large owned exposure leaves little trading-capital headroom.
        let intent = size_position(1_000.0, 7_000.0, 3, 1, &sig, Price::from_f64(50.00));
        if let Some(intent) = intent {
            let hypothetical = 7_000.0 + intent.quantity as f64 * 50.00;
            assert!(hypothetical <= (1_000.0 + 7_000.0) * RESERVE_FRACTION + 1e-6);
        }
    }
}
