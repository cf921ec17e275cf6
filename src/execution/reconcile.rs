// =============================================================================
// Reconciliation (§4.8, §8.4 Scenario E)
// =============================================================================
//
// Runs every `reconcileIntervalSec` during OPEN and once at startup.
// Positions without `ownerTag == "EES"` are never touched, in either
// direction.
// =============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::broker::BrokerClient;
use crate::events::{Event, EventKind, EventSink};
use crate::position::{Position, PositionStore, StealthMode};
use crate::types::Side;

/// Fraction below entry price a blind-adopted position's stop is set
/// to, since its real stealth history is unknown (§8.4 Scenario E).
const ADOPTED_STOP_DISCOUNT: f64 = 0.97;

pub async fn reconcile_once(broker: &BrokerClient, positions: &PositionStore, events: &EventSink) {
    let broker_positions = match broker.get_positions().await {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "reconciliation: failed to fetch broker positions");
            return;
        }
    };

    let owned: Vec<_> = broker_positions.into_iter().filter(|p| p.owner_tag.as_deref() == Some("EES")).collect();
    let local = positions.open_snapshots();

    for broker_position in &owned {
        if local.iter().any(|p| p.symbol == broker_position.symbol) {
            continue;
        }
        warn!(symbol = %broker_position.symbol, "reconciliation: adopting untracked EES-tagged broker position");
        let mut adopted = Position::open(
            broker_position.symbol.clone(),
            Side::Buy,
            broker_position.quantity as u64,
            broker_position.entry_price,
            0.0,
        );
        adopted.stealth_mode = StealthMode::Trailing;
        adopted.stop_price = broker_position.entry_price.scaled_by(ADOPTED_STOP_DISCOUNT);
        let position_id = adopted.id.clone();
        positions.insert(adopted);
        events.emit(
            Event::new(
                EventKind::PositionAdopted,
                serde_json::json!({"symbol": broker_position.symbol, "quantity": broker_position.quantity}),
            )
            .with_symbol(&broker_position.symbol)
            .with_position(&position_id),
        );
    }

    for local_position in &local {
        if !owned.iter().any(|p| p.symbol == local_position.symbol) {
            warn!(symbol = %local_position.symbol, position_id = %local_position.id, "reconciliation: local position missing at broker, marking closed");
            positions.close(&local_position.id);
            events.emit(
                Event::new(EventKind::PositionClosed, serde_json::json!({"reason": "externally_flattened"}))
                    .with_symbol(&local_position.symbol)
                    .with_position(&local_position.id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::Price;

    #[test]
    fn adopted_stop_matches_scenario_e() {
        let entry = Price::from_f64(40.00);
        let stop = entry.scaled_by(ADOPTED_STOP_DISCOUNT);
        assert_eq!(stop, Price::from_f64(38.80));
    }
}
