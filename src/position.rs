// =============================================================================
// Position entity and store (§3.1 Position)
// =============================================================================
//
// Single owner of position state (§9 "break cyclic references by ID" —
// the trailing engine holds only a `position_id` and fetches a snapshot
// from here each tick rather than sharing a mutable reference).
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::price::Price;
use crate::types::{Phase, Side};

pub const OWNER_TAG: &str = "EES";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StealthMode {
    Inactive,
    Breakeven,
    Trailing,
    Explosive,
    Moon,
}

impl Default for StealthMode {
    fn default() -> Self {
        StealthMode::Inactive
    }
}

impl std::fmt::Display for StealthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "Inactive",
            Self::Breakeven => "Breakeven",
            Self::Trailing => "Trailing",
            Self::Explosive => "Explosive",
            Self::Moon => "Moon",
        };
        write!(f, "{s}")
    }
}

/// An open or recently-closed trade (§3.1 Position). Prices are fixed-
/// point; only `unrealized_pnl_pct` is a plain `f64` ratio since it never
/// participates in a ratchet comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: Price,
    pub entry_time: DateTime<Utc>,
    pub current_price: Price,
    pub unrealized_pnl_pct: f64,
    pub highest_price_since_entry: Price,
    pub lowest_price_since_entry: Price,
    pub stop_price: Price,
    pub take_profit_price: Price,
    pub stealth_mode: StealthMode,
    pub owner_tag: String,
    pub last_update_time: DateTime<Utc>,
    pub entry_signal_confidence: f64,
    /// `true` while a sell order is in flight, so a tick's stop
    /// evaluation is idempotent (§4.7 cancellation semantics).
    #[serde(default)]
    pub exit_order_in_flight: bool,
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        quantity: u64,
        entry_price: Price,
        entry_signal_confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            entry_time: now,
            current_price: entry_price,
            unrealized_pnl_pct: 0.0,
            highest_price_since_entry: entry_price,
            lowest_price_since_entry: entry_price,
            stop_price: Price::ZERO,
            take_profit_price: Price::ZERO,
            stealth_mode: StealthMode::Inactive,
            owner_tag: OWNER_TAG.to_string(),
            last_update_time: now,
            entry_signal_confidence,
            exit_order_in_flight: false,
        }
    }

    /// Updates the mark-to-market fields; extremes only ever move in the
    /// favorable direction they track (never regress).
    pub fn mark(&mut self, price: Price) {
        self.current_price = price;
        self.unrealized_pnl_pct = (price.as_f64() - self.entry_price.as_f64()) / self.entry_price.as_f64();
        if price > self.highest_price_since_entry {
            self.highest_price_since_entry = price;
        }
        if price < self.lowest_price_since_entry {
            self.lowest_price_since_entry = price;
        }
        self.last_update_time = Utc::now();
    }

    /// Ratchets the stop price upward only (§4.7 critical invariant).
    /// Returns `true` if the stop actually moved.
    pub fn raise_stop(&mut self, new_stop: Price) -> bool {
        if new_stop > self.stop_price {
            self.stop_price = new_stop;
            true
        } else {
            false
        }
    }

    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price.as_f64()
    }
}

/// Owns all position state. The trailing engine, executor, and
/// reconciler all go through this store rather than holding their own
/// copies (§9 single-owner rule).
#[derive(Default)]
pub struct PositionStore {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, position: Position) {
        self.open.write().push(position);
    }

    pub fn snapshot(&self, id: &str) -> Option<Position> {
        self.open.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn open_snapshots(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    pub fn open_market_value(&self) -> f64 {
        self.open.read().iter().map(Position::market_value).sum()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.open.read().iter().any(|p| p.symbol == symbol)
    }

    /// Applies `f` to the live position in place, under the store's
    /// write lock. Per-position mutexes (§4.7 concurrency) are
    /// approximated here by locking the whole open-vec for the
    /// duration of the mutation, which is short relative to the I/O
    /// that happens around it (order placement happens outside `f`).
    pub fn update(&self, id: &str, f: impl FnOnce(&mut Position)) -> bool {
        let mut guard = self.open.write();
        if let Some(position) = guard.iter_mut().find(|p| p.id == id) {
            f(position);
            true
        } else {
            false
        }
    }

    pub fn close(&self, id: &str) -> Option<Position> {
        let mut guard = self.open.write();
        if let Some(idx) = guard.iter().position(|p| p.id == id) {
            let position = guard.remove(idx);
            drop(guard);
            self.closed.write().push(position.clone());
            Some(position)
        } else {
            None
        }
    }

    pub fn closed_snapshots(&self) -> Vec<Position> {
        self.closed.read().clone()
    }
}

/// Whether new entries are currently permitted (§8.4 Scenario F): the
/// executor must refuse to open positions outside the OPEN phase.
pub fn entries_permitted(phase: Phase) -> bool {
    phase == Phase::Open
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_tracks_highest_and_lowest_without_regressing() {
        let mut p = Position::open("TQQQ", Side::Buy, 70, Price::from_f64(50.0), 0.95);
        p.mark(Price::from_f64(52.0));
        p.mark(Price::from_f64(51.0));
        assert_eq!(p.highest_price_since_entry, Price::from_f64(52.0));
        assert_eq!(p.lowest_price_since_entry, Price::from_f64(50.0));
    }

    #[test]
    fn raise_stop_never_regresses() {
        let mut p = Position::open("TQQQ", Side::Buy, 70, Price::from_f64(50.0), 0.95);
        p.stop_price = Price::from_f64(49.0);
        assert!(p.raise_stop(Price::from_f64(50.05)));
        assert!(!p.raise_stop(Price::from_f64(49.5)));
        assert_eq!(p.stop_price, Price::from_f64(50.05));
    }

    #[test]
    fn store_round_trips_open_update_close() {
        let store = PositionStore::new();
        let position = Position::open("TQQQ", Side::Buy, 70, Price::from_f64(50.0), 0.95);
        let id = position.id.clone();
        store.insert(position);
        assert_eq!(store.open_count(), 1);

        store.update(&id, |p| p.mark(Price::from_f64(51.0)));
        let snap = store.snapshot(&id).unwrap();
        assert_eq!(snap.current_price, Price::from_f64(51.0));

        let closed = store.close(&id).unwrap();
        assert_eq!(closed.id, id);
        assert_eq!(store.open_count(), 0);
        assert_eq!(store.closed_snapshots().len(), 1);
    }

    #[test]
    fn entries_only_permitted_in_open_phase() {
        assert!(entries_permitted(Phase::Open));
        assert!(!entries_permitted(Phase::Prep));
        assert!(!entries_permitted(Phase::Cooldown));
        assert!(!entries_permitted(Phase::Dark));
    }
}
