// =============================================================================
// Signals Module
// =============================================================================
//
// Strategy registry and the agreement aggregator that turns a batch of
// per-strategy verdicts into a single composite entry signal.

pub mod aggregator;
pub mod strategies;

pub use aggregator::{aggregate, aggregate_verdicts, compare_for_tiebreak, CompositeSignal, SignalRejection};
pub use strategies::{evaluate_all, StrategyInput, StrategyVerdict};
