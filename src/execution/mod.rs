// =============================================================================
// Order Executor + Reconciler (§4.8)
// =============================================================================

pub mod executor;
pub mod reconcile;

pub use executor::OrderExecutor;
pub use reconcile::reconcile_once;
