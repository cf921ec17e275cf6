// =============================================================================
// Error taxonomy
// =============================================================================
//
// Most ambient I/O errors (parsing, network, disk) propagate as
// `anyhow::Result` with `.context(...)`, exactly as elsewhere in this
// codebase. `CoreError` exists alongside anyhow for the handful of error
// *kinds* that the session loop must be able to match on specifically —
// everything else is absorbed locally at the component boundary that
// produced it.
// =============================================================================

use thiserror::Error;

/// Error kinds that require a decision at the session-loop boundary, or
/// that strategies/the aggregator need to distinguish structurally
/// rather than via a free-text message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("insufficient data quality: {0}")]
    DataQuality(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Only `Fatal` halts the session loop's trade placement; everything
    /// else is recoverable per spec.md §7's propagation policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_))
    }
}
