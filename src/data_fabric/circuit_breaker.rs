// =============================================================================
// Per-provider circuit breaker (§4.2)
// =============================================================================
//
// Grounded in the codebase's risk engine, which tracks threshold-based
// breaker state (daily loss, consecutive losses, ...) behind a
// `parking_lot::RwLock`; that style is reused here for an explicit
// Closed/Open/HalfOpen state machine, generalized from one account-wide
// risk guard to one instance per configured data provider.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_FAILURE_WINDOW_SECS: i64 = 60;
const DEFAULT_COOLDOWN_SECS: i64 = 60;
const MAX_BACKOFF_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    window_start: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    backoff_secs: i64,
}

/// One circuit breaker per provider. Failure accounting and state
/// transitions happen under a single `parking_lot::RwLock` write guard;
/// reads (`allow_request`) take a read guard unless a HalfOpen->Closed
/// or Open->HalfOpen transition is due, in which case the caller's read
/// observes the now-current state after `tick` has been invoked.
pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window_start: Utc::now(),
                opened_at: None,
                backoff_secs: DEFAULT_COOLDOWN_SECS,
            }),
        }
    }

    /// Re-evaluate time-based transitions (Open -> HalfOpen) and report
    /// whether a request may proceed right now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                let elapsed = (Utc::now() - opened_at).num_seconds();
                if elapsed >= inner.backoff_secs {
                    inner.state = BreakerState::HalfOpen;
                    info!(provider = %self.name, "circuit breaker half-open, probing");
                }
            }
        }
        !matches!(inner.state, BreakerState::Open)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                info!(provider = %self.name, "circuit breaker closed after successful probe");
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.backoff_secs = DEFAULT_COOLDOWN_SECS;
            }
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        let now = Utc::now();

        match inner.state {
            BreakerState::HalfOpen => {
                warn!(provider = %self.name, "probe failed, reopening circuit with backoff");
                inner.backoff_secs = (inner.backoff_secs * 2).min(MAX_BACKOFF_SECS);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
            }
            BreakerState::Closed => {
                if (now - inner.window_start).num_seconds() > DEFAULT_FAILURE_WINDOW_SECS {
                    inner.window_start = now;
                    inner.consecutive_failures = 0;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= DEFAULT_FAILURE_THRESHOLD {
                    warn!(provider = %self.name, failures = inner.consecutive_failures, "circuit breaker tripped");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }
}
