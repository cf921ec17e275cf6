// =============================================================================
// Per-provider token-bucket rate limiter (§4.2)
// =============================================================================
//
// Generalized from the codebase's single Binance-specific atomic-
// counter rate tracker into one bucket instance per configured
// provider. Refill and consumption both operate on plain atomics,
// matching that lock-free-counter idiom rather than introducing a
// mutex for what is a simple numeric budget.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as i64
}

/// A token bucket keyed by provider. `tokens_milli` stores the bucket
/// level scaled by 1000 so fractional per-millisecond refill can use
/// integer atomics without a lock.
pub struct TokenBucket {
    capacity_milli: i64,
    refill_per_ms_milli: i64,
    tokens_milli: AtomicI64,
    last_refill_ms: AtomicI64,
    calls_blocked: AtomicU64,
}

impl TokenBucket {
    pub fn new(capacity: u32, calls_per_minute: u32) -> Self {
        let refill_per_ms_milli = (calls_per_minute as i64 * 1000) / (60 * 1000);
        Self {
            capacity_milli: capacity as i64 * 1000,
            refill_per_ms_milli: refill_per_ms_milli.max(1),
            tokens_milli: AtomicI64::new(capacity as i64 * 1000),
            last_refill_ms: AtomicI64::new(now_millis()),
            calls_blocked: AtomicU64::new(0),
        }
    }

    fn refill(&self) {
        let now = now_millis();
        let last = self.last_refill_ms.swap(now, Ordering::AcqRel);
        let elapsed = (now - last).max(0);
        if elapsed == 0 {
            return;
        }
        let refill_amount = elapsed * self.refill_per_ms_milli;
        let mut current = self.tokens_milli.load(Ordering::Acquire);
        loop {
            let updated = (current + refill_amount).min(self.capacity_milli);
            match self.tokens_milli.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Try to take one token. Returns `true` if the call may proceed
    /// immediately.
    pub fn try_take(&self) -> bool {
        self.refill();
        let mut current = self.tokens_milli.load(Ordering::Acquire);
        loop {
            if current < 1000 {
                self.calls_blocked.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            let updated = current - 1000;
            match self.tokens_milli.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Milliseconds until at least one token will be available.
    pub fn wait_time_ms(&self) -> i64 {
        self.refill();
        let current = self.tokens_milli.load(Ordering::Acquire);
        if current >= 1000 {
            return 0;
        }
        let deficit = 1000 - current;
        deficit / self.refill_per_ms_milli.max(1)
    }

    pub fn blocked_count(&self) -> u64 {
        self.calls_blocked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_tokens_up_to_capacity() {
        let bucket = TokenBucket::new(3, 180);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[test]
    fn wait_time_is_zero_when_tokens_available() {
        let bucket = TokenBucket::new(5, 60);
        assert_eq!(bucket.wait_time_ms(), 0);
    }
}
