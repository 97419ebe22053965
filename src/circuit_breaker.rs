//! Lock-free two-state circuit breaker gating a single cache layer.
//!
//! The atomic/`Clock`-injection idiom is lifted from `ninelives`'s
//! `CircuitBreakerPolicy`, but the state machine itself is simplified to
//! exactly what the cache spec needs: closed or open, no half-open probing.
//! A breaker only ever asks "has `openUntil` passed yet?" — there is no
//! trial-request budget to track.

use crate::entry::{Clock, SystemClock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub threshold: usize,
    pub break_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            break_duration_ms: 30_000,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failure_count: AtomicUsize,
    // 0 means "not open"; any other value is the epoch-ms deadline.
    open_until: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            failure_count: AtomicUsize::new(0),
            open_until: AtomicU64::new(0),
            clock,
        }
    }

    /// `true` while the layer should be skipped.
    pub fn is_open(&self) -> bool {
        let deadline = self.open_until.load(Ordering::Acquire);
        if deadline == 0 {
            return false;
        }
        if self.clock.now_ms() >= deadline {
            // Recovery window elapsed: close the breaker and reset the
            // failure count so a single stale failure doesn't immediately
            // re-open it.
            self.open_until.store(0, Ordering::Release);
            self.failure_count.store(0, Ordering::Release);
            return false;
        }
        true
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.config.threshold {
            let deadline = self.clock.now_ms().saturating_add(self.config.break_duration_ms);
            self.open_until.store(deadline, Ordering::Release);
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Acquire)
    }
}
