//! Immutable cache records and their freshness lifecycle.

use serde::{Deserialize, Serialize};

/// A stored value plus the timestamps that drive stale-while-revalidate
/// behaviour and the tags used for bulk invalidation.
///
/// `created_at <= stale_at <= gc_at` always holds; entries are never mutated
/// in place, only replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry<T> {
    pub value: T,
    pub created_at: u64,
    pub stale_at: u64,
    pub gc_at: u64,
    pub tags: Vec<String>,
}

/// Where an `Entry` currently sits relative to `now`, used by `CacheStack`
/// to decide whether to serve, revalidate in the background, or treat a hit
/// as a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Collected,
}

impl<T> Entry<T> {
    pub fn new(value: T, now: u64, stale_after_ms: u64, gc_after_ms: u64, tags: Vec<String>) -> Self {
        Self {
            value,
            created_at: now,
            stale_at: now.saturating_add(stale_after_ms),
            gc_at: now.saturating_add(gc_after_ms),
            tags,
        }
    }

    pub fn freshness(&self, now: u64) -> Freshness {
        if now >= self.gc_at {
            Freshness::Collected
        } else if now >= self.stale_at {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn is_stale(&self, now: u64) -> bool {
        matches!(self.freshness(now), Freshness::Stale | Freshness::Collected)
    }

    pub fn is_collected(&self, now: u64) -> bool {
        self.freshness(now) == Freshness::Collected
    }

    /// Returns a copy that is immediately stale but keeps the original
    /// garbage-collection deadline, used by explicit "expire" operations
    /// that want a key to trigger revalidation without dropping it outright.
    pub fn expire(&self, now: u64) -> Self
    where
        T: Clone,
    {
        Self {
            value: self.value.clone(),
            created_at: self.created_at,
            stale_at: now,
            gc_at: self.gc_at,
            tags: self.tags.clone(),
        }
    }
}

/// Monotonic-ish wall clock in epoch milliseconds, abstracted so tests can
/// inject deterministic time the way `ninelives`'s `Clock` trait does for
/// its circuit breaker.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub struct ManualClock(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(std::sync::atomic::AtomicU64::new(start_ms))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_transitions_in_order() {
        let e = Entry::new(42u32, 1_000, 100, 200, vec![]);
        assert_eq!(e.freshness(1_050), Freshness::Fresh);
        assert_eq!(e.freshness(1_100), Freshness::Stale);
        assert_eq!(e.freshness(1_200), Freshness::Collected);
    }

    #[test]
    fn expire_keeps_gc_deadline_but_forces_stale() {
        let e = Entry::new("v".to_string(), 0, 1_000, 2_000, vec!["tag".into()]);
        let expired = e.expire(500);
        assert_eq!(expired.stale_at, 500);
        assert_eq!(expired.gc_at, 2_000);
        assert!(expired.is_stale(500));
    }

    #[test]
    fn manual_clock_advances_deterministically() {
        let clock = ManualClock::new(0);
        assert_eq!(clock.now_ms(), 0);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 250);
    }
}
