//! Fixed-window rate limiter for providers.
//!
//! Each provider has a per-minute and a per-day counter. Windows are aligned
//! to the wall-clock minute and UTC day: a counter belongs to the window index
//! it was last incremented in, and reads from a later window see zero. There
//! is no reset timer, so a burst straddling a boundary may use the full
//! ceiling of both windows.
//!
//! Window index and count are packed into one `AtomicU64` so rollover, the
//! ceiling check and the increment happen in a single compare-and-swap; reads
//! never mutate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::models::Quota;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_DAY: i64 = 86_400;

fn pack(index: u32, count: u32) -> u64 {
    ((index as u64) << 32) | count as u64
}

fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

/// A single clock-aligned counter.
#[derive(Debug, Default)]
struct FixedWindow {
    state: AtomicU64,
}

impl FixedWindow {
    /// Count recorded in window `index` (zero if the counter is from an older window).
    fn count_in(&self, index: u32) -> u32 {
        let (current, count) = unpack(self.state.load(Ordering::Acquire));
        if current == index {
            count
        } else {
            0
        }
    }

    /// Takes one slot in window `index` if it is below `ceiling`, rolling
    /// over if needed. Returns the new count, or `None` when the window is full.
    fn try_increment(&self, index: u32, ceiling: u32) -> Option<u32> {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (current, count) = unpack(state);
                let count = if current == index { count } else { 0 };
                (count < ceiling).then(|| pack(index, count + 1))
            })
            .ok()?;

        let (current, count) = unpack(previous);
        Some(if current == index { count + 1 } else { 1 })
    }

    /// Gives back one slot taken in window `index`. A no-op once the window
    /// has rolled over.
    fn release(&self, index: u32) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (current, count) = unpack(state);
                (current == index && count > 0).then(|| pack(index, count - 1))
            });
    }
}

/// Counters and ceilings for one provider.
#[derive(Debug)]
struct ProviderWindows {
    quota: Quota,
    minute: FixedWindow,
    day: FixedWindow,
}

/// Snapshot of a provider's quota consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateUsage {
    pub minute_count: u32,
    pub minute_limit: u32,
    pub day_count: u32,
    pub day_limit: u32,
}

/// Fixed-window rate limiter for multiple providers.
///
/// Per-provider state lives in its own map entry, so providers never contend
/// with each other.
pub struct RateLimiter {
    windows: DashMap<String, Arc<ProviderWindows>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Configure (or reconfigure) the ceilings for a provider.
    ///
    /// Reconfiguring resets the provider's counters.
    pub fn configure(&self, provider: &str, quota: Quota) {
        self.windows.insert(
            provider.to_string(),
            Arc::new(ProviderWindows {
                quota,
                minute: FixedWindow::default(),
                day: FixedWindow::default(),
            }),
        );
    }

    fn indices(&self) -> (u32, u32) {
        let ts = self.clock.now().timestamp();
        (
            ts.div_euclid(SECONDS_PER_MINUTE) as u32,
            ts.div_euclid(SECONDS_PER_DAY) as u32,
        )
    }

    fn windows_for(&self, provider: &str) -> Option<Arc<ProviderWindows>> {
        self.windows.get(provider).map(|entry| Arc::clone(entry.value()))
    }

    /// True if either window is at or above its ceiling.
    ///
    /// Providers without a configured quota are never limited.
    pub fn is_limited(&self, provider: &str) -> bool {
        let Some(windows) = self.windows_for(provider) else {
            return false;
        };
        let (minute, day) = self.indices();

        let minute_count = windows.minute.count_in(minute);
        let day_count = windows.day.count_in(day);
        let limited = minute_count >= windows.quota.requests_per_minute
            || day_count >= windows.quota.requests_per_day;

        if limited {
            debug!(
                "[RateLimiter] '{}' limited ({}/{} this minute, {}/{} today)",
                provider,
                minute_count,
                windows.quota.requests_per_minute,
                day_count,
                windows.quota.requests_per_day
            );
        }
        limited
    }

    /// Reserve one call against both windows.
    ///
    /// The check and the increment are one compare-and-swap per window, so
    /// concurrent callers can never take more slots than the ceiling. Returns
    /// false (and takes nothing) when either window is full. Providers without
    /// a quota always succeed.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let Some(windows) = self.windows_for(provider) else {
            return true;
        };
        let (minute, day) = self.indices();

        let Some(minute_count) = windows
            .minute
            .try_increment(minute, windows.quota.requests_per_minute)
        else {
            debug!("[RateLimiter] '{}' refused: minute window full", provider);
            return false;
        };
        let Some(day_count) = windows
            .day
            .try_increment(day, windows.quota.requests_per_day)
        else {
            windows.minute.release(minute);
            debug!("[RateLimiter] '{}' refused: day window full", provider);
            return false;
        };

        debug!(
            "[RateLimiter] '{}' acquired ({} this minute, {} today)",
            provider, minute_count, day_count
        );
        true
    }

    /// Return a slot taken by [`try_acquire`](Self::try_acquire) for a call
    /// that never reached the network.
    pub fn release(&self, provider: &str) {
        if let Some(windows) = self.windows_for(provider) {
            let (minute, day) = self.indices();
            windows.minute.release(minute);
            windows.day.release(day);
        }
    }

    /// Current usage for a provider, if it has a quota.
    pub fn usage(&self, provider: &str) -> Option<RateUsage> {
        let windows = self.windows_for(provider)?;
        let (minute, day) = self.indices();
        Some(RateUsage {
            minute_count: windows.minute.count_in(minute),
            minute_limit: windows.quota.requests_per_minute,
            day_count: windows.day.count_in(day),
            day_limit: windows.quota.requests_per_day,
        })
    }

    /// Clear a provider's counters, keeping its quota.
    pub fn reset(&self, provider: &str) {
        if let Some(windows) = self.windows_for(provider) {
            self.configure(provider, windows.quota);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn quota(per_minute: u32, per_day: u32) -> Quota {
        Quota {
            requests_per_minute: per_minute,
            requests_per_day: per_day,
            burst_limit: 0,
        }
    }

    fn limiter_at(h: u32, m: u32, s: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap(),
        ));
        (RateLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn test_minute_ceiling() {
        let (limiter, _clock) = limiter_at(10, 0, 5);
        limiter.configure("demo-bank", quota(2, 100));

        assert!(limiter.try_acquire("demo-bank"));
        assert!(!limiter.is_limited("demo-bank"));
        assert!(limiter.try_acquire("demo-bank"));
        assert!(limiter.is_limited("demo-bank"));
        assert!(!limiter.try_acquire("demo-bank"));
        assert_eq!(limiter.usage("demo-bank").unwrap().minute_count, 2);
    }

    #[test]
    fn test_rollover_on_wall_clock_minute() {
        let (limiter, clock) = limiter_at(10, 0, 59);
        limiter.configure("demo-bank", quota(1, 100));

        assert!(limiter.try_acquire("demo-bank"));
        assert!(!limiter.try_acquire("demo-bank"));

        // One second later is a new clock minute, not 60s after the first call
        clock.advance(Duration::seconds(1));
        assert!(!limiter.is_limited("demo-bank"));
        assert!(limiter.try_acquire("demo-bank"));
        assert!(limiter.is_limited("demo-bank"));
    }

    #[test]
    fn test_day_ceiling_survives_minute_rollover() {
        let (limiter, clock) = limiter_at(23, 58, 0);
        limiter.configure("fiscal", quota(10, 2));

        assert!(limiter.try_acquire("fiscal"));
        clock.advance(Duration::minutes(1));
        assert!(limiter.try_acquire("fiscal"));
        assert!(!limiter.try_acquire("fiscal"));
        // The refused call did not keep its minute slot
        assert_eq!(limiter.usage("fiscal").unwrap().minute_count, 1);

        clock.advance(Duration::minutes(2));
        assert!(limiter.try_acquire("fiscal"));
    }

    #[test]
    fn test_release_returns_the_slot() {
        let (limiter, _clock) = limiter_at(9, 0, 0);
        limiter.configure("crm", quota(1, 10));

        assert!(limiter.try_acquire("crm"));
        limiter.release("crm");
        let usage = limiter.usage("crm").unwrap();
        assert_eq!((usage.minute_count, usage.day_count), (0, 0));
        assert!(limiter.try_acquire("crm"));

        // Releasing an empty window never underflows
        limiter.reset("crm");
        limiter.release("crm");
        assert_eq!(limiter.usage("crm").unwrap().minute_count, 0);
    }

    #[test]
    fn test_per_provider_isolation() {
        let (limiter, _clock) = limiter_at(9, 0, 0);
        limiter.configure("a", quota(1, 10));
        limiter.configure("b", quota(1, 10));

        assert!(limiter.try_acquire("a"));
        assert!(limiter.is_limited("a"));
        assert!(!limiter.is_limited("b"));
    }

    #[test]
    fn test_unconfigured_provider_is_never_limited() {
        let (limiter, _clock) = limiter_at(9, 0, 0);
        assert!(limiter.try_acquire("unknown"));
        assert!(!limiter.is_limited("unknown"));
        assert!(limiter.usage("unknown").is_none());
    }

    #[test]
    fn test_reads_are_idempotent_and_reset_clears() {
        let (limiter, _clock) = limiter_at(9, 0, 0);
        limiter.configure("crm", quota(5, 50));
        assert!(limiter.try_acquire("crm"));

        for _ in 0..10 {
            assert!(!limiter.is_limited("crm"));
        }
        let usage = limiter.usage("crm").unwrap();
        assert_eq!(usage.minute_count, 1);
        assert_eq!(usage.day_count, 1);

        limiter.reset("crm");
        assert_eq!(limiter.usage("crm").unwrap().minute_count, 0);
        assert_eq!(limiter.usage("crm").unwrap().minute_limit, 5);
    }

    #[test]
    fn test_concurrent_acquires_never_exceed_ceiling() {
        let (limiter, _clock) = limiter_at(9, 0, 0);
        let limiter = Arc::new(limiter);
        limiter.configure("feed", quota(1_000, 100_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..250).filter(|_| limiter.try_acquire("feed")).count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(granted, 1_000);
        assert_eq!(limiter.usage("feed").unwrap().minute_count, 1_000);
    }
}
