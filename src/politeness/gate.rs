//! Lock-free per-key rate limiter
//!
//! A gate hands out dispatch slots spaced at least `interval` apart. The
//! next free slot is stored as nanoseconds past an epoch fixed by the first
//! reservation, so it fits in an `AtomicU64` and can be swapped with a
//! plain compare-and-swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Reserves the next instant a key may be dispatched
pub trait TimeGate: Send + Sync {
    /// Reserves a slot and returns the instant it starts
    ///
    /// The returned instant is never earlier than `now`. Each call commits
    /// its reservation, so callers must only ask when they intend to
    /// dispatch.
    fn eligible_at(&self, now: Instant) -> Instant;
}

/// Gate that spaces reservations by a fixed interval
#[derive(Debug)]
pub struct IntervalGate {
    interval_nanos: u64,
    epoch: OnceLock<Instant>,
    /// Earliest unreserved instant, in nanoseconds past `epoch`
    next_free: AtomicU64,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_nanos: u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX),
            epoch: OnceLock::new(),
            next_free: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos)
    }

    /// The earliest instant a new reservation could start, if any were made
    pub fn reserved_until(&self) -> Option<Instant> {
        let epoch = *self.epoch.get()?;
        Some(epoch + Duration::from_nanos(self.next_free.load(Ordering::Acquire)))
    }
}

impl TimeGate for IntervalGate {
    fn eligible_at(&self, now: Instant) -> Instant {
        let epoch = *self.epoch.get_or_init(|| now);
        // An instant before the epoch is always behind the first reservation.
        let now_nanos =
            u64::try_from(now.saturating_duration_since(epoch).as_nanos()).unwrap_or(u64::MAX);

        let mut current = self.next_free.load(Ordering::Acquire);
        loop {
            let allowed = current.max(now_nanos);
            let next = allowed.saturating_add(self.interval_nanos);
            match self.next_free.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return epoch + Duration::from_nanos(allowed),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Gate that never delays
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl TimeGate for OpenGate {
    fn eligible_at(&self, now: Instant) -> Instant {
        now
    }
}
