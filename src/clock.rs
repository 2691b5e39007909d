//! Pluggable time sources.
//!
//! The engine reads time through the `Clock` trait so TTL expiry, staleness
//! checks and cycle deadlines can be driven by a virtual clock in tests.
//! Monotonic time is used for intervals and freshness; wall time appears
//! only in timestamps embedded in outbound opportunities.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Monotonic microseconds since an arbitrary epoch. Never decreases.
    fn mono_us(&self) -> u64;

    /// Wall-clock milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;

    /// Wall-clock microseconds since the Unix epoch.
    fn wall_us(&self) -> u64 {
        self.wall_ms() * 1_000
    }
}

/// Real time. Monotonic reads come from `Instant`, wall reads from chrono.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn mono_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn wall_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    fn wall_us(&self) -> u64 {
        chrono::Utc::now().timestamp_micros().max(0) as u64
    }
}

/// Manually advanced clock for tests.
///
/// Monotonic and wall time move together; `advance_ms` never goes backward
/// because the underlying counter only increases.
pub struct VirtualClock {
    now_us: AtomicU64,
}

impl VirtualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn advance_us(&self, delta: u64) {
        self.now_us.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: u64) {
        self.advance_us(delta * 1_000);
    }
}

impl Clock for VirtualClock {
    fn mono_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst) / 1_000
    }

    fn wall_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_clock_advances() {
        let clock = VirtualClock::new(1_000_000);
        assert_eq!(clock.mono_us(), 1_000_000);
        assert_eq!(clock.wall_ms(), 1_000);

        clock.advance_ms(250);
        assert_eq!(clock.mono_us(), 1_250_000);
        assert_eq!(clock.wall_ms(), 1_250);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.mono_us();
        let b = clock.mono_us();
        assert!(b >= a);
    }

    #[test]
    fn test_system_clock_wall_sane() {
        let clock = SystemClock::new();
        // Any time after 2020-01-01.
        assert!(clock.wall_ms() > 1_577_836_800_000);
    }
}
