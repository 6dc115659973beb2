//! Injectable time source.
//!
//! Movement cooldowns, ground-item privacy and despawn windows, respawn
//! scheduling, and the AI tick all consult a [`ClockSource`] instead of
//! reading the system clock directly, so tests can freeze and advance time
//! deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over wall-clock time in seconds since the Unix epoch.
///
/// The default implementation ([`SystemClock`]) delegates to
/// `std::time::SystemTime`. Tests use [`ManualClock`].
pub trait ClockSource: Send + Sync {
    /// Current Unix time in seconds (fractional).
    fn now_secs(&self) -> f64;
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Stores microseconds in an atomic so the same instance can be shared
/// across tasks without locking.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start_secs`.
    #[must_use]
    pub fn new(start_secs: f64) -> Self {
        Self {
            micros: AtomicU64::new(to_micros(start_secs)),
        }
    }

    /// Advances the clock by `secs`.
    pub fn advance(&self, secs: f64) {
        self.micros.fetch_add(to_micros(secs), Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute timestamp.
    pub fn set(&self, secs: f64) {
        self.micros.store(to_micros(secs), Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_micros(secs: f64) -> u64 {
    (secs.max(0.0) * 1_000_000.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(b >= a);
        assert!(a > 1_000_000_000.0, "should be a plausible Unix timestamp");
    }

    #[test]
    fn manual_clock_starts_frozen() {
        let clock = ManualClock::new(1000.0);
        assert!((clock.now_secs() - 1000.0).abs() < 1e-6);
        assert!((clock.now_secs() - 1000.0).abs() < 1e-6, "does not drift");
    }

    #[test]
    fn manual_clock_advance_and_set() {
        let clock = ManualClock::new(1000.0);
        clock.advance(0.5);
        assert!((clock.now_secs() - 1000.5).abs() < 1e-6);
        clock.set(2000.0);
        assert!((clock.now_secs() - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn manual_clock_is_shareable() {
        let clock = std::sync::Arc::new(ManualClock::new(0.0));
        let c2 = std::sync::Arc::clone(&clock);
        clock.advance(1.0);
        assert!((c2.now_secs() - 1.0).abs() < 1e-6);
    }
}
