//! Platform clock and critical-section shim (spec.md §4.1).
//!
//! Only the hosted implementation is provided: bare-metal federates are
//! explicitly out of scope for the concurrency model (spec.md §5), and the
//! platform clock syscalls themselves are a named external collaborator
//! (spec.md §1) — this module only implements the abstract contract plus a
//! reference hosted backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use federate_core::Timestamp;

/// Outcome of a call to [`Clock::sleep_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The deadline was reached.
    Expired,
    /// An async event interrupted the sleep before the deadline.
    Interrupted,
}

/// A monotonic nanosecond clock with an interruptible sleep primitive.
///
/// Implementations must guarantee that [`Clock::notify_async_event`] called
/// from another thread causes any in-progress [`Clock::sleep_until`] to
/// return [`SleepOutcome::Interrupted`] promptly.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Blocks the calling thread until physical time reaches `deadline` or
    /// an async event is signalled.
    fn sleep_until(&self, deadline: Timestamp) -> SleepOutcome;

    /// Signals any in-progress [`Clock::sleep_until`] call to wake early.
    fn notify_async_event(&self);
}

/// Hosted monotonic clock backed by [`std::time::Instant`].
///
/// `now()` has at-least-microsecond resolution on every platform Rust's
/// standard library supports monotonic time on.
pub struct MonotonicClock {
    origin_instant: Instant,
    origin: Timestamp,
    interrupted: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Create a clock whose `now()` is offset so the first reading equals
    /// `origin`. Used so a federate's clock reports nanoseconds-since-epoch
    /// without depending on `SystemTime`, which is not guaranteed monotonic.
    pub fn starting_at(origin: Timestamp) -> Self {
        MonotonicClock {
            origin_instant: Instant::now(),
            origin,
            interrupted: AtomicBool::new(false),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin_instant.elapsed();
        self.origin.saturating_add(elapsed.as_nanos() as i64)
    }

    fn sleep_until(&self, deadline: Timestamp) -> SleepOutcome {
        loop {
            if self.interrupted.swap(false, Ordering::AcqRel) {
                return SleepOutcome::Interrupted;
            }

            let now = self.now();
            if now >= deadline {
                return SleepOutcome::Expired;
            }

            let remaining_ns = deadline.since(now).max(0) as u64;
            let remaining = Duration::from_nanos(remaining_ns);

            let guard = self.lock.lock().unwrap();
            let (_guard, timeout) = self.cvar.wait_timeout(guard, remaining).unwrap();
            if timeout.timed_out() && !self.interrupted.load(Ordering::Acquire) {
                // Spurious wakeup or genuine expiry; loop re-checks `now()`.
                continue;
            }
        }
    }

    fn notify_async_event(&self) {
        self.interrupted.store(true, Ordering::Release);
        // Hold the lock while notifying so a thread already inside
        // `wait_timeout` cannot miss the wakeup (classic lost-wakeup guard).
        let _guard = self.lock.lock().unwrap();
        self.cvar.notify_all();
    }
}

/// Reentrant critical-section counter (spec.md §4.1).
///
/// On hosted platforms there is no interrupt controller to mask, so
/// `enter`/`exit` only track nesting depth and guard against a caller
/// exiting a section it never entered. A bare-metal backend would toggle
/// the processor's global interrupt-enable bit on the 0→1 / 1→0 edges.
#[derive(Debug, Default)]
pub struct CriticalSection {
    depth: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("critical section exit without matching enter")]
pub struct CriticalSectionUnderflow;

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    pub fn exit(&mut self) -> Result<(), CriticalSectionUnderflow> {
        self.depth = self.depth.checked_sub(1).ok_or(CriticalSectionUnderflow)?;
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Pure 32-bit-microsecond wraparound reconstruction, as used by bare-metal
/// targets that only expose a free-running 32-bit microsecond counter
/// (spec.md §4.1, §9 design notes). Not wired into the hosted `Clock`
/// implementation above; kept as a standalone, independently testable unit
/// for a bare-metal backend to call from its timer interrupt handler.
///
/// `read()` must be invoked at least once per wraparound period (2^32
/// microseconds, ~71.5 minutes) or the reconstruction silently loses a
/// wraparound.
#[derive(Debug, Default)]
pub struct WraparoundClock32 {
    high_word: u32,
    last_low: u32,
}

impl WraparoundClock32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw 32-bit microsecond counter reading into a 64-bit
    /// microsecond count, detecting one wraparound per call at most.
    pub fn read(&mut self, raw_micros: u32) -> u64 {
        if raw_micros < self.last_low {
            self.high_word += 1;
        }
        self.last_low = raw_micros;
        (u64::from(self.high_word) << 32) | u64::from(raw_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn now_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn sleep_until_expires() {
        let clock = MonotonicClock::new();
        let deadline = clock.now().saturating_add(1_000_000); // 1ms
        assert_eq!(clock.sleep_until(deadline), SleepOutcome::Expired);
    }

    #[test]
    fn notify_async_event_interrupts_sleep() {
        let clock = Arc::new(MonotonicClock::new());
        let far_future = clock.now().saturating_add(60_000_000_000); // 60s

        let waiter = {
            let clock = clock.clone();
            thread::spawn(move || clock.sleep_until(far_future))
        };

        // Give the waiter thread a moment to enter `sleep_until`.
        thread::sleep(Duration::from_millis(20));
        clock.notify_async_event();

        let outcome = waiter.join().unwrap();
        assert_eq!(outcome, SleepOutcome::Interrupted);
    }

    #[test]
    fn critical_section_nests_and_detects_underflow() {
        let mut cs = CriticalSection::new();
        assert_eq!(cs.depth(), 0);
        cs.enter();
        cs.enter();
        assert_eq!(cs.depth(), 2);
        cs.exit().unwrap();
        assert_eq!(cs.depth(), 1);
        cs.exit().unwrap();
        assert_eq!(cs.depth(), 0);
        assert!(cs.exit().is_err());
    }

    #[test]
    fn wraparound_clock_reconstructs_64_bit_micros() {
        let mut clock = WraparoundClock32::new();
        assert_eq!(clock.read(100), 100);
        assert_eq!(clock.read(u32::MAX - 10), u64::from(u32::MAX - 10));
        // Wraps around past zero.
        assert_eq!(clock.read(5), (1u64 << 32) | 5);
        assert_eq!(clock.read(10), (1u64 << 32) | 10);
    }
}
