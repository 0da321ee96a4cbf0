//! Collection triggering.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Rendezvous ticks that must elapse before the heuristic fires.
const TICK_DELTA: u32 = 10;

/// Minimum wallclock between heuristically armed cycles, in microseconds.
const MIN_INTERVAL_US: u64 = 10_000;

/// Decides when a collection cycle should start.
///
/// Two triggers: an explicit request, which dominates and stays set until a
/// cycle completes, and a heuristic that fires once more than `TICK_DELTA`
/// rendezvous ticks and at least 10 ms of wallclock have passed since the
/// last cycle was armed. The tick fields are read outside the global lock on
/// the rendezvous fast path; [`Scheduler::arm`] re-checks under the lock so
/// two racing mutators cannot double-schedule.
pub(crate) struct Scheduler {
    origin: Instant,
    tick: AtomicU32,
    last_tick: AtomicU32,
    /// Microsecond timestamp of the last armed cycle, 1-based so that zero
    /// means "never armed" and the first heuristic window is open
    /// immediately.
    last_armed_us: AtomicU64,
    requested: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            tick: AtomicU32::new(0),
            last_tick: AtomicU32::new(0),
            last_armed_us: AtomicU64::new(0),
            requested: AtomicBool::new(false),
        }
    }

    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64 + 1
    }

    fn heuristic_due(&self) -> bool {
        let tick = self.tick.load(Ordering::Relaxed);
        let delta = tick.wrapping_sub(self.last_tick.load(Ordering::Relaxed));
        if delta <= TICK_DELTA {
            return false;
        }
        let last = self.last_armed_us.load(Ordering::Relaxed);
        last == 0 || self.now_us().saturating_sub(last) > MIN_INTERVAL_US
    }

    /// Record an explicit collection request.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// A cycle finished; the explicit flag is consumed.
    pub fn cycle_completed(&self) {
        self.requested.store(false, Ordering::Release);
    }

    /// Fast-path trigger check, called on every rendezvous outside the
    /// lock. Advances the tick.
    pub fn should_collect(&self) -> bool {
        self.tick.fetch_add(1, Ordering::Relaxed);
        self.is_requested() || self.heuristic_due()
    }

    /// Re-check under the global lock and, if a cycle really is due, stamp
    /// the tick and wallclock baselines. Returns false when another mutator
    /// armed (and completed) a cycle while the caller was acquiring the
    /// lock.
    pub fn arm(&self) -> bool {
        if !self.is_requested() && !self.heuristic_due() {
            return false;
        }
        self.last_tick
            .store(self.tick.load(Ordering::Relaxed), Ordering::Relaxed);
        self.last_armed_us.store(self.now_us(), Ordering::Relaxed);
        true
    }
}
