//! Snapshot of a completed (or in-progress) `Scheduler::run` call (C10).
//!
//! Grounded on `examples/original_source/sparta/sparta/kernel/Scheduler.hpp`'s
//! `getElapsedTicks`/picosecond-conversion accessors; wall/user CPU time is
//! this crate's addition for the ambient observability layer (Design Note
//! 9), reported the way `std::time::Instant` differences normally are in
//! this corpus rather than via a platform timer FFI. User CPU time comes
//! from `libc::getrusage` on unix, mirroring the original's
//! `boost::timer::cpu_timer` split of wall vs. user time without pulling in
//! a `cpu-time`-style crate the teacher corpus doesn't already carry.

use std::time::Duration;

/// Immutable result of a `Scheduler::run` invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStats {
    /// Total ticks elapsed on the scheduler since it was created (or last
    /// restarted), as of the end of this run.
    pub elapsed_ticks: u64,
    /// Ticks consumed by this particular `run` call.
    pub ticks_run: u64,
    /// Wall-clock time spent in this `run` call, or `Duration::ZERO` if
    /// `measure_time` was false.
    pub wall_time: Duration,
    /// User CPU time spent in this `run` call, if `measure_time` was true
    /// and the platform exposes `getrusage`. `None` on non-unix targets.
    pub user_cpu_time: Option<Duration>,
    /// Scheduleables fired over the course of this `run` call.
    pub events_fired: u64,
    picoseconds_per_tick: u64,
}

impl SchedulerStats {
    pub(crate) fn new(
        elapsed_ticks: u64,
        ticks_run: u64,
        wall_time: Duration,
        events_fired: u64,
        user_cpu_time: Option<Duration>,
        picoseconds_per_tick: u64,
    ) -> Self {
        SchedulerStats {
            elapsed_ticks,
            ticks_run,
            wall_time,
            user_cpu_time,
            events_fired,
            picoseconds_per_tick,
        }
    }

    /// Simulated time elapsed, in picoseconds, given the caller's
    /// picoseconds-per-tick conversion factor (the scheduler itself has no
    /// notion of wall-clock-equivalent simulated time; the original derives
    /// this from a configured clock frequency, which this crate exposes as
    /// `Clock::frequency_mhz` instead of baking into the scheduler).
    pub fn simulated_picoseconds(&self, picoseconds_per_tick: u64) -> u128 {
        self.elapsed_ticks as u128 * picoseconds_per_tick as u128
    }

    pub fn simulated_nanoseconds(&self, picoseconds_per_tick: u64) -> u128 {
        self.simulated_picoseconds(picoseconds_per_tick) / 1_000
    }

    pub fn simulated_microseconds(&self, picoseconds_per_tick: u64) -> u128 {
        self.simulated_picoseconds(picoseconds_per_tick) / 1_000_000
    }

    pub fn simulated_milliseconds(&self, picoseconds_per_tick: u64) -> u128 {
        self.simulated_picoseconds(picoseconds_per_tick) / 1_000_000_000
    }

    pub fn simulated_seconds(&self, picoseconds_per_tick: u64) -> f64 {
        self.simulated_picoseconds(picoseconds_per_tick) as f64 / 1e12
    }

    /// Ticks processed per wall-clock second, or `None` if timing wasn't
    /// requested or no time elapsed.
    pub fn ticks_per_second(&self) -> Option<f64> {
        let secs = self.wall_time.as_secs_f64();
        if secs > 0.0 {
            Some(self.ticks_run as f64 / secs)
        } else {
            None
        }
    }

    pub fn default_picoseconds_per_tick(&self) -> u64 {
        self.picoseconds_per_tick
    }
}

/// Current process user-CPU time via `getrusage(RUSAGE_SELF, ...)`. `None`
/// on targets without it.
#[cfg(unix)]
pub(crate) fn user_cpu_time_now() -> Option<Duration> {
    // SAFETY: `usage` is zero-initialized and fully populated by the kernel
    // before `getrusage` returns 0; `RUSAGE_SELF` reads the calling process
    // only, no pointers beyond `&mut usage` are involved.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return None;
        }
        let secs = usage.ru_utime.tv_sec.max(0) as u64;
        let micros = usage.ru_utime.tv_usec.max(0) as u32;
        Some(Duration::new(secs, micros * 1_000))
    }
}

#[cfg(not(unix))]
pub(crate) fn user_cpu_time_now() -> Option<Duration> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_time_conversions_are_consistent() {
        let s = SchedulerStats::new(1_000, 1_000, Duration::from_millis(10), 0, None, 1_000);
        assert_eq!(s.simulated_picoseconds(1_000), 1_000_000);
        assert_eq!(s.simulated_nanoseconds(1_000), 1_000);
        assert_eq!(s.simulated_microseconds(1_000), 1);
    }

    #[test]
    fn ticks_per_second_is_none_without_timing() {
        let s = SchedulerStats::new(10, 10, Duration::ZERO, 0, None, 1);
        assert_eq!(s.ticks_per_second(), None);
    }

    #[test]
    fn events_fired_and_user_cpu_time_round_trip() {
        let s = SchedulerStats::new(10, 10, Duration::ZERO, 42, Some(Duration::from_millis(5)), 1);
        assert_eq!(s.events_fired, 42);
        assert_eq!(s.user_cpu_time, Some(Duration::from_millis(5)));
    }
}
