//! Liveness watchdog hook (C9).
//!
//! Grounded on `examples/original_source/sparta/sparta/kernel/SleeperThreadBase.hpp`
//! / `SleeperThread.hpp`: a background thread that expects to be "kicked"
//! periodically and aborts the process if it isn't, used in the original to
//! catch a simulation wedged in an infinite same-tick reschedule loop. This
//! crate can't abort the host process from a library, so it stops the
//! scheduler instead (`Scheduler::stop_running`) the next time `check()` is
//! polled from the scheduler's own thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::error;

use crate::scheduler::Scheduler;

/// Kicked once per tick by the run loop, then polled via `check()` on the
/// same tick. Implementations decide what "no kick for too long" means and
/// how to react; `check()` is the only place it's safe to touch the
/// scheduler, since it runs on the scheduler's own thread.
pub trait Watchdog {
    fn kick(&mut self);

    /// Called once per tick, right after `kick()`, on the scheduler's own
    /// thread. The default does nothing.
    fn check(&mut self) {}
}

/// The default: does nothing. Equivalent to never calling
/// `Scheduler::enable_watchdog`.
pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn kick(&mut self) {}
}

/// Spawns a background thread that checks, every `interval`, whether it has
/// been kicked since the last check. A missed kick only raises a flag from
/// that thread — `Scheduler` is `Rc`-backed and not `Send`, so it can't be
/// touched from there — `check()` then stops the scheduler from its own
/// thread the next time the run loop polls it.
pub struct ThreadWatchdog {
    kicked: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    stalled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    scheduler: Scheduler,
}

impl ThreadWatchdog {
    pub fn new(scheduler: Scheduler, interval: Duration) -> Self {
        let kicked = Arc::new(AtomicBool::new(true));
        let generation = Arc::new(AtomicU64::new(0));
        let stalled = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let (k, g, st, s) = (kicked.clone(), generation.clone(), stalled.clone(), stop.clone());
        let handle = std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            if s.load(Ordering::Acquire) {
                return;
            }
            if !k.swap(false, Ordering::AcqRel) {
                error!(
                    "watchdog: no kick received in {interval:?} (generation {})",
                    g.load(Ordering::Acquire)
                );
                st.store(true, Ordering::Release);
            }
        });
        ThreadWatchdog {
            kicked,
            generation,
            stalled,
            stop,
            handle: Some(handle),
            scheduler,
        }
    }
}

impl Watchdog for ThreadWatchdog {
    fn kick(&mut self) {
        self.kicked.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn check(&mut self) {
        if self.stalled.swap(false, Ordering::AcqRel) {
            error!("watchdog: stopping scheduler after a missed kick");
            self.scheduler.stop_running();
        }
    }
}

impl Drop for ThreadWatchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_watchdog_accepts_kicks() {
        let mut w = NullWatchdog;
        w.kick();
        w.check();
    }

    #[test]
    fn thread_watchdog_can_be_kicked_and_dropped() {
        let scheduler = Scheduler::new();
        let mut w = ThreadWatchdog::new(scheduler, Duration::from_millis(20));
        w.kick();
        std::thread::sleep(Duration::from_millis(5));
        w.kick();
        w.check();
    }

    #[test]
    fn thread_watchdog_stops_scheduler_after_missed_kick() {
        use crate::clock::Clock;

        let scheduler = Scheduler::new();
        Clock::new_root("root", &scheduler);
        scheduler.finalize().unwrap();
        let mut w = ThreadWatchdog::new(scheduler.clone(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(40));
        w.check();
        let stats = scheduler.run(10, false, false).unwrap();
        assert_eq!(stats.ticks_run, 0);
    }
}
