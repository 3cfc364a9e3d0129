//! The simulation kernel's core: per-tick event queue, run loop, and the
//! cross-thread async-ingress boundary (C5).
//!
//! Grounded on `examples/original_source/sparta/sparta/kernel/Scheduler.hpp`
//! / `src/Scheduler.cpp` for the `finalize`/`scheduleEvent`/`run`/
//! `restartAt` state machine, and on this corpus's `log`-based phase
//! dispatch (`other_examples/.../pet-filter/.../scheduler.rs.rs`).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::clock::{self, Clock};
use crate::dag::Dag;
use crate::error::{Result, SchedulerError};
use crate::handler::Handler;
use crate::scheduleable::Scheduleable;
use crate::stats::SchedulerStats;
use crate::tick_quantum::{TickQuantum, TickQuantumPool};
use crate::watchdog::{NullWatchdog, Watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Building,
    Idle,
    Running,
}

struct AsyncEntry {
    sched: CrossThreadHandle,
    rel_tick: u64,
}

/// A `Scheduleable` handle that may cross a thread boundary on its way into
/// the scheduler's async ingress queue. Sound because the wrapped value is
/// only ever dereferenced after it has been popped back off the
/// mutex-guarded queue on the scheduler's own thread; while in flight it is
/// opaque cargo, never read or cloned by the producer thread again.
pub struct CrossThreadHandle(Scheduleable);

unsafe impl Send for CrossThreadHandle {}

impl CrossThreadHandle {
    /// Wrap a scheduleable for transit into another thread's closure. The
    /// scheduleable itself is `Rc`-backed and not `Send`; this handle is
    /// the only thing allowed to cross.
    pub fn new(sched: Scheduleable) -> Self {
        CrossThreadHandle(sched)
    }
}

/// A cloneable, `Send` handle onto a scheduler's async ingress queue, for
/// producer threads that cannot hold the (`Rc`-backed) [`Scheduler`]
/// itself. Obtained via [`Scheduler::async_ingress`].
#[derive(Clone)]
pub struct AsyncIngress {
    queue: Arc<Mutex<VecDeque<AsyncEntry>>>,
    pending: Arc<AtomicBool>,
}

impl AsyncIngress {
    /// Enqueue `handle` to be scheduled `rel_tick` ticks after whatever
    /// `current_tick` is when the owning scheduler next drains this queue
    /// (once per tick, at the top of its run loop).
    pub fn schedule(&self, handle: CrossThreadHandle, rel_tick: u64) {
        let mut q = self.queue.lock().expect("async queue poisoned");
        q.push_back(AsyncEntry {
            sched: handle,
            rel_tick,
        });
        self.pending.store(true, Ordering::Release);
    }
}

struct SchedulerInner {
    state: SchedulerState,
    dag: Dag,
    clocks: Vec<Clock>,
    group_count: u32,
    pool: TickQuantumPool,
    head: Option<Box<TickQuantum>>,
    current_tick: u64,
    elapsed_ticks: u64,
    events_fired: u64,
    first_tick: bool,
    current_group_firing: Option<u32>,
    stop_requested: bool,
    /// No pending continuing events past `latest_continuing_event` (and
    /// `clear_events`/fresh construction both start here). Scheduling any
    /// continuing event clears it; the run loop re-derives it once per tick
    /// from `latest_continuing_event` vs. the next queued tick.
    finished: bool,
    /// Furthest absolute tick any still-pending *continuing* event targets.
    /// Only meaningful while `!finished`.
    latest_continuing_event: u64,
    async_queue: Arc<Mutex<VecDeque<AsyncEntry>>>,
    async_pending: Arc<AtomicBool>,
    watchdog: Box<dyn Watchdog>,
    startup_events: VecDeque<Handler>,
    startup_drained: bool,
}

/// Owns the precedence DAG, the clock tree, and the tick-indexed event
/// queue. Cheap to clone; clones share the same kernel instance.
#[derive(Clone)]
pub struct Scheduler(Rc<RefCell<SchedulerInner>>);

impl Scheduler {
    pub fn new() -> Self {
        Scheduler(Rc::new(RefCell::new(SchedulerInner {
            state: SchedulerState::Building,
            dag: Dag::default(),
            clocks: Vec::new(),
            group_count: 0,
            pool: TickQuantumPool::default(),
            head: None,
            current_tick: 0,
            elapsed_ticks: 0,
            events_fired: 0,
            first_tick: true,
            current_group_firing: None,
            stop_requested: false,
            finished: true,
            latest_continuing_event: 0,
            async_queue: Arc::new(Mutex::new(VecDeque::new())),
            async_pending: Arc::new(AtomicBool::new(false)),
            watchdog: Box::new(NullWatchdog),
            startup_events: VecDeque::new(),
            startup_drained: false,
        })))
    }

    /// Queue a zero-argument handler to run once, in FIFO order with every
    /// other startup handler, at the very start of the first `run` call
    /// after `finalize`.
    pub fn add_startup_event(&self, handler: Handler) {
        self.0.borrow_mut().startup_events.push_back(handler);
    }

    fn drain_startup_events(&self) {
        let mut inner = self.0.borrow_mut();
        if inner.startup_drained {
            return;
        }
        inner.startup_drained = true;
        let handlers: Vec<Handler> = inner.startup_events.drain(..).collect();
        drop(inner);
        for h in handlers {
            trace!("startup event '{}'", h.name());
            h.invoke0();
        }
    }

    pub fn same_as(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn register_clock(&self, clock: Clock) {
        self.0.borrow_mut().clocks.push(clock);
    }

    pub fn with_dag<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Dag) -> R,
    {
        f(&self.0.borrow().dag)
    }

    pub fn with_dag_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Dag) -> R,
    {
        f(&mut self.0.borrow_mut().dag)
    }

    /// Install a watchdog that is kicked, then checked, once per tick while
    /// running.
    pub fn enable_watchdog(&self, watchdog: Box<dyn Watchdog>) {
        self.0.borrow_mut().watchdog = watchdog;
    }

    pub fn current_tick(&self) -> u64 {
        self.0.borrow().current_tick
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.0.borrow().elapsed_ticks
    }

    pub fn is_finalized(&self) -> bool {
        self.0.borrow().state != SchedulerState::Building
    }

    /// Freeze the precedence DAG, normalize every registered clock's
    /// period, and size the per-tick group buckets. Idempotent.
    pub fn finalize(&self) -> Result<u32> {
        let mut inner = self.0.borrow_mut();
        if inner.state != SchedulerState::Building {
            return Ok(inner.group_count);
        }
        let group_count = inner.dag.finalize()?;
        inner.group_count = group_count;
        let clocks = inner.clocks.clone();
        drop(inner);
        clock::normalize_clocks(&clocks);
        let mut inner = self.0.borrow_mut();
        inner.state = SchedulerState::Idle;
        debug!("scheduler finalized with {group_count} firing groups");
        Ok(group_count)
    }

    /// Append `sched` to the firing group at `current_tick + rel_tick`.
    /// `group` is the scheduleable's DAG-assigned group id (its position in
    /// the firing order within a single tick). Every bound scheduleable has
    /// a group of at least 1 (group 0 is reserved for the leading,
    /// handler-less phase-ordering vertex), so there is no need for the
    /// original's separate "group zero fires last" bucket: with every real
    /// scheduleable's group guaranteed >= 1 by construction, the firing
    /// order `0..group_count` already matches the phase chain.
    pub fn schedule_event(
        &self,
        sched: Scheduleable,
        rel_tick: u64,
        group: u32,
        continuing: bool,
    ) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.state == SchedulerState::Building {
            return Err(SchedulerError::LifecycleMisuse(
                "cannot schedule events before the scheduler is finalized".into(),
            ));
        }
        if rel_tick == 0 {
            if let Some(firing) = inner.current_group_firing {
                if group < firing {
                    return Err(SchedulerError::PrecedenceViolation {
                        violator: sched.label(),
                        target_group: group,
                        firing: "<current tick>".into(),
                        firing_group: firing,
                    });
                }
            }
        }
        let tick = inner.current_tick + rel_tick;
        let group_count = inner.group_count.max(1) as usize;
        let SchedulerInner { head, pool, .. } = &mut *inner;
        let slot = slot_for_tick(head, tick);
        match slot {
            Some(q) if q.tick == tick => q.record(group as usize, sched.clone()),
            _ => {
                let mut q = pool.alloc(tick, group_count);
                q.record(group as usize, sched.clone());
                q.next = slot.take();
                *slot = Some(q);
            }
        }
        if continuing {
            inner.finished = false;
            inner.latest_continuing_event = inner.latest_continuing_event.max(tick);
        }
        trace!("scheduled '{}' at tick {tick}, group {group}", sched.label());
        Ok(())
    }

    /// True once there are no more pending continuing events — i.e. nothing
    /// left in the queue but, at most, events whose firing is merely
    /// incidental (non-continuing) rather than something driving the
    /// simulation forward.
    pub fn is_finished(&self) -> bool {
        self.0.borrow().finished
    }

    /// Absolute tick of the furthest-out continuing event still pending.
    /// Only meaningful when `is_finished()` is false; use `is_finished` to
    /// tell whether any continuing events remain at all.
    pub fn get_next_continuing_event_time(&self) -> u64 {
        self.0.borrow().latest_continuing_event
    }

    /// Cancel every pending instance of `sched` (or only the one at
    /// `current_tick + rel_tick`, if given).
    pub fn cancel_event(&self, sched: &Scheduleable, rel_tick: Option<u64>) {
        let mut inner = self.0.borrow_mut();
        let target_tick = rel_tick.map(|r| inner.current_tick + r);
        let SchedulerInner { head, pool, .. } = &mut *inner;
        let mut cur = head;
        while let Some(q) = cur {
            let matches_tick = target_tick.map_or(true, |t| t == q.tick);
            if matches_tick {
                for group in q.groups.iter_mut() {
                    group.retain(|s| !s.ptr_eq(sched));
                }
            }
            if q.groups.iter().all(Vec::is_empty) {
                let mut taken = cur.take().unwrap();
                *cur = taken.next.take();
                pool.free(taken);
            } else {
                cur = &mut cur.as_mut().unwrap().next;
            }
        }
    }

    pub fn is_scheduled(&self, sched: &Scheduleable, rel_tick: Option<u64>) -> bool {
        let inner = self.0.borrow();
        let target_tick = rel_tick.map(|r| inner.current_tick + r);
        let mut cur = &inner.head;
        while let Some(q) = cur {
            if target_tick.map_or(true, |t| t == q.tick)
                && q.groups.iter().any(|g| g.iter().any(|s| s.ptr_eq(sched)))
            {
                return true;
            }
            cur = &q.next;
        }
        false
    }

    /// Thread-safe ingress for scheduling from outside the scheduler's own
    /// thread. The event is queued and only spliced into the real queue the
    /// next time the run loop drains pending async events (once per tick).
    pub fn schedule_async_event(&self, sched: Scheduleable, rel_tick: u64) {
        let inner = self.0.borrow();
        let mut q = inner.async_queue.lock().expect("async queue poisoned");
        q.push_back(AsyncEntry {
            sched: CrossThreadHandle(sched),
            rel_tick,
        });
        inner.async_pending.store(true, Ordering::Release);
    }

    /// A `Send` handle onto this scheduler's async ingress queue, for
    /// producer threads that cannot hold `self` directly.
    pub fn async_ingress(&self) -> AsyncIngress {
        let inner = self.0.borrow();
        AsyncIngress {
            queue: inner.async_queue.clone(),
            pending: inner.async_pending.clone(),
        }
    }

    fn drain_async_events(&self) -> Result<()> {
        let pending = self.0.borrow().async_pending.swap(false, Ordering::AcqRel);
        if !pending {
            return Ok(());
        }
        let entries: Vec<AsyncEntry> = {
            let inner = self.0.borrow();
            let mut q = inner.async_queue.lock().expect("async queue poisoned");
            q.drain(..).collect()
        };
        for entry in entries {
            let sched = entry.sched.0;
            let group = match sched.group() {
                Some(g) => g,
                None => {
                    let vertex = sched.vertex().expect("bound scheduleable has a vertex");
                    let g = self.with_dag(|dag| dag.group_of(vertex)).unwrap_or(0);
                    sched.set_group(g);
                    g
                }
            };
            let continuing = sched.is_continuing();
            self.schedule_event(sched, entry.rel_tick, group, continuing)?;
        }
        Ok(())
    }

    /// Request the run loop stop after the current tick finishes firing.
    pub fn stop_running(&self) {
        self.0.borrow_mut().stop_requested = true;
    }

    /// Drop every pending event and rewind to tick `t`, matching the
    /// original's `restartAt`: elapsed ticks becomes `t` on the very first
    /// restart or a restart to tick 0, and `t + 1` otherwise (a restart
    /// mid-run always consumes the tick it restarts into).
    pub fn restart_at(&self, t: u64) {
        let mut inner = self.0.borrow_mut();
        let SchedulerInner { head, pool, .. } = &mut *inner;
        let mut cur = head.take();
        while let Some(mut q) = cur {
            cur = q.next.take();
            pool.free(q);
        }
        inner.current_tick = t;
        inner.elapsed_ticks = if inner.first_tick || t == 0 { t } else { t + 1 };
        inner.stop_requested = false;
        inner.finished = true;
        inner.latest_continuing_event = 0;
    }

    pub fn clear_events(&self) {
        self.restart_at(self.current_tick());
    }

    /// Tick of the next pending event, if any.
    pub fn next_event_tick(&self) -> Option<u64> {
        self.0.borrow().head.as_ref().map(|q| q.tick)
    }

    fn advance_clocks(&self, tick: u64) {
        let inner = self.0.borrow();
        for clock in &inner.clocks {
            clock.update_elapsed_cycles(tick);
        }
    }

    /// Run the scheduler for up to `num_ticks` further ticks (or until
    /// `stop_running` is called, or the queue empties). When `exacting` is
    /// true every intermediate tick is visited (clocks advance one tick at
    /// a time) even if it carries no events; otherwise the loop jumps
    /// straight to the next populated tick.
    pub fn run(&self, num_ticks: u64, exacting: bool, measure_time: bool) -> Result<SchedulerStats> {
        {
            let mut inner = self.0.borrow_mut();
            if inner.state == SchedulerState::Building {
                return Err(SchedulerError::LifecycleMisuse(
                    "cannot run before finalize()".into(),
                ));
            }
            inner.state = SchedulerState::Running;
            inner.stop_requested = false;
            // Current tick is 1-based and trails elapsed ticks; "first
            // tick" really means "has this scheduler ever run", and that's
            // only settled once a run actually starts, not on every
            // restart_at.
            inner.first_tick = false;
        }
        self.drain_startup_events();
        let wall_start = measure_time.then(Instant::now);
        let cpu_start = measure_time.then(crate::stats::user_cpu_time_now).flatten();
        let target = self.0.borrow().elapsed_ticks + num_ticks;
        let events_fired_start = self.0.borrow().events_fired;
        let mut ticks_run = 0u64;

        loop {
            self.drain_async_events()?;
            if self.0.borrow().stop_requested {
                break;
            }
            if self.0.borrow().elapsed_ticks >= target {
                break;
            }
            if self.0.borrow().finished {
                break;
            }
            let next_tick = match self.next_event_tick() {
                Some(t) => t,
                None => break,
            };
            let current = self.0.borrow().current_tick;
            if exacting {
                let mut t = current;
                while t < next_tick {
                    t += 1;
                    self.advance_clocks(t);
                }
            } else {
                self.advance_clocks(next_tick);
            }
            self.0.borrow_mut().current_tick = next_tick;

            let mut quantum = {
                let mut inner = self.0.borrow_mut();
                let mut head = inner.head.take().expect("next_event_tick guaranteed Some");
                debug_assert_eq!(head.tick, next_tick);
                inner.head = head.next.take();
                head
            };
            self.fire_quantum(&mut quantum)?;
            {
                let mut inner = self.0.borrow_mut();
                inner.pool.free(quantum);
                inner.elapsed_ticks += 1;
                // No more quantums queued, or nothing left in them is worth
                // waking up for: mirrors the original's post-fire check
                // right down to "finished" meaning "no continuing events
                // left", not "queue is literally empty".
                inner.finished = match inner.head.as_ref() {
                    None => true,
                    Some(q) => inner.latest_continuing_event < q.tick,
                };
            }
            // Pull the watchdog out before kicking/checking it: `check()`
            // may call `stop_running()`, which needs its own `borrow_mut`
            // of this same scheduler and would panic if one were still
            // held here.
            let mut watchdog = std::mem::replace(
                &mut self.0.borrow_mut().watchdog,
                Box::new(NullWatchdog),
            );
            watchdog.kick();
            watchdog.check();
            self.0.borrow_mut().watchdog = watchdog;
            ticks_run += 1;
        }

        self.0.borrow_mut().current_tick += 1;
        self.0.borrow_mut().state = SchedulerState::Idle;
        let wall = wall_start.map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
        let user_cpu_time = cpu_start.and_then(|start| {
            crate::stats::user_cpu_time_now().map(|now| now.saturating_sub(start))
        });
        let events_fired = self.0.borrow().events_fired - events_fired_start;
        Ok(SchedulerStats::new(
            self.elapsed_ticks(),
            ticks_run,
            wall,
            events_fired,
            user_cpu_time,
            1,
        ))
    }

    fn fire_quantum(&self, quantum: &mut TickQuantum) -> Result<()> {
        for group_idx in quantum.first_group_idx..quantum.groups.len() {
            if quantum.groups[group_idx].is_empty() {
                continue;
            }
            self.0.borrow_mut().current_group_firing = Some(group_idx as u32);
            // Index-driven drain so re-entrant scheduling into this same
            // group (rel_tick 0, target group >= the one firing) during a
            // handler can append and still be observed this pass.
            let mut i = 0;
            while i < quantum.groups[group_idx].len() {
                let sched = quantum.groups[group_idx][i].clone();
                trace!(
                    "firing '{}' (phase {:?}, group {group_idx})",
                    sched.label(),
                    sched.phase()
                );
                sched.handler().invoke0();
                self.0.borrow_mut().events_fired += 1;
                i += 1;
            }
            quantum.groups[group_idx].clear();
        }
        self.0.borrow_mut().current_group_firing = None;
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Scheduler")
            .field("state", &inner.state)
            .field("current_tick", &inner.current_tick)
            .field("elapsed_ticks", &inner.elapsed_ticks)
            .finish()
    }
}

fn slot_for_tick(head: &mut Option<Box<TickQuantum>>, tick: u64) -> &mut Option<Box<TickQuantum>> {
    let mut cur = head;
    loop {
        let advance = matches!(cur, Some(q) if q.tick < tick);
        if advance {
            cur = &mut cur.as_mut().unwrap().next;
        } else {
            return cur;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::scheduleable::SchedulingPhase;
    use std::cell::Cell;

    fn basic_clock(scheduler: &Scheduler) -> Clock {
        Clock::new_root("root", scheduler)
    }

    #[test]
    fn schedule_then_run_fires_handler() {
        let scheduler = Scheduler::new();
        let clock = basic_clock(&scheduler);
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let sched = Scheduleable::new(
            Handler::new0("h", move || f.set(true)),
            0,
            SchedulingPhase::Tick,
        );
        sched.set_clock(clock).unwrap();
        scheduler.finalize().unwrap();
        sched.schedule(1, None).unwrap();
        scheduler.run(5, false, false).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn precedence_order_is_respected() {
        let scheduler = Scheduler::new();
        let clock = basic_clock(&scheduler);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let a = Scheduleable::new(
            Handler::new0("a", move || o1.borrow_mut().push("a")),
            0,
            SchedulingPhase::Tick,
        );
        let b = Scheduleable::new(
            Handler::new0("b", move || o2.borrow_mut().push("b")),
            0,
            SchedulingPhase::Tick,
        );
        a.set_clock(clock.clone()).unwrap();
        b.set_clock(clock).unwrap();
        a.precedes(&b).unwrap();
        scheduler.finalize().unwrap();
        a.schedule(1, None).unwrap();
        b.schedule(1, None).unwrap();
        scheduler.run(5, false, false).unwrap();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn restart_at_zero_resets_elapsed_ticks() {
        let scheduler = Scheduler::new();
        basic_clock(&scheduler);
        scheduler.finalize().unwrap();
        scheduler.restart_at(0);
        assert_eq!(scheduler.elapsed_ticks(), 0);
        assert_eq!(scheduler.current_tick(), 0);
    }

    #[test]
    fn cancel_prevents_firing() {
        let scheduler = Scheduler::new();
        let clock = basic_clock(&scheduler);
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let sched = Scheduleable::new(
            Handler::new0("h", move || f.set(true)),
            0,
            SchedulingPhase::Tick,
        );
        sched.set_clock(clock).unwrap();
        scheduler.finalize().unwrap();
        sched.schedule(2, None).unwrap();
        sched.cancel(None).unwrap();
        scheduler.run(5, false, false).unwrap();
        assert!(!fired.get());
    }
}
