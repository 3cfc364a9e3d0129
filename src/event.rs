//! Derived scheduleable flavors (C8): `Event`, `UniqueEvent`,
//! `SingleCycleUniqueEvent`, `PayloadEvent<T>`, `StartupEvent`.
//!
//! Grounded on spec.md §4.3.1/§4.3.2 and
//! `examples/original_source/sparta/sparta/events/` (`Event.hpp`,
//! `UniqueEvent.hpp`, `PayloadEvent.hpp`, `StartupEvent.hpp`): all but
//! `PayloadEvent` are thin policy wrappers around a single `Scheduleable`;
//! `PayloadEvent` pools one proxy `Scheduleable` per in-flight delivery so
//! the steady-state send path never allocates (Design Note 9).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::clock::Clock;
use crate::error::Result;
use crate::handler::Handler;
use crate::scheduleable::{Scheduleable, SchedulingPhase};
use crate::scheduler::Scheduler;

/// A plain scheduleable bound to a clock at construction time. The base
/// case every other event type in this module builds on.
#[derive(Clone, Debug)]
pub struct Event(Scheduleable);

impl Event {
    pub fn new(
        handler: Handler,
        phase: SchedulingPhase,
        delay_cycles: u64,
        clock: &Clock,
    ) -> Result<Self> {
        let sched = Scheduleable::new(handler, delay_cycles, phase);
        sched.set_clock(clock.clone())?;
        Ok(Event(sched))
    }

    pub fn as_scheduleable(&self) -> &Scheduleable {
        &self.0
    }

    pub fn precedes(&self, other: &Event) -> Result<()> {
        self.0.precedes(&other.0)
    }

    pub fn schedule(&self, delay: u64, clock: Option<&Clock>) -> Result<()> {
        self.0.schedule(delay, clock)
    }

    pub fn cancel(&self, rel_cycle: Option<u64>) -> Result<()> {
        self.0.cancel(rel_cycle)
    }

    pub fn is_scheduled(&self, rel_cycle: Option<u64>) -> bool {
        self.0.is_scheduled(rel_cycle)
    }
}

/// Guarantees at-most-once-per-tick firing: a `schedule` call that would
/// land on a tick this event is already pending at is a no-op.
#[derive(Clone, Debug)]
pub struct UniqueEvent(Event);

impl UniqueEvent {
    pub fn new(
        handler: Handler,
        phase: SchedulingPhase,
        delay_cycles: u64,
        clock: &Clock,
    ) -> Result<Self> {
        Ok(UniqueEvent(Event::new(handler, phase, delay_cycles, clock)?))
    }

    pub fn as_event(&self) -> &Event {
        &self.0
    }

    /// Schedule `delay` cycles out on `clock` (or the preset clock), unless
    /// an instance is already pending for that exact tick.
    pub fn schedule(&self, delay: u64, clock: Option<&Clock>) -> Result<()> {
        if self.0.is_scheduled(Some(delay)) {
            return Ok(());
        }
        self.0.schedule(delay, clock)
    }

    pub fn cancel(&self, rel_cycle: Option<u64>) -> Result<()> {
        self.0.cancel(rel_cycle)
    }

    pub fn is_scheduled(&self, rel_cycle: Option<u64>) -> bool {
        self.0.is_scheduled(rel_cycle)
    }
}

/// May only be scheduled 0 or 1 cycle into the future, and at most once per
/// tick no matter how many times `schedule(0|1)` is called for that tick
/// (spec.md P5). Memoizes the last two distinct target ticks it accepted.
#[derive(Clone, Debug)]
pub struct SingleCycleUniqueEvent {
    event: Event,
    clock: Clock,
    seen: Rc<Cell<[Option<u64>; 2]>>,
}

impl SingleCycleUniqueEvent {
    pub fn new(handler: Handler, phase: SchedulingPhase, clock: &Clock) -> Result<Self> {
        Ok(SingleCycleUniqueEvent {
            event: Event::new(handler, phase, 0, clock)?,
            clock: clock.clone(),
            seen: Rc::new(Cell::new([None, None])),
        })
    }

    pub fn as_event(&self) -> &Event {
        &self.event
    }

    /// `cycles` must be 0 or 1. Idempotent per target tick.
    pub fn schedule(&self, cycles: u64) -> Result<()> {
        debug_assert!(cycles <= 1, "SingleCycleUniqueEvent only accepts 0 or 1");
        let rel_tick = self.clock.period() * cycles;
        let target_tick = self.clock.scheduler().current_tick() + rel_tick;
        let seen = self.seen.get();
        if seen[0] == Some(target_tick) || seen[1] == Some(target_tick) {
            return Ok(());
        }
        self.event.as_scheduleable().schedule_relative_tick(rel_tick)?;
        self.seen.set([seen[1], Some(target_tick)]);
        Ok(())
    }

    pub fn cancel(&self) -> Result<()> {
        self.event.cancel(None)
    }
}

/// A pooled delivery slot for [`PayloadEvent`]: a proxy `Scheduleable`
/// carrying one `T` at a time, returned to the pool's free list once fired.
struct Proxy<T> {
    scheduleable: Scheduleable,
    payload: Rc<RefCell<Option<T>>>,
}

/// Delivers a `T` payload to a user callback some delay later. Allocates a
/// proxy `Scheduleable` per concurrently in-flight delivery and reuses them
/// from a free list, so steady-state sends (delivery count bounded) never
/// allocate after warm-up.
pub struct PayloadEvent<T: Clone + 'static> {
    phase: SchedulingPhase,
    clock: Clock,
    callback: Rc<RefCell<dyn FnMut(&T)>>,
    label: Rc<str>,
    /// The one proxy allocated through `set_clock` (and hence the one that
    /// owns a real DAG vertex). Every later proxy adopts its group/vertex
    /// via `Scheduleable::bind_like` instead of registering its own vertex,
    /// since `set_clock` is illegal once the scheduler is finalized and all
    /// proxies for a given `PayloadEvent` are, by construction, equivalent
    /// delivery points.
    template: Scheduleable,
    free: Rc<RefCell<Vec<Proxy<T>>>>,
}

impl<T: Clone + 'static> Clone for PayloadEvent<T> {
    fn clone(&self) -> Self {
        PayloadEvent {
            phase: self.phase,
            clock: self.clock.clone(),
            callback: self.callback.clone(),
            label: self.label.clone(),
            template: self.template.clone(),
            free: self.free.clone(),
        }
    }
}

impl<T: Clone + 'static> PayloadEvent<T> {
    /// Must be constructed before the owning scheduler is finalized: it
    /// allocates the shared DAG vertex every pooled proxy will later adopt.
    pub fn new<F: FnMut(&T) + 'static>(
        label: impl Into<Rc<str>>,
        phase: SchedulingPhase,
        clock: &Clock,
        callback: F,
    ) -> Result<Self> {
        let label: Rc<str> = label.into();
        let template = Scheduleable::new(Handler::new0(label.clone(), || {}), 0, phase);
        template.set_clock(clock.clone())?;
        Ok(PayloadEvent {
            phase,
            clock: clock.clone(),
            callback: Rc::new(RefCell::new(callback)),
            label,
            template,
            free: Rc::new(RefCell::new(Vec::new())),
        })
    }

    fn new_proxy(&self) -> Proxy<T> {
        let payload: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let cb = self.callback.clone();
        let free = self.free.clone();
        let slot = payload.clone();
        // The handler needs to hand its own scheduleable back to the free
        // list once it has fired, but it can only be built from that
        // handler in the first place; tie the knot with a self-reference
        // cell, filled in right after construction below.
        let self_ref: Rc<RefCell<Option<Scheduleable>>> = Rc::new(RefCell::new(None));
        let handler_self_ref = self_ref.clone();
        let handler_slot = slot.clone();
        let handler = Handler::new0(self.label.clone(), move || {
            let value = handler_slot.borrow_mut().take();
            if let Some(v) = value {
                (cb.borrow_mut())(&v);
            }
            if let Some(scheduleable) = handler_self_ref.borrow().clone() {
                free.borrow_mut().push(Proxy {
                    scheduleable,
                    payload: handler_slot.clone(),
                });
            }
        });
        let scheduleable = Scheduleable::new(handler, 0, self.phase);
        scheduleable.bind_like(&self.template);
        *self_ref.borrow_mut() = Some(scheduleable.clone());
        Proxy {
            scheduleable,
            payload,
        }
    }

    fn checkout(&self) -> Proxy<T> {
        self.free.borrow_mut().pop().unwrap_or_else(|| self.new_proxy())
    }

    /// Deliver `value` after `delay` cycles of this event's clock. The
    /// proxy returns itself to the free list from inside its own handler,
    /// once it has actually fired and consumed its payload — not here,
    /// since the delivery is still in flight at this point.
    pub fn schedule(&self, value: T, delay: u64) -> Result<()> {
        let proxy = self.checkout();
        *proxy.payload.borrow_mut() = Some(value);
        proxy.scheduleable.schedule(delay, Some(&self.clock))
    }
}

/// Enqueues a zero-argument handler to run exactly once, in FIFO order with
/// every other startup event, at the start of the first run after
/// finalization.
pub fn schedule_startup_event(scheduler: &Scheduler, handler: Handler) {
    scheduler.add_startup_event(handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::cell::Cell;

    #[test]
    fn unique_event_skips_duplicate_same_tick_schedule() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let ue =
            UniqueEvent::new(Handler::new0("u", move || c.set(c.get() + 1)), SchedulingPhase::Tick, 0, &clock)
                .unwrap();
        scheduler.finalize().unwrap();
        ue.schedule(2, None).unwrap();
        ue.schedule(2, None).unwrap();
        scheduler.run(5, false, false).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn single_cycle_unique_event_idempotent_per_tick() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let e = SingleCycleUniqueEvent::new(
            Handler::new0("s", move || c.set(c.get() + 1)),
            SchedulingPhase::Tick,
            &clock,
        )
        .unwrap();
        scheduler.finalize().unwrap();
        for _ in 0..5 {
            e.schedule(1).unwrap();
        }
        scheduler.run(3, false, false).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn payload_event_delivers_value() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        let pe = PayloadEvent::<u32>::new("p", SchedulingPhase::Tick, &clock, move |v: &u32| {
            r.borrow_mut().push(*v)
        })
        .unwrap();
        scheduler.finalize().unwrap();
        pe.schedule(7, 1).unwrap();
        pe.schedule(9, 2).unwrap();
        scheduler.run(5, false, false).unwrap();
        assert_eq!(*received.borrow(), vec![7, 9]);
    }

    #[test]
    fn startup_event_fires_once_at_first_run() {
        let scheduler = Scheduler::new();
        Clock::new_root("root", &scheduler);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        scheduler.finalize().unwrap();
        schedule_startup_event(&scheduler, Handler::new0("startup", move || c.set(c.get() + 1)));
        scheduler.run(1, false, false).unwrap();
        scheduler.run(1, false, false).unwrap();
        assert_eq!(count.get(), 1);
    }
}
