//! Per-tick predicate → user callback, with lifecycle managed by a
//! per-clock dispatcher (C7).
//!
//! Grounded on `examples/original_source/sparta/sparta/trigger/` —
//! `ManagedTrigger.hpp` (check/deregister/callback lifecycle),
//! `SingleTrigger.hpp`/`CounterTrigger` (comparator-configurable threshold
//! check), `ContextCounterTrigger.hpp` (named aggregation functions), and
//! `TriggerManager.hpp` (one self-rescheduling `ClockHandler` event per
//! clock with at least one live trigger).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::event::{schedule_startup_event, Event};
use crate::handler::Handler;
use crate::scheduleable::SchedulingPhase;

/// One of the six comparators a [`CounterTrigger`] may check its threshold
/// with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Comparator {
    fn holds(self, value: u64, threshold: u64) -> bool {
        match self {
            Comparator::Eq => value == threshold,
            Comparator::Ne => value != threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Le => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
        }
    }
}

/// Anything a [`CounterTrigger`] can read a current value from. A real
/// counter type lives outside this crate's scope (§1 Non-goals); this is
/// the minimal read seam the trigger subsystem needs.
pub trait Counter {
    fn get(&self) -> u64;
}

/// Shared predicate + one-shot user callback, owned by a [`TriggerManager`]
/// while active. `check()` evaluates the predicate and, on success,
/// deregisters itself and invokes the callback exactly once.
pub struct ManagedTrigger {
    label: String,
    predicate: Box<dyn Fn() -> bool>,
    callback: RefCell<Option<Handler>>,
    active: RefCell<bool>,
}

impl ManagedTrigger {
    fn new(label: impl Into<String>, predicate: Box<dyn Fn() -> bool>, callback: Handler) -> Rc<Self> {
        Rc::new(ManagedTrigger {
            label: label.into(),
            predicate,
            callback: RefCell::new(Some(callback)),
            active: RefCell::new(true),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Evaluate the predicate; if it holds, deactivate and fire the
    /// callback. Returns whether it fired.
    fn check(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        if (self.predicate)() {
            *self.active.borrow_mut() = false;
            if let Some(cb) = self.callback.borrow_mut().take() {
                cb.invoke0();
            }
            true
        } else {
            false
        }
    }
}

/// A trigger that fires once a [`Counter`]'s value satisfies a comparator
/// against a fixed threshold. Holds only a weak reference to the counter:
/// per spec.md §7, if the counter is gone the trigger must already have
/// been deregistered (by the counter's own teardown), never evaluated.
pub struct CounterTrigger<C: Counter> {
    counter: Weak<C>,
    comparator: Comparator,
    threshold: u64,
}

impl<C: Counter + 'static> CounterTrigger<C> {
    pub fn new(counter: &Rc<C>, comparator: Comparator, threshold: u64) -> Self {
        CounterTrigger {
            counter: Rc::downgrade(counter),
            comparator,
            threshold,
        }
    }

    fn get_counter(&self) -> Result<Rc<C>> {
        self.counter.upgrade().ok_or_else(|| {
            SchedulerError::TriggerTargetVanished(
                "counter backing a CounterTrigger no longer exists".into(),
            )
        })
    }

    /// Build the boxed predicate a [`ManagedTrigger`] evaluates each tick.
    pub fn into_predicate(self) -> Box<dyn Fn() -> bool> {
        Box::new(move || match self.get_counter() {
            Ok(counter) => self.comparator.holds(counter.get(), self.threshold),
            Err(_) => false,
        })
    }
}

/// Named aggregation functions for context-counter triggers
/// (`ContextCounterTrigger.hpp`'s registry): `"sum"`, `"max"`, `"min"`,
/// `"avg"` are seeded; callers may register more.
pub struct AggregateRegistry {
    functions: HashMap<String, Rc<dyn Fn(&[u64]) -> u64>>,
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        let mut functions: HashMap<String, Rc<dyn Fn(&[u64]) -> u64>> = HashMap::new();
        functions.insert("sum".into(), Rc::new(|v: &[u64]| v.iter().sum()));
        functions.insert("max".into(), Rc::new(|v: &[u64]| v.iter().copied().max().unwrap_or(0)));
        functions.insert("min".into(), Rc::new(|v: &[u64]| v.iter().copied().min().unwrap_or(0)));
        functions.insert(
            "avg".into(),
            Rc::new(|v: &[u64]| {
                if v.is_empty() {
                    0
                } else {
                    v.iter().sum::<u64>() / v.len() as u64
                }
            }),
        );
        AggregateRegistry { functions }
    }
}

impl AggregateRegistry {
    pub fn register(&mut self, name: impl Into<String>, f: impl Fn(&[u64]) -> u64 + 'static) {
        self.functions.insert(name.into(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Fn(&[u64]) -> u64>> {
        self.functions.get(name).cloned()
    }
}

/// Owns every live [`ManagedTrigger`] for one [`Clock`], dispatched from a
/// single self-rescheduling `Event` in the Trigger phase (one per clock
/// that has at least one active trigger, matching the original's
/// per-clock `ClockHandler`).
struct ClockHandler {
    clock: Clock,
    triggers: RefCell<Vec<Rc<ManagedTrigger>>>,
    pending_add: RefCell<Vec<Rc<ManagedTrigger>>>,
    event: RefCell<Option<Event>>,
}

impl ClockHandler {
    fn tick(self: &Rc<Self>) {
        let mut fired_indices = Vec::new();
        {
            let triggers = self.triggers.borrow();
            for (i, t) in triggers.iter().enumerate() {
                if t.check() {
                    fired_indices.push(i);
                }
            }
        }
        if !fired_indices.is_empty() {
            let mut triggers = self.triggers.borrow_mut();
            for i in fired_indices.into_iter().rev() {
                triggers.remove(i);
            }
        }
        let mut pending = self.pending_add.borrow_mut();
        if !pending.is_empty() {
            self.triggers.borrow_mut().append(&mut pending);
        }
        drop(pending);
        if let Some(ev) = self.event.borrow().as_ref() {
            let _ = ev.schedule(1, None);
        }
    }
}

/// Owns one [`ClockHandler`] per clock with at least one live trigger.
/// Installing the first trigger on a clock lazily spins up its handler's
/// self-rescheduling event; the handler is kept (but idle) once created,
/// matching the original's "handlers outlive their last trigger" behavior
/// since tearing down a scheduled `Event` mid-run is unsound here.
#[derive(Default)]
pub struct TriggerManager {
    handlers: RefCell<HashMap<usize, Rc<ClockHandler>>>,
    aggregates: RefCell<AggregateRegistry>,
}

impl TriggerManager {
    pub fn new() -> Self {
        TriggerManager {
            handlers: RefCell::new(HashMap::new()),
            aggregates: RefCell::new(AggregateRegistry::default()),
        }
    }

    pub fn register_aggregate_fn(&self, name: impl Into<String>, f: impl Fn(&[u64]) -> u64 + 'static) {
        self.aggregates.borrow_mut().register(name, f);
    }

    pub fn aggregate_fn(&self, name: &str) -> Option<Rc<dyn Fn(&[u64]) -> u64>> {
        self.aggregates.borrow().get(name)
    }

    fn clock_key(clock: &Clock) -> usize {
        clock.identity_key()
    }

    fn handler_for(&self, clock: &Clock) -> Result<Rc<ClockHandler>> {
        let key = Self::clock_key(clock);
        if let Some(h) = self.handlers.borrow().get(&key) {
            return Ok(h.clone());
        }
        let handler = Rc::new(ClockHandler {
            clock: clock.clone(),
            triggers: RefCell::new(Vec::new()),
            pending_add: RefCell::new(Vec::new()),
            event: RefCell::new(None),
        });
        let weak = Rc::downgrade(&handler);
        let event = Event::new(
            Handler::new0(
                format!("trigger-dispatch[{}]", clock.name()),
                move || {
                    if let Some(h) = weak.upgrade() {
                        h.tick();
                    }
                },
            ),
            SchedulingPhase::Trigger,
            1,
            clock,
        )?;
        *handler.event.borrow_mut() = Some(event.clone());
        // The dispatch chain's first link can only be scheduled once the
        // scheduler is finalized; `install` may run before that, so kick
        // it off from a startup event instead of scheduling here directly.
        schedule_startup_event(
            &clock.scheduler(),
            Handler::new0(format!("trigger-dispatch-start[{}]", clock.name()), move || {
                let _ = event.schedule(1, None);
            }),
        );
        self.handlers.borrow_mut().insert(key, handler.clone());
        Ok(handler)
    }

    /// Install a predicate-driven trigger on `clock`, to be checked once
    /// per cycle until it fires (or is cancelled).
    pub fn install(
        &self,
        clock: &Clock,
        label: impl Into<String>,
        predicate: Box<dyn Fn() -> bool>,
        callback: Handler,
    ) -> Result<Rc<ManagedTrigger>> {
        let trigger = ManagedTrigger::new(label, predicate, callback);
        let handler = self.handler_for(clock)?;
        handler.pending_add.borrow_mut().push(trigger.clone());
        Ok(trigger)
    }

    /// Install a [`CounterTrigger`] as a convenience over [`Self::install`].
    pub fn install_counter<C: Counter + 'static>(
        &self,
        clock: &Clock,
        label: impl Into<String>,
        trigger: CounterTrigger<C>,
        callback: Handler,
    ) -> Result<Rc<ManagedTrigger>> {
        self.install(clock, label, trigger.into_predicate(), callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::cell::Cell;

    struct SimpleCounter(Cell<u64>);
    impl Counter for SimpleCounter {
        fn get(&self) -> u64 {
            self.0.get()
        }
    }

    #[test]
    fn counter_trigger_fires_once_threshold_reached() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let counter = Rc::new(SimpleCounter(Cell::new(0)));
        let manager = TriggerManager::new();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let ct = CounterTrigger::new(&counter, Comparator::Ge, 3);
        manager
            .install_counter(&clock, "reach-3", ct, Handler::new0("cb", move || f.set(f.get() + 1)))
            .unwrap();
        scheduler.finalize().unwrap();
        for _ in 0..10 {
            counter.0.set(counter.0.get() + 1);
            scheduler.run(1, false, false).unwrap();
        }
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn trigger_target_vanished_never_fires() {
        let predicate_counter = {
            let c = Rc::new(SimpleCounter(Cell::new(5)));
            let ct = CounterTrigger::new(&c, Comparator::Ge, 1);
            ct.into_predicate()
            // `c` drops here; the predicate's weak ref is now dangling.
        };
        assert!(!predicate_counter());
    }

    #[test]
    fn aggregate_registry_has_seeded_functions() {
        let reg = AggregateRegistry::default();
        assert_eq!((reg.get("sum").unwrap())(&[1, 2, 3]), 6);
        assert_eq!((reg.get("max").unwrap())(&[1, 5, 3]), 5);
        assert_eq!((reg.get("avg").unwrap())(&[2, 4]), 3);
    }
}
