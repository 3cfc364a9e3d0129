//! Schedulable unit: handler + phase + group + delay + vertex (C4).

use std::cell::RefCell;
use std::rc::Rc;

use crate::clock::Clock;
use crate::dag::VertexId;
use crate::error::{Result, SchedulerError};
use crate::handler::Handler;
use crate::scheduler::Scheduler;

/// The seven fixed stages a tick is subdivided into. Declaration order is
/// firing order: `Trigger` always fires before `Update`, which always
/// fires before `PortUpdate`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulingPhase {
    Trigger = 0,
    Update = 1,
    PortUpdate = 2,
    Flush = 3,
    Collection = 4,
    Tick = 5,
    PostTick = 6,
}

impl SchedulingPhase {
    pub const COUNT: usize = 7;

    pub const ALL: [SchedulingPhase; Self::COUNT] = [
        SchedulingPhase::Trigger,
        SchedulingPhase::Update,
        SchedulingPhase::PortUpdate,
        SchedulingPhase::Flush,
        SchedulingPhase::Collection,
        SchedulingPhase::Tick,
        SchedulingPhase::PostTick,
    ];
}

pub(crate) struct ScheduleableInner {
    pub(crate) handler: Handler,
    pub(crate) phase: SchedulingPhase,
    pub(crate) preset_delay: u64,
    pub(crate) preset_clock: Option<Clock>,
    pub(crate) group: Option<u32>,
    pub(crate) vertex: Option<VertexId>,
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) label: String,
    pub(crate) continuing: bool,
}

/// A schedulable callback. Cheap to clone (reference-counted handle);
/// clones share identity for `isScheduled`/`cancel` purposes.
#[derive(Clone)]
pub struct Scheduleable(pub(crate) Rc<RefCell<ScheduleableInner>>);

impl Scheduleable {
    /// Construct a new scheduleable. `delay_cycles` is expressed in cycles
    /// of whatever clock is later bound via [`Scheduleable::set_clock`];
    /// `phase` is immutable for the scheduleable's lifetime.
    pub fn new(handler: Handler, delay_cycles: u64, phase: SchedulingPhase) -> Self {
        let label = handler.name().to_string();
        Scheduleable(Rc::new(RefCell::new(ScheduleableInner {
            handler,
            phase,
            preset_delay: delay_cycles,
            preset_clock: None,
            group: None,
            vertex: None,
            scheduler: None,
            label,
            continuing: true,
        })))
    }

    pub fn label(&self) -> String {
        self.0.borrow().label.clone()
    }

    pub fn phase(&self) -> SchedulingPhase {
        self.0.borrow().phase
    }

    pub fn set_continuing(&self, continuing: bool) {
        self.0.borrow_mut().continuing = continuing;
    }

    pub fn is_continuing(&self) -> bool {
        self.0.borrow().continuing
    }

    pub fn group(&self) -> Option<u32> {
        self.0.borrow().group
    }

    pub fn vertex(&self) -> Option<VertexId> {
        self.0.borrow().vertex
    }

    /// Identity used by `isScheduled`/`cancelEvent` pointer-equality scans.
    pub fn ptr_eq(&self, other: &Scheduleable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Bind this scheduleable to a clock (and transitively, a scheduler).
    /// The first call also allocates the backing DAG vertex and freezes
    /// the scheduler/vertex association per spec.
    pub fn set_clock(&self, clock: Clock) -> Result<()> {
        let scheduler = clock.scheduler();
        let mut inner = self.0.borrow_mut();
        if inner.scheduler.is_some() {
            return Err(SchedulerError::LifecycleMisuse(format!(
                "scheduleable '{}' already bound to a scheduler; clock/scheduler may not change",
                inner.label
            )));
        }
        let vertex = scheduler.with_dag_mut(|dag| dag.new_vertex(inner.label.clone(), false))?;
        let gop_before = scheduler.with_dag_mut(|dag| dag.get_gop(inner.phase))?;
        scheduler.with_dag_mut(|dag| dag.link(gop_before, vertex, "phase-entry"))?;
        if let Some(next_phase) = next_phase(inner.phase) {
            let gop_after = scheduler.with_dag_mut(|dag| dag.get_gop(next_phase))?;
            scheduler.with_dag_mut(|dag| dag.link(vertex, gop_after, "phase-exit"))?;
        }
        inner.preset_clock = Some(clock);
        inner.vertex = Some(vertex);
        inner.scheduler = Some(scheduler);
        Ok(())
    }

    /// Declare that `self` must fire before `other` within the same tick,
    /// should both be scheduled there. Both must share a phase and neither
    /// scheduler may be finalized yet.
    pub fn precedes(&self, other: &Scheduleable) -> Result<()> {
        self.precedes_labeled(other, "precedes")
    }

    pub fn precedes_labeled(&self, other: &Scheduleable, reason: &str) -> Result<()> {
        let (a_phase, a_vertex, a_label, scheduler) = {
            let inner = self.0.borrow();
            let scheduler = inner.scheduler.clone().ok_or_else(|| {
                SchedulerError::LifecycleMisuse(format!(
                    "scheduleable '{}' has no clock/scheduler bound; cannot add a precedence edge",
                    inner.label
                ))
            })?;
            let vertex = inner.vertex.expect("bound scheduleable always has a vertex");
            (inner.phase, vertex, inner.label.clone(), scheduler)
        };
        let (b_phase, b_vertex, b_label) = {
            let inner = other.0.borrow();
            let vertex = inner.vertex.ok_or_else(|| {
                SchedulerError::LifecycleMisuse(format!(
                    "scheduleable '{}' has no clock/scheduler bound; cannot add a precedence edge",
                    inner.label
                ))
            })?;
            (inner.phase, vertex, inner.label.clone())
        };
        if a_phase != b_phase {
            return Err(SchedulerError::PhaseMismatch {
                a: a_label,
                a_phase,
                b: b_label,
                b_phase,
            });
        }
        scheduler.with_dag_mut(|dag| dag.link(a_vertex, b_vertex, reason))
    }

    /// Low-level entry point: schedule at an absolute relative tick on the
    /// bound scheduler's queue. Used directly by derived event types that
    /// have already resolved their own delay-to-ticks translation.
    pub fn schedule_relative_tick(&self, rel_tick: u64) -> Result<()> {
        let (scheduler, group, label) = {
            let inner = self.0.borrow();
            let scheduler = inner.scheduler.clone().ok_or_else(|| {
                SchedulerError::LifecycleMisuse(format!(
                    "scheduleable '{}' has no clock/scheduler bound; cannot schedule",
                    inner.label
                ))
            })?;
            (scheduler, inner.group, inner.label.clone())
        };
        let group = match group {
            Some(g) => g,
            None => {
                // First schedule after finalize: resolve and cache the
                // group id so later calls skip the DAG lookup entirely.
                let vertex = self.vertex().expect("bound scheduleable has a vertex");
                let g = scheduler.with_dag(|dag| dag.group_of(vertex)).unwrap_or(0);
                self.set_group(g);
                g
            }
        };
        let _ = label;
        scheduler.schedule_event(self.clone(), rel_tick, group, self.is_continuing())
    }

    /// Translate `delay` (cycles of `clock`, or the preset clock if `None`)
    /// to ticks and schedule.
    pub fn schedule(&self, delay: u64, clock: Option<&Clock>) -> Result<()> {
        let rel_tick = {
            let inner = self.0.borrow();
            let clk = clock.or(inner.preset_clock.as_ref()).ok_or_else(|| {
                SchedulerError::LifecycleMisuse(format!(
                    "scheduleable '{}' has no clock to translate delay with",
                    inner.label
                ))
            })?;
            clk.period() * delay
        };
        self.schedule_relative_tick(rel_tick)
    }

    /// Cancel every pending instance of this scheduleable (or only the one
    /// at `rel_cycle`, if given) on the bound scheduler.
    pub fn cancel(&self, rel_cycle: Option<u64>) -> Result<()> {
        let (scheduler, rel_tick) = {
            let inner = self.0.borrow();
            let scheduler = inner.scheduler.clone().ok_or_else(|| {
                SchedulerError::LifecycleMisuse(format!(
                    "scheduleable '{}' has no clock/scheduler bound; cannot cancel",
                    inner.label
                ))
            })?;
            let rel_tick = match rel_cycle {
                Some(c) => {
                    let clk = inner.preset_clock.as_ref().ok_or_else(|| {
                        SchedulerError::LifecycleMisuse(
                            "cancel(rel_cycle) requires a bound clock".into(),
                        )
                    })?;
                    Some(clk.period() * c)
                }
                None => None,
            };
            (scheduler, rel_tick)
        };
        scheduler.cancel_event(self, rel_tick);
        Ok(())
    }

    pub fn is_scheduled(&self, rel_cycle: Option<u64>) -> bool {
        let inner = self.0.borrow();
        let scheduler = match inner.scheduler.clone() {
            Some(s) => s,
            None => return false,
        };
        let rel_tick = rel_cycle.map(|c| {
            inner
                .preset_clock
                .as_ref()
                .map(|clk| clk.period() * c)
                .unwrap_or(c)
        });
        drop(inner);
        scheduler.is_scheduled(self, rel_tick)
    }

    /// Called by `Scheduler::finalize()` once group ids are fixed.
    pub(crate) fn set_group(&self, group: u32) {
        self.0.borrow_mut().group = Some(group);
    }

    /// Adopt `template`'s scheduler/clock/group/vertex without touching the
    /// DAG. Used by pooled proxy allocators (e.g. `PayloadEvent`) to mint
    /// additional interchangeable scheduleables after `finalize()`, when
    /// allocating a fresh DAG vertex is no longer legal but every proxy for
    /// a given delivery point is, by construction, equivalent to the
    /// template for ordering purposes.
    pub(crate) fn bind_like(&self, template: &Scheduleable) {
        let t = template.0.borrow();
        let mut inner = self.0.borrow_mut();
        inner.scheduler = t.scheduler.clone();
        inner.preset_clock = t.preset_clock.clone();
        inner.group = t.group;
        inner.vertex = t.vertex;
    }

    pub(crate) fn handler(&self) -> Handler {
        self.0.borrow().handler.clone()
    }

    pub(crate) fn preset_delay(&self) -> u64 {
        self.0.borrow().preset_delay
    }
}

impl std::fmt::Debug for Scheduleable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Scheduleable")
            .field("label", &inner.label)
            .field("phase", &inner.phase)
            .field("group", &inner.group)
            .finish()
    }
}

/// Next phase in the fixed chain, if any.
pub(crate) fn next_phase(phase: SchedulingPhase) -> Option<SchedulingPhase> {
    let idx = phase as usize;
    SchedulingPhase::ALL.get(idx + 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::scheduler::Scheduler;

    #[test]
    fn phases_are_ordered() {
        assert!(SchedulingPhase::Trigger < SchedulingPhase::Update);
        assert!(SchedulingPhase::Tick < SchedulingPhase::PostTick);
    }

    #[test]
    fn binding_a_clock_allocates_a_vertex_once() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let s = Scheduleable::new(Handler::new0("h", || {}), 0, SchedulingPhase::Tick);
        s.set_clock(clock.clone()).unwrap();
        assert!(s.vertex().is_some());
        assert!(s.set_clock(clock).is_err());
    }

    #[test]
    fn precedes_rejects_phase_mismatch() {
        let scheduler = Scheduler::new();
        let clock = Clock::new_root("root", &scheduler);
        let a = Scheduleable::new(Handler::new0("a", || {}), 0, SchedulingPhase::Tick);
        let b = Scheduleable::new(Handler::new0("b", || {}), 0, SchedulingPhase::Update);
        a.set_clock(clock.clone()).unwrap();
        b.set_clock(clock).unwrap();
        assert!(matches!(
            a.precedes(&b),
            Err(SchedulerError::PhaseMismatch { .. })
        ));
    }
}
