//! End-to-end scenarios exercising the scheduler, trigger subsystem, and
//! cross-thread ingress together.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;

use sim_kernel::error::SchedulerError;
use sim_kernel::scheduleable::SchedulingPhase;
use sim_kernel::trigger::{Comparator, Counter, CounterTrigger, TriggerManager};
use sim_kernel::{Clock, CrossThreadHandle, Event, Handler, Scheduler, SingleCycleUniqueEvent};

#[test]
fn phase_ordering_at_a_single_tick() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let order = Rc::new(RefCell::new(Vec::new()));

    let events: Vec<Event> = SchedulingPhase::ALL
        .iter()
        .map(|&phase| {
            let order = order.clone();
            Event::new(
                Handler::new0(format!("{phase:?}"), move || order.borrow_mut().push(phase)),
                phase,
                0,
                &clock,
            )
            .expect("failed to bind phase event")
        })
        .collect();

    scheduler.finalize().expect("failed to finalize scheduler");

    // Schedule in reverse phase order: PostTick first, Trigger last.
    for event in events.iter().rev() {
        event.schedule(2, None).expect("failed to schedule phase event");
    }

    scheduler.run(5, false, false).expect("scheduler run failed");

    assert_eq!(*order.borrow(), SchedulingPhase::ALL.to_vec());
}

#[test]
fn precedence_violation_is_caught_when_a_handler_schedules_backward() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let violation: Rc<RefCell<Option<SchedulerError>>> = Rc::new(RefCell::new(None));

    let b = Event::new(Handler::new0("B", || {}), SchedulingPhase::Tick, 0, &clock)
        .expect("failed to bind B");
    let a = {
        let b = b.clone();
        let violation = violation.clone();
        Event::new(
            Handler::new0("A", move || {
                if let Err(e) = b.schedule(0, None) {
                    *violation.borrow_mut() = Some(e);
                }
            }),
            SchedulingPhase::Tick,
            0,
            &clock,
        )
        .expect("failed to bind A")
    };
    // B must fire before A, so A's group is strictly greater than B's.
    b.precedes(&a).expect("failed to add precedence edge");

    scheduler.finalize().expect("failed to finalize scheduler");
    b.schedule(3, None).expect("failed to schedule B");
    a.schedule(3, None).expect("failed to schedule A");

    scheduler.run(5, false, false).expect("scheduler run failed");

    let violation_ref = violation.borrow();
    match violation_ref.as_ref() {
        Some(SchedulerError::PrecedenceViolation { violator, .. }) => {
            assert_eq!(violator, "B");
        }
        other => panic!("expected a precedence violation, got {other:?}"),
    }
}

#[test]
fn single_cycle_unique_event_fires_at_most_once_per_tick() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let count = Rc::new(Cell::new(0u32));
    let c = count.clone();

    let event = SingleCycleUniqueEvent::new(
        Handler::new0("e", move || c.set(c.get() + 1)),
        SchedulingPhase::Tick,
        &clock,
    )
    .expect("failed to bind event");

    scheduler.finalize().expect("failed to finalize scheduler");

    for i in 0..100 {
        event.schedule(if i % 2 == 0 { 0 } else { 1 }).expect("schedule failed");
    }

    scheduler.run(3, false, false).expect("scheduler run failed");

    assert_eq!(count.get(), 2, "expected one fire at the current tick and one at the next");
}

struct CountUp(Cell<u64>);
impl Counter for CountUp {
    fn get(&self) -> u64 {
        self.0.get()
    }
}

#[test]
fn counter_trigger_stops_the_scheduler_at_threshold() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let counter = Rc::new(CountUp(Cell::new(0)));
    let manager = TriggerManager::new();

    const THRESHOLD: u64 = 25;
    let ct = CounterTrigger::new(&counter, Comparator::Ge, THRESHOLD);
    let stop_scheduler = scheduler.clone();
    manager
        .install_counter(
            &clock,
            "stop-at-threshold",
            ct,
            Handler::new0("stop-running", move || stop_scheduler.stop_running()),
        )
        .expect("failed to install trigger");

    scheduler.finalize().expect("failed to finalize scheduler");

    for _ in 0..(THRESHOLD * 4) {
        counter.0.set(counter.0.get() + 1);
        scheduler.run(1, false, false).expect("scheduler run failed");
        if counter.get() >= THRESHOLD {
            break;
        }
    }

    assert_eq!(counter.get(), THRESHOLD);
}

#[test]
fn restart_at_rewinds_ticks_and_clears_pending_events() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let count = Rc::new(Cell::new(0u32));
    let c = count.clone();
    let event = Event::new(
        Handler::new0("tick", move || c.set(c.get() + 1)),
        SchedulingPhase::Tick,
        0,
        &clock,
    )
    .expect("failed to bind event");

    scheduler.finalize().expect("failed to finalize scheduler");
    event.schedule(5, None).expect("schedule failed");
    scheduler.run(10, false, false).expect("scheduler run failed");
    assert_eq!(count.get(), 1);

    scheduler.restart_at(0);
    assert_eq!(scheduler.current_tick(), 0);
    assert_eq!(scheduler.elapsed_ticks(), 0);
    assert_eq!(scheduler.next_event_tick(), None);

    scheduler.run(1, false, false).expect("scheduler run failed after restart");
}

#[test]
fn async_ingress_delivers_every_cross_thread_schedule_exactly_once() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let count = Rc::new(Cell::new(0u32));
    let c = count.clone();
    let event = Event::new(
        Handler::new0("async-target", move || c.set(c.get() + 1)),
        SchedulingPhase::Tick,
        0,
        &clock,
    )
    .expect("failed to bind event");

    scheduler.finalize().expect("failed to finalize scheduler");

    const DELIVERIES: usize = 1000;
    let handles: Vec<CrossThreadHandle> = (0..DELIVERIES)
        .map(|_| CrossThreadHandle::new(event.as_scheduleable().clone()))
        .collect();
    let ingress = scheduler.async_ingress();

    let producer = thread::spawn(move || {
        for handle in handles {
            ingress.schedule(handle, 3);
        }
    });
    producer.join().expect("producer thread panicked");

    scheduler.run(20, false, false).expect("scheduler run failed");

    assert_eq!(count.get() as usize, DELIVERIES);
}
