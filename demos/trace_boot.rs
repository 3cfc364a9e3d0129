//! Boot trace logger - captures one snapshot per tick of which handlers
//! fired and the scheduler's elapsed-tick counter, for eyeballing group
//! ordering across a small multi-clock graph.

use std::cell::RefCell;
use std::rc::Rc;

use clap::Parser;
use sim_kernel::scheduleable::SchedulingPhase;
use sim_kernel::{Clock, Event, Handler, Scheduler};

#[derive(Parser)]
#[command(about = "Trace per-tick handler firings across a two-clock graph")]
struct Args {
    #[arg(long, default_value_t = 20)]
    ticks: u64,
}

#[derive(Debug, Clone)]
struct Snapshot {
    tick: u64,
    fired: Vec<&'static str>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let scheduler = Scheduler::new();
    let fast = Clock::new_root("fast", &scheduler);
    let slow = Clock::new_child("slow", &fast, 1, 4).expect("failed to derive slow clock");

    let trace: Rc<RefCell<Vec<Snapshot>>> = Rc::new(RefCell::new(Vec::new()));

    fn make_periodic(
        clock: &Clock,
        label: &'static str,
        trace: Rc<RefCell<Vec<Snapshot>>>,
    ) -> Event {
        let cell: Rc<RefCell<Option<Event>>> = Rc::new(RefCell::new(None));
        let self_ref = cell.clone();
        let event = Event::new(
            Handler::new0(label, move || {
                if let Some(s) = trace.borrow_mut().last_mut() {
                    s.fired.push(label);
                }
                if let Some(ev) = self_ref.borrow().as_ref() {
                    let _ = ev.schedule(1, None);
                }
            }),
            SchedulingPhase::Tick,
            1,
            clock,
        )
        .expect("failed to bind trace event");
        *cell.borrow_mut() = Some(event.clone());
        event
    }

    let fast_event = make_periodic(&fast, "fast-tick", trace.clone());
    let slow_event = make_periodic(&slow, "slow-tick", trace.clone());

    scheduler.finalize().expect("failed to finalize scheduler");
    fast_event.schedule(1, None).expect("schedule fast");
    slow_event.schedule(1, None).expect("schedule slow");

    for t in 0..args.ticks {
        trace.borrow_mut().push(Snapshot { tick: t, fired: Vec::new() });
        scheduler.run(1, false, false).expect("run failed");
    }

    for snapshot in trace.borrow().iter() {
        if !snapshot.fired.is_empty() {
            println!("tick {:>4}: {}", snapshot.tick, snapshot.fired.join(", "));
        }
    }
}
