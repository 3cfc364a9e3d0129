//! Debug and diagnostic tool for the simulation kernel.
//!
//! Consolidated driver for exercising the scheduler, dumping its
//! precedence DAG, and demonstrating trigger-driven teardown.

use std::cell::Cell;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use sim_kernel::scheduleable::SchedulingPhase;
use sim_kernel::trigger::{Comparator, Counter, CounterTrigger, TriggerManager};
use sim_kernel::{Clock, Event, Handler, Scheduler};

#[derive(Parser)]
#[command(about = "Scheduler debug/diagnostic driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a small graph for N ticks and report statistics.
    Run {
        #[arg(long, default_value_t = 1_000)]
        ticks: u64,
        #[arg(long, default_value_t = false)]
        exacting: bool,
    },
    /// Print the precedence DAG in Graphviz DOT format.
    Dot,
    /// Run a counter trigger to completion and report when it fired.
    Trigger {
        #[arg(long, default_value_t = 5)]
        threshold: u64,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run { ticks, exacting } => cmd_run(ticks, exacting),
        Command::Dot => cmd_dot(),
        Command::Trigger { threshold } => cmd_trigger(threshold),
    }
}

fn cmd_run(ticks: u64, exacting: bool) {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let fired = Rc::new(Cell::new(0u64));
    let f = fired.clone();
    let ev = Event::new(
        Handler::new0("periodic", move || f.set(f.get() + 1)),
        SchedulingPhase::Tick,
        1,
        &clock,
    )
    .expect("failed to bind event");
    scheduler.finalize().expect("failed to finalize scheduler");
    ev.schedule(1, None).expect("failed to schedule");

    let stats = scheduler.run(ticks, exacting, true).expect("run failed");
    println!("ticks run: {}", stats.ticks_run);
    println!("elapsed ticks: {}", stats.elapsed_ticks);
    println!("handler fired: {} times", fired.get());
    if let Some(tps) = stats.ticks_per_second() {
        println!("throughput: {tps:.1} ticks/sec");
    }
}

fn cmd_dot() {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let a = Event::new(Handler::new0("a", || {}), SchedulingPhase::Tick, 0, &clock)
        .expect("failed to bind event a");
    let b = Event::new(Handler::new0("b", || {}), SchedulingPhase::Tick, 0, &clock)
        .expect("failed to bind event b");
    a.precedes(&b).expect("precedence edge");
    scheduler.finalize().expect("failed to finalize scheduler");
    let dot = scheduler.with_dag(|dag| dag.to_dot());
    println!("{dot}");
}

struct CountUp(Cell<u64>);
impl Counter for CountUp {
    fn get(&self) -> u64 {
        self.0.get()
    }
}

fn cmd_trigger(threshold: u64) {
    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);
    let counter = Rc::new(CountUp(Cell::new(0)));
    let manager = TriggerManager::new();
    let fired_at = Rc::new(Cell::new(None));
    let f = fired_at.clone();

    let ct = CounterTrigger::new(&counter, Comparator::Ge, threshold);
    let handler_clock = clock.clone();
    manager
        .install_counter(
            &clock,
            "debug-threshold",
            ct,
            Handler::new0("threshold-hit", move || {
                f.set(Some(handler_clock.scheduler().current_tick()))
            }),
        )
        .expect("failed to install trigger");

    scheduler.finalize().expect("failed to finalize scheduler");
    for _ in 0..(threshold * 2) {
        counter.0.set(counter.0.get() + 1);
        scheduler.run(1, false, false).expect("run failed");
        if fired_at.get().is_some() {
            break;
        }
    }

    match fired_at.get() {
        Some(tick) => println!("trigger fired at tick {tick}"),
        None => println!("trigger never fired within the run window"),
    }
}
