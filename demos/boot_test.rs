//! Boot test - wires up a minimal clock/scheduler graph and runs a handful
//! of ticks to confirm the kernel comes up cleanly.

use clap::Parser;
use sim_kernel::scheduleable::SchedulingPhase;
use sim_kernel::{Clock, Event, Handler, Scheduler};

#[derive(Parser)]
#[command(about = "Run a minimal scheduler for a few ticks and report what fired")]
struct Args {
    /// Number of ticks to run.
    #[arg(long, default_value_t = 10)]
    ticks: u64,

    /// Advance every intermediate tick's clocks instead of jumping straight
    /// to the next tick with pending work.
    #[arg(long, default_value_t = false)]
    exacting: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let scheduler = Scheduler::new();
    let clock = Clock::new_root("root", &scheduler);

    let tick = Event::new(
        Handler::new0("tick-logger", || log::info!("tick fired")),
        SchedulingPhase::Tick,
        1,
        &clock,
    )
    .expect("failed to bind boot event");

    scheduler.finalize().expect("failed to finalize scheduler");
    tick.schedule(0, None).expect("failed to schedule boot event");

    match scheduler.run(args.ticks, args.exacting, true) {
        Ok(stats) => {
            println!("ran {} ticks ({} elapsed total)", stats.ticks_run, stats.elapsed_ticks);
            if let Some(tps) = stats.ticks_per_second() {
                println!("throughput: {tps:.1} ticks/sec");
            }
        }
        Err(e) => {
            eprintln!("scheduler run failed: {e}");
            std::process::exit(1);
        }
    }
}
