//! Discrete-event simulation kernel.
//!
//! A tick-quantum scheduler built around a precedence DAG: every
//! [`Scheduleable`](scheduleable::Scheduleable) binds to a point in a fixed
//! seven-phase chain (Trigger, Update, PortUpdate, Flush, Collection, Tick,
//! PostTick) on some [`Clock`](clock::Clock), and fires in DAG-order within
//! whichever tick it lands on. No OS APIs are assumed beyond a monotonic
//! clock and (optionally) a background watchdog thread.
//!
//! # Architecture
//!
//! - [`error`]: crate-wide error taxonomy
//! - [`handler`]: type-erased 0/1/2-argument callback wrapper
//! - [`dag`]: precedence graph, cycle detection, group linearization
//! - [`clock`]: rational tick/cycle translation and clock-tree normalization
//! - [`scheduleable`]: the DAG-bound unit of schedulable work
//! - [`tick_quantum`]: per-tick group buckets and their free-list pool
//! - [`scheduler`]: the run loop, async ingress, and lifecycle state machine
//! - [`event`]: `Event`/`UniqueEvent`/`SingleCycleUniqueEvent`/`PayloadEvent`
//! - [`trigger`]: counter/time predicates dispatched once per clock cycle
//! - [`watchdog`]: background liveness check for long-running `run` calls
//! - [`stats`]: a `run` call's tick/time snapshot

pub mod clock;
pub mod dag;
pub mod error;
pub mod event;
pub mod handler;
pub mod scheduleable;
pub mod scheduler;
pub mod stats;
pub mod tick_quantum;
pub mod trigger;
pub mod watchdog;

pub use clock::Clock;
pub use error::{Result, SchedulerError};
pub use event::{Event, PayloadEvent, SingleCycleUniqueEvent, UniqueEvent};
pub use handler::Handler;
pub use scheduleable::{Scheduleable, SchedulingPhase};
pub use scheduler::{AsyncIngress, CrossThreadHandle, Scheduler};
pub use stats::SchedulerStats;
pub use trigger::TriggerManager;
