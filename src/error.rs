//! Crate-wide error taxonomy.
//!
//! Every condition in this enum is, per the kernel's contract, fatal: the
//! scheduler is left in an unrunnable state and the caller is expected to
//! tear down rather than retry. We still return `Result` instead of
//! panicking so that a host process embedding several kernel instances
//! (e.g. a test harness) is not forced to abort on one misbehaving model.

use thiserror::Error;

/// Errors produced by the scheduler, DAG, clock, and trigger subsystems.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduling into a prior group of the current tick, or a cross-quantum
    /// callback racing ahead of the group currently firing.
    #[error(
        "precedence violation: '{violator}' scheduled into group {target_group} of the \
         current tick while '{firing}' (group {firing_group}) is executing"
    )]
    PrecedenceViolation {
        violator: String,
        target_group: u32,
        firing: String,
        firing_group: u32,
    },

    /// Linking two vertices would close a cycle in the precedence DAG.
    #[error("cycle detected in precedence graph: {cycle_text}")]
    CycleDetected { cycle_text: String, dot: String },

    /// `precedes()` called on two scheduleables in different phases.
    #[error("phase mismatch: '{a}' is in phase {a_phase:?} but '{b}' is in phase {b_phase:?}")]
    PhaseMismatch {
        a: String,
        a_phase: crate::scheduleable::SchedulingPhase,
        b: String,
        b_phase: crate::scheduleable::SchedulingPhase,
    },

    /// Running before finalize, re-entering run, mutating a finalized DAG,
    /// or any other lifecycle-state violation.
    #[error("lifecycle misuse: {0}")]
    LifecycleMisuse(String),

    /// A `CounterTrigger`'s backing counter was destroyed while the trigger
    /// was still active.
    #[error("trigger target vanished: counter backing trigger '{0}' no longer exists")]
    TriggerTargetVanished(String),

    /// `calculate_clock_crossing_delay` precondition violated (null/foreign
    /// clock, or current tick not on a source posedge).
    #[error("clock crossing precondition violated: {0}")]
    ClockCrossing(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;
