//! Tick↔cycle translation and rational parent ratios (C2).
//!
//! Grounded on `examples/original_source/sparta/sparta/simulation/Clock.hpp`:
//! `root_ratio` accumulates up the parent chain (`child.root_ratio =
//! inv(ratio_to_parent) * parent.root_ratio`, root's is `1/1`), periods are
//! normalized against the LCM of every root-ratio denominator in the tree,
//! and `calculateClockCrossingDelay`/`calculateReverseClockCrossingDelay`
//! are free functions operating on two same-scheduler clocks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Result, SchedulerError};
use crate::scheduler::Scheduler;

/// A reduced `num/den` fraction over `u32`, widened to `u64` for
/// intermediate arithmetic to avoid overflow on multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if den == 0 {
            return Err(SchedulerError::LifecycleMisuse(
                "clock ratio denominator must not be zero".into(),
            ));
        }
        Ok(Self { num, den }.reduced())
    }

    fn reduced(self) -> Self {
        let g = gcd(self.num as u64, self.den as u64).max(1);
        Rational {
            num: (self.num as u64 / g) as u32,
            den: (self.den as u64 / g) as u32,
        }
    }

    pub fn inv(self) -> Self {
        Rational {
            num: self.den,
            den: self.num,
        }
    }

    pub fn mul(self, other: Self) -> Self {
        let num = self.num as u64 * other.num as u64;
        let den = self.den as u64 * other.den as u64;
        let g = gcd(num, den).max(1);
        Rational {
            num: (num / g) as u32,
            den: (den / g) as u32,
        }
    }

    pub const ONE: Rational = Rational { num: 1, den: 1 };
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

struct ClockInner {
    name: String,
    scheduler: Scheduler,
    parent: Option<Clock>,
    ratio_to_parent: Rational,
    root_ratio: Rational,
    period: u64,
    freq_mhz: Option<f64>,
    elapsed_cycles: u64,
    normalized: bool,
}

/// A node in the clock hierarchy. Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct Clock(Rc<RefCell<ClockInner>>);

impl Clock {
    /// Create a root clock (no parent) and register it with `scheduler`.
    pub fn new_root(name: impl Into<String>, scheduler: &Scheduler) -> Self {
        let clock = Clock(Rc::new(RefCell::new(ClockInner {
            name: name.into(),
            scheduler: scheduler.clone(),
            parent: None,
            ratio_to_parent: Rational::ONE,
            root_ratio: Rational::ONE,
            period: 1,
            freq_mhz: None,
            elapsed_cycles: 0,
            normalized: false,
        })));
        scheduler.register_clock(clock.clone());
        clock
    }

    /// Create a child clock whose rate is `num/den` times its parent's.
    pub fn new_child(name: impl Into<String>, parent: &Clock, num: u32, den: u32) -> Result<Self> {
        let ratio = Rational::new(num, den)?;
        let scheduler = parent.scheduler();
        let clock = Clock(Rc::new(RefCell::new(ClockInner {
            name: name.into(),
            scheduler: scheduler.clone(),
            parent: Some(parent.clone()),
            ratio_to_parent: ratio,
            root_ratio: Rational::ONE,
            period: 1,
            freq_mhz: None,
            elapsed_cycles: 0,
            normalized: false,
        })));
        scheduler.register_clock(clock.clone());
        Ok(clock)
    }

    /// Create a root clock with a declared frequency, purely informational
    /// (the run loop only ever consumes `period`/ratios; frequency is
    /// exposed for external statistics/report consumers per spec.md §1).
    pub fn with_frequency_mhz(self, mhz: f64) -> Self {
        self.0.borrow_mut().freq_mhz = Some(mhz);
        self
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// Stable per-clock identity, for use as a hash-map key by code (like
    /// the trigger dispatcher) that needs one handler per distinct clock.
    pub fn identity_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn scheduler(&self) -> Scheduler {
        self.0.borrow().scheduler.clone()
    }

    pub fn frequency_mhz(&self) -> Option<f64> {
        self.0.borrow().freq_mhz
    }

    /// Pre-normalization only: set/replace the ratio to this clock's
    /// parent. Resets the (stale) root ratio.
    pub fn set_ratio(&self, num: u32, den: u32) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.normalized {
            return Err(SchedulerError::LifecycleMisuse(format!(
                "clock '{}' ratio may not change after normalization",
                inner.name
            )));
        }
        inner.ratio_to_parent = Rational::new(num, den)?;
        inner.root_ratio = Rational::ONE;
        Ok(())
    }

    pub fn period(&self) -> u64 {
        self.0.borrow().period
    }

    pub fn is_posedge(&self, tick: u64) -> bool {
        tick % self.period() == 0
    }

    pub fn get_tick(&self, cycle: u64) -> u64 {
        cycle * self.period()
    }

    pub fn get_cycle(&self, tick: u64) -> u64 {
        tick / self.period()
    }

    /// Current cycle, derived from the owning scheduler's current tick.
    pub fn current_cycle(&self) -> u64 {
        let tick = self.0.borrow().scheduler.current_tick();
        self.get_cycle(tick)
    }

    /// Called by the run loop once per tick for every registered clock.
    pub fn update_elapsed_cycles(&self, ticks: u64) {
        self.0.borrow_mut().elapsed_cycles = self.get_cycle(ticks);
    }

    pub fn elapsed_cycles(&self) -> u64 {
        self.0.borrow().elapsed_cycles
    }

    fn root_ratio_of(&self) -> Rational {
        let inner = self.0.borrow();
        match &inner.parent {
            None => Rational::ONE,
            Some(parent) => inner.ratio_to_parent.inv().mul(parent.root_ratio_of()),
        }
    }

    /// Apply a pre-computed root-ratio/period pair. Called only by
    /// `Scheduler::finalize`'s normalization pass.
    pub(crate) fn apply_normalized_period(&self, root_ratio: Rational, period: u64) {
        let mut inner = self.0.borrow_mut();
        inner.root_ratio = root_ratio;
        inner.period = period.max(1);
        inner.normalized = true;
    }

    pub(crate) fn compute_root_ratio(&self) -> Rational {
        self.root_ratio_of()
    }

    pub fn ratio_to_parent(&self) -> Rational {
        self.0.borrow().ratio_to_parent
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Clock")
            .field("name", &inner.name)
            .field("period", &inner.period)
            .finish()
    }
}

/// Normalize every clock registered on `clocks`: compute each clock's
/// root ratio, take the LCM of every denominator, and assign
/// `period = lcm * root_ratio.num / root_ratio.den`.
pub(crate) fn normalize_clocks(clocks: &[Clock]) {
    let root_ratios: Vec<Rational> = clocks.iter().map(Clock::compute_root_ratio).collect();
    let norm = root_ratios
        .iter()
        .fold(1u64, |acc, r| lcm(acc, r.den as u64))
        .max(1);
    for (clock, ratio) in clocks.iter().zip(root_ratios) {
        let period = norm * ratio.num as u64 / ratio.den as u64;
        clock.apply_normalized_period(ratio, period);
    }
}

/// Delay, in ticks, incurred crossing from `src_clk` to `dst_clk` on the
/// same scheduler. Asserts the current tick is on a `src_clk` posedge (the
/// usual case, since scheduling normally happens from a handler running on
/// that clock) and rounds the arrival tick up to the next `dst_clk`
/// posedge.
pub fn calculate_clock_crossing_delay(
    src_delay: u64,
    src_clk: &Clock,
    dst_delay: u64,
    dst_clk: &Clock,
) -> Result<u64> {
    assert_same_scheduler(src_clk, dst_clk)?;
    let current = src_clk.scheduler().current_tick();
    if current % src_clk.period() != 0 {
        return Err(SchedulerError::ClockCrossing(format!(
            "current tick {current} is not on a posedge of source clock '{}'",
            src_clk.name()
        )));
    }
    let mut num_delay_ticks = src_delay + dst_delay;
    let arrival = current + num_delay_ticks;
    let dst_period = dst_clk.period();
    let dst_posedge = arrival / dst_period * dst_period;
    if arrival != dst_posedge {
        num_delay_ticks += dst_period - (arrival - dst_posedge);
    }
    Ok(num_delay_ticks)
}

/// Reverse of [`calculate_clock_crossing_delay`]: given a desired
/// destination arrival tick, return the delay to subtract (rounding the
/// resulting source tick *down* to the previous `src_clk` posedge).
pub fn calculate_reverse_clock_crossing_delay(
    dst_arrival_tick: u64,
    src_delay: u64,
    src_clk: &Clock,
    dst_delay: u64,
    dst_clk: &Clock,
) -> Result<u64> {
    assert_same_scheduler(src_clk, dst_clk)?;
    if dst_arrival_tick % dst_clk.period() != 0 {
        return Err(SchedulerError::ClockCrossing(format!(
            "arrival tick {dst_arrival_tick} is not on a posedge of destination clock '{}'",
            dst_clk.name()
        )));
    }
    let total_delay = src_delay + dst_delay;
    let raw_src_tick = dst_arrival_tick.saturating_sub(total_delay);
    let period = src_clk.period();
    let src_posedge = raw_src_tick / period * period;
    Ok(dst_arrival_tick - src_posedge)
}

fn assert_same_scheduler(src: &Clock, dst: &Clock) -> Result<()> {
    if !src.0.borrow().scheduler.same_as(&dst.0.borrow().scheduler) {
        return Err(SchedulerError::ClockCrossing(
            "calculate_clock_crossing_delay requires both clocks on the same scheduler".into(),
        ));
    }
    Ok(())
}
