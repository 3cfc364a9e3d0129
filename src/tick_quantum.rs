//! Per-tick container of ordered firing groups, with an object-pooled
//! free list so the steady-state scheduling path never allocates (C5,
//! Design Note 9: "at most one allocation per *unique* tick ever used").

use crate::scheduleable::Scheduleable;

pub(crate) struct TickQuantum {
    pub tick: u64,
    pub groups: Vec<Vec<Scheduleable>>,
    pub first_group_idx: usize,
    pub next: Option<Box<TickQuantum>>,
}

impl TickQuantum {
    fn new(group_count: usize) -> Self {
        TickQuantum {
            tick: 0,
            groups: vec![Vec::new(); group_count.max(1)],
            first_group_idx: group_count.max(1),
            next: None,
        }
    }

    fn reset(&mut self, tick: u64, group_count: usize) {
        self.tick = tick;
        let group_count = group_count.max(1);
        if self.groups.len() < group_count {
            self.groups.resize_with(group_count, Vec::new);
        } else {
            self.groups.truncate(group_count);
        }
        for g in &mut self.groups {
            g.clear();
        }
        self.first_group_idx = group_count;
        self.next = None;
    }

    pub fn record(&mut self, firing_group: usize, sched: Scheduleable) {
        self.groups[firing_group].push(sched);
        self.first_group_idx = self.first_group_idx.min(firing_group);
    }
}

/// Free-list-backed allocator for [`TickQuantum`] objects.
#[derive(Default)]
pub(crate) struct TickQuantumPool {
    free: Vec<Box<TickQuantum>>,
}

impl TickQuantumPool {
    pub fn alloc(&mut self, tick: u64, group_count: usize) -> Box<TickQuantum> {
        match self.free.pop() {
            Some(mut q) => {
                q.reset(tick, group_count);
                q
            }
            None => {
                let mut q = Box::new(TickQuantum::new(group_count));
                q.tick = tick;
                q
            }
        }
    }

    pub fn free(&mut self, mut q: Box<TickQuantum>) {
        q.next = None;
        self.free.push(q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::scheduleable::SchedulingPhase;

    #[test]
    fn record_tracks_first_group_idx() {
        let mut pool = TickQuantumPool::default();
        let mut q = pool.alloc(5, 4);
        let s = Scheduleable::new(Handler::new0("h", || {}), 0, SchedulingPhase::Tick);
        q.record(2, s.clone());
        assert_eq!(q.first_group_idx, 2);
        q.record(1, s);
        assert_eq!(q.first_group_idx, 1);
    }

    #[test]
    fn pool_reuses_allocations() {
        let mut pool = TickQuantumPool::default();
        let q = pool.alloc(0, 4);
        let ptr = q.as_ref() as *const TickQuantum;
        pool.free(q);
        let q2 = pool.alloc(1, 4);
        assert_eq!(q2.as_ref() as *const TickQuantum, ptr);
        assert_eq!(q2.tick, 1);
        assert!(q2.groups.iter().all(Vec::is_empty));
    }
}
