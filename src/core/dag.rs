//! Phase dependency graph.
//!
//! `PhaseGraph` mirrors an execution plan's phase dependencies in a petgraph
//! `DiGraph`. Cycles and forward dependencies are rejected when the plan is
//! built; the orchestrator reads each phase's dependencies from the graph.

use crate::core::phase::{Phase, PhaseId};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Directed graph of phases; an edge `a -> b` means `b` depends on `a`.
pub struct PhaseGraph {
    graph: DiGraph<PhaseId, ()>,
    index: HashMap<PhaseId, NodeIndex>,
}

impl PhaseGraph {
    /// Build and validate the graph for an ordered list of phases.
    ///
    /// # Errors
    /// - `Error::Validation` if a phase id does not match its position or a
    ///   dependency names a phase that does not exist
    /// - `Error::PlanCycle` if the dependencies form a cycle
    /// - `Error::ForwardDependency` if a phase depends on itself or a later phase
    pub fn build(phases: &[Phase]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for (position, phase) in phases.iter().enumerate() {
            if phase.id != PhaseId(position) {
                return Err(Error::Validation(format!(
                    "Phase '{}' has id {} but is at position {}",
                    phase.name, phase.id, position
                )));
            }
            index.insert(phase.id, graph.add_node(phase.id));
        }

        for phase in phases {
            for dep in &phase.depends_on {
                let from = index.get(dep).ok_or_else(|| {
                    Error::Validation(format!(
                        "Phase '{}' depends on unknown phase {}",
                        phase.name, dep
                    ))
                })?;
                graph.add_edge(*from, index[&phase.id], ());
            }
        }

        if is_cyclic_directed(&graph) {
            let at = toposort(&graph, None)
                .err()
                .and_then(|cycle| graph.node_weight(cycle.node_id()).copied())
                .and_then(|id| phases.get(id.0))
                .map(|phase| phase.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::PlanCycle(at));
        }

        for phase in phases {
            if let Some(dep) = phase.depends_on.iter().find(|dep| **dep >= phase.id) {
                return Err(Error::ForwardDependency {
                    phase: phase.id.0,
                    dependency: dep.0,
                });
            }
        }

        Ok(Self { graph, index })
    }

    pub fn phase_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Phases the given phase depends on directly, in ascending order.
    pub fn dependencies(&self, id: PhaseId) -> Vec<PhaseId> {
        let Some(&node) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut ids: Vec<PhaseId> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl std::fmt::Debug for PhaseGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseGraph")
            .field("phases", &self.phase_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
