//! Execution plan types.

use serde::{Deserialize, Serialize};

use crate::core::dag::PhaseGraph;
use crate::core::phase::{ConcurrencyMode, Phase, PhaseId};
use crate::error::{Error, Result};

/// Planning template used for large, complex tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStrategy {
    /// Repeat small-change -> validate cycles until convergence.
    Progressive,
    /// Enumerate everything, categorize, prioritize, then execute once.
    Systematic,
    /// Re-assess scope after each wave of work.
    Adaptive,
    /// Full analysis, a recorded architecture decision, then coordinated execution.
    Enterprise,
}

impl std::fmt::Display for WaveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveStrategy::Progressive => write!(f, "progressive"),
            WaveStrategy::Systematic => write!(f, "systematic"),
            WaveStrategy::Adaptive => write!(f, "adaptive"),
            WaveStrategy::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// The overall shape of an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "wave")]
pub enum ExecutionStrategy {
    /// A single sequential phase.
    Single,
    /// context lookup -> analyze -> plan -> execute -> validate.
    Pipeline,
    /// Wave mode with the given template.
    Wave(WaveStrategy),
}

impl ExecutionStrategy {
    pub fn is_wave(&self) -> bool {
        matches!(self, ExecutionStrategy::Wave(_))
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStrategy::Single => write!(f, "single"),
            ExecutionStrategy::Pipeline => write!(f, "pipeline"),
            ExecutionStrategy::Wave(wave) => write!(f, "wave:{}", wave),
        }
    }
}

/// A strategy explicitly requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedStrategy {
    Single,
    Pipeline,
    Progressive,
    Systematic,
    Adaptive,
    Enterprise,
}

impl From<ForcedStrategy> for ExecutionStrategy {
    fn from(forced: ForcedStrategy) -> Self {
        match forced {
            ForcedStrategy::Single => ExecutionStrategy::Single,
            ForcedStrategy::Pipeline => ExecutionStrategy::Pipeline,
            ForcedStrategy::Progressive => ExecutionStrategy::Wave(WaveStrategy::Progressive),
            ForcedStrategy::Systematic => ExecutionStrategy::Wave(WaveStrategy::Systematic),
            ForcedStrategy::Adaptive => ExecutionStrategy::Wave(WaveStrategy::Adaptive),
            ForcedStrategy::Enterprise => ExecutionStrategy::Wave(WaveStrategy::Enterprise),
        }
    }
}

impl std::str::FromStr for ForcedStrategy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" | "quick" => Ok(ForcedStrategy::Single),
            "pipeline" | "standard" => Ok(ForcedStrategy::Pipeline),
            "progressive" => Ok(ForcedStrategy::Progressive),
            "systematic" => Ok(ForcedStrategy::Systematic),
            "adaptive" => Ok(ForcedStrategy::Adaptive),
            "enterprise" => Ok(ForcedStrategy::Enterprise),
            other => Err(Error::Validation(format!("Unknown strategy: {}", other))),
        }
    }
}

/// How deeply the reasoning service is consulted before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningDepth {
    Standard,
    Deep,
    Maximum,
}

impl std::fmt::Display for ReasoningDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningDepth::Standard => write!(f, "standard"),
            ReasoningDepth::Deep => write!(f, "deep"),
            ReasoningDepth::Maximum => write!(f, "maximum"),
        }
    }
}

/// A validated, ordered list of phases.
///
/// Construction goes through [`ExecutionPlan::new`], which rejects plans whose
/// dependencies are cyclic or point forward, and hierarchical phases without
/// exactly one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    strategy: ExecutionStrategy,
    phases: Vec<Phase>,
    reasoning: Option<ReasoningDepth>,
}

impl ExecutionPlan {
    pub fn new(
        strategy: ExecutionStrategy,
        phases: Vec<Phase>,
        reasoning: Option<ReasoningDepth>,
    ) -> Result<Self> {
        PhaseGraph::build(&phases)?;

        for phase in &phases {
            let hierarchical = phase.mode == ConcurrencyMode::HierarchicalCoordinated;
            match (hierarchical, phase.coordinator.is_some()) {
                (true, false) => {
                    return Err(Error::Validation(format!(
                        "Hierarchical phase '{}' has no coordinator",
                        phase.name
                    )))
                }
                (false, true) => {
                    return Err(Error::Validation(format!(
                        "Phase '{}' has a coordinator but is {}",
                        phase.name, phase.mode
                    )))
                }
                _ => {}
            }
            if phase.units.is_empty() {
                return Err(Error::Validation(format!(
                    "Phase '{}' has no work units",
                    phase.name
                )));
            }
        }

        Ok(Self {
            strategy,
            phases,
            reasoning,
        })
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, id: PhaseId) -> Option<&Phase> {
        self.phases.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Depth of the reasoning consultation; `None` for quick plans.
    pub fn reasoning(&self) -> Option<ReasoningDepth> {
        self.reasoning
    }

    /// The dependency graph of this plan.
    pub fn graph(&self) -> Result<PhaseGraph> {
        PhaseGraph::build(&self.phases)
    }
}
