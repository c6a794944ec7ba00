//! Phase data model for execution plans.
//!
//! A phase is one step of an execution plan: a set of handler work units run
//! under a single concurrency mode, after the phases it depends on.

use serde::{Deserialize, Serialize};

use crate::core::ids::HandlerId;

/// Position of a phase within its plan.
///
/// Phase ids are plan indices, so "earlier phase" is a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub usize);

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the work units of a phase are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// All units run concurrently and share nothing; first failure cancels the rest.
    ParallelIndependent,
    /// Units run one at a time, each receiving the previous unit's output.
    SequentialDependent,
    /// Workers run concurrently, then the coordinator aggregates their outputs.
    HierarchicalCoordinated,
}

impl std::fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyMode::ParallelIndependent => write!(f, "parallel"),
            ConcurrencyMode::SequentialDependent => write!(f, "sequential"),
            ConcurrencyMode::HierarchicalCoordinated => write!(f, "hierarchical"),
        }
    }
}

/// What a phase is for. Drives the instruction handed to each handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "iteration")]
pub enum PhaseKind {
    ContextLookup,
    Analyze,
    Plan,
    Execute,
    Validate,
    Enumerate,
    Categorize,
    Prioritize,
    Assess,
    Reassess,
    ArchitectureDecision,
    /// One change step of a progressive cycle.
    Change(u32),
    /// The validation step closing a progressive cycle.
    CycleValidate(u32),
}

impl PhaseKind {
    /// Verb used when describing the phase to a handler.
    pub fn instruction(&self) -> String {
        match self {
            PhaseKind::ContextLookup => "Gather documentation and context for".to_string(),
            PhaseKind::Analyze => "Analyze".to_string(),
            PhaseKind::Plan => "Plan the implementation of".to_string(),
            PhaseKind::Execute => "Implement".to_string(),
            PhaseKind::Validate => "Validate the result of".to_string(),
            PhaseKind::Enumerate => "Enumerate every item affected by".to_string(),
            PhaseKind::Categorize => "Categorize the enumerated items for".to_string(),
            PhaseKind::Prioritize => "Prioritize the categorized items for".to_string(),
            PhaseKind::Assess => "Assess the scope of".to_string(),
            PhaseKind::Reassess => "Re-assess the remaining scope of".to_string(),
            PhaseKind::ArchitectureDecision => "Record the architecture decision for".to_string(),
            PhaseKind::Change(n) => format!("Apply increment {} of", n),
            PhaseKind::CycleValidate(n) => format!("Validate increment {} of", n),
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseKind::ContextLookup => write!(f, "context-lookup"),
            PhaseKind::Analyze => write!(f, "analyze"),
            PhaseKind::Plan => write!(f, "plan"),
            PhaseKind::Execute => write!(f, "execute"),
            PhaseKind::Validate => write!(f, "validate"),
            PhaseKind::Enumerate => write!(f, "enumerate"),
            PhaseKind::Categorize => write!(f, "categorize"),
            PhaseKind::Prioritize => write!(f, "prioritize"),
            PhaseKind::Assess => write!(f, "assess"),
            PhaseKind::Reassess => write!(f, "reassess"),
            PhaseKind::ArchitectureDecision => write!(f, "architecture-decision"),
            PhaseKind::Change(n) => write!(f, "change-{}", n),
            PhaseKind::CycleValidate(n) => write!(f, "validate-{}", n),
        }
    }
}

/// A single handler invocation within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// The handler to invoke.
    pub handler: HandlerId,
    /// The portion of the task the handler is responsible for in this phase.
    pub subtask: String,
}

impl WorkUnit {
    pub fn new(handler: HandlerId, subtask: impl Into<String>) -> Self {
        Self {
            handler,
            subtask: subtask.into(),
        }
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Index of this phase in the plan.
    pub id: PhaseId,
    pub name: String,
    pub kind: PhaseKind,
    pub mode: ConcurrencyMode,
    /// Units run by the phase (the workers, for hierarchical phases).
    pub units: Vec<WorkUnit>,
    /// Aggregating unit. Present exactly when the mode is hierarchical.
    pub coordinator: Option<WorkUnit>,
    /// Earlier phases whose success this phase requires.
    pub depends_on: Vec<PhaseId>,
    /// Non-essential phases are deferred when resources are critical.
    pub essential: bool,
}

impl Phase {
    /// Create a phase with no units and no dependencies.
    pub fn new(id: PhaseId, kind: PhaseKind, mode: ConcurrencyMode) -> Self {
        Self {
            id,
            name: kind.to_string(),
            kind,
            mode,
            units: Vec::new(),
            coordinator: None,
            depends_on: Vec::new(),
            essential: true,
        }
    }

    pub fn with_units(mut self, units: Vec<WorkUnit>) -> Self {
        self.units = units;
        self
    }

    pub fn with_coordinator(mut self, coordinator: WorkUnit) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = PhaseId>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Distinct handlers assigned to the phase, coordinator included.
    pub fn handlers(&self) -> Vec<&HandlerId> {
        let mut handlers: Vec<&HandlerId> = Vec::new();
        for unit in self.units.iter().chain(self.coordinator.iter()) {
            if !handlers.contains(&&unit.handler) {
                handlers.push(&unit.handler);
            }
        }
        handlers
    }
}

/// Outcome of a phase in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PhaseStatus {
    /// Not reached yet.
    Pending,
    /// All units (and the coordinator) finished successfully.
    Completed,
    /// A unit failed irrecoverably.
    Failed {
        /// Error message of the failing unit.
        error: String,
    },
    /// Skipped because of resource pressure, or because a dependency was deferred.
    Deferred {
        reason: String,
    },
    /// A dependency failed, so the phase never started.
    NotAttempted {
        /// The failed phase that blocked this one.
        blocked_by: PhaseId,
    },
    /// Skipped intentionally (e.g. a converged progressive cycle).
    Skipped {
        reason: String,
    },
}

impl PhaseStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseStatus::Failed { .. })
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed { error } => write!(f, "failed: {}", error),
            PhaseStatus::Deferred { reason } => write!(f, "deferred: {}", reason),
            PhaseStatus::NotAttempted { blocked_by } => {
                write!(f, "not attempted (blocked by {})", blocked_by)
            }
            PhaseStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}
