//! Core domain models for routing and orchestration.
//!
//! This module contains the request, identifiers, phases and execution plan
//! shared by the routing and orchestration layers.

pub mod dag;
pub mod ids;
pub mod phase;
pub mod plan;
pub mod request;

pub use dag::PhaseGraph;
pub use ids::{DomainTag, HandlerId};
pub use phase::{ConcurrencyMode, Phase, PhaseId, PhaseKind, PhaseStatus, WorkUnit};
pub use plan::{ExecutionPlan, ExecutionStrategy, ForcedStrategy, ReasoningDepth, WaveStrategy};
pub use request::{ResourceBudget, TaskFlags, TaskRequest};
