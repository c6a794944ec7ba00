//! Orchestration layer.
//!
//! Turns a routed request into a plan, runs the plan's phases against the
//! handler invoker under the resource governor, and checks the result with
//! the quality gate pipeline.

pub mod cache;
pub mod gates;
pub mod governor;
pub mod handler;
pub mod orchestrator;
pub mod planner;

pub use cache::{CacheStats, CachedLookup, ContextCache};
pub use gates::{
    CheckOutcome, FenceBalanceCheck, GateCheck, GateInput, GatePipeline, GateReport, GateResult,
    GateScope, GateStage, SecretLeakCheck, SwiftPracticesCheck, Verdict,
};
pub use governor::{ResourceGovernor, ResourceLevel, Verbosity};
pub use handler::{
    AccumulatedContext, AnalysisResult, BlockingInvoker, ContextLookup, Document, HandlerInvoker,
    HandlerOutput, Invocation, InvocationError, PhaseOutput, ReasoningService, UnitOutput,
};
pub use orchestrator::{OrchestrationOutcome, Orchestrator, OrchestratorEvent};
pub use planner::{ExecutionPlanner, PlanningInput};
