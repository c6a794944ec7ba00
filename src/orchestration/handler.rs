//! Interfaces to the external collaborators.
//!
//! Handlers, the documentation lookup service and the reasoning service are
//! opaque to the engine. Each is a `Send + Sync` trait object so callers can
//! plug in anything from an HTTP client to a scripted test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::ids::HandlerId;
use crate::core::phase::{PhaseId, PhaseKind};
use crate::core::plan::ReasoningDepth;
use crate::error::Result;
use crate::orchestration::cache::CachedLookup;
use crate::orchestration::governor::{ResourceGovernor, Verbosity};
use crate::util::blocking;

/// Failure reported by a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// Worth retrying (rate limits, dropped connections).
    #[error("transient failure: {0}")]
    Transient(String),
    /// Retrying will not help.
    #[error("fatal failure: {0}")]
    Fatal(String),
    /// The invocation observed its cancellation token.
    #[error("cancelled")]
    Cancelled,
}

impl InvocationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvocationError::Transient(_))
    }
}

/// Work product of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutput {
    pub content: String,
    /// Usage units consumed, charged to the resource governor.
    pub units: u64,
}

impl HandlerOutput {
    /// Output whose usage defaults to its length in bytes.
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let units = content.len() as u64;
        Self { content, units }
    }

    pub fn with_units(mut self, units: u64) -> Self {
        self.units = units;
        self
    }
}

/// A document returned by the context lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub topic: String,
    pub resource_id: String,
    pub content: String,
}

impl Document {
    pub fn new(topic: &str, resource_id: &str, content: impl Into<String>) -> Self {
        Self {
            topic: topic.to_string(),
            resource_id: resource_id.to_string(),
            content: content.into(),
        }
    }
}

/// Result of a deep-reasoning consultation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub problem: String,
    pub depth: ReasoningDepth,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Outputs of the units of one completed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub phase: PhaseId,
    pub name: String,
    pub outputs: Vec<UnitOutput>,
    /// The coordinator's aggregate, for hierarchical phases.
    pub aggregate: Option<UnitOutput>,
}

impl PhaseOutput {
    /// The output later phases should build on: the aggregate if present,
    /// otherwise the last unit's output.
    pub fn result(&self) -> Option<&str> {
        self.aggregate
            .as_ref()
            .or(self.outputs.last())
            .map(|o| o.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutput {
    pub handler: HandlerId,
    pub content: String,
}

/// Everything produced so far in a run, handed to every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedContext {
    pub task: String,
    pub analysis: Option<AnalysisResult>,
    pub phases: Vec<PhaseOutput>,
}

impl AccumulatedContext {
    pub fn new(task: impl Into<String>, analysis: Option<AnalysisResult>) -> Self {
        Self {
            task: task.into(),
            analysis,
            phases: Vec::new(),
        }
    }

    pub fn output_of(&self, phase: PhaseId) -> Option<&PhaseOutput> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Result of the most recently completed phase.
    pub fn latest(&self) -> Option<&str> {
        self.phases.last().and_then(|p| p.result())
    }
}

/// One call to a handler.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler: HandlerId,
    pub phase: PhaseId,
    pub kind: PhaseKind,
    pub subtask: String,
    /// Human-readable instruction, e.g. "Implement [interface-layer] login screen".
    pub instruction: String,
    pub context: Arc<AccumulatedContext>,
    /// Output of the previous unit in a sequential phase.
    pub previous: Option<String>,
    /// Worker outputs, set only for a hierarchical coordinator.
    pub siblings: Vec<UnitOutput>,
    pub verbosity: Verbosity,
    pub cancel: CancellationToken,
    /// Cached documentation lookup, when a lookup service is configured.
    pub lookup: Option<CachedLookup>,
    pub governor: Arc<ResourceGovernor>,
}

impl Invocation {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A specialist that performs task work.
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> std::result::Result<HandlerOutput, InvocationError>;
}

/// Documentation and resource lookup.
#[async_trait]
pub trait ContextLookup: Send + Sync {
    /// `Ok(None)` when nothing is known about the resource.
    async fn lookup(&self, topic: &str, resource_id: &str) -> Result<Option<Document>>;
}

/// Structured multi-step analysis.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn analyze(&self, problem: &str, depth: ReasoningDepth) -> Result<AnalysisResult>;
}

type BlockingFn = dyn Fn(Invocation) -> std::result::Result<HandlerOutput, InvocationError> + Send + Sync;

/// Adapts a synchronous handler function by running it on the blocking pool.
#[derive(Clone)]
pub struct BlockingInvoker {
    f: Arc<BlockingFn>,
}

impl BlockingInvoker {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Invocation) -> std::result::Result<HandlerOutput, InvocationError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl HandlerInvoker for BlockingInvoker {
    async fn invoke(&self, invocation: Invocation) -> std::result::Result<HandlerOutput, InvocationError> {
        let f = Arc::clone(&self.f);
        blocking(move || Ok(f(invocation)))
            .await
            .map_err(|e| InvocationError::Fatal(e.to_string()))?
    }
}
