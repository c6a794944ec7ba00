//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted handler invoker with per-handler and per-phase-kind replies
//! - Mock documentation lookup and reasoning services
//! - An engine harness wired to all three

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use maestro::core::{PhaseId, PhaseKind, ReasoningDepth};
use maestro::orchestration::{
    AnalysisResult, ContextLookup, Document, HandlerInvoker, HandlerOutput, Invocation,
    InvocationError, ReasoningService, Verbosity,
};
use maestro::{Config, Engine, Services, TaskRequest};

/// How the scripted handler answers an invocation.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fatal(String),
    /// Fail transiently `failures` times per phase, then reply.
    Transient { failures: u32, reply: String },
    /// Reply and report `units` of usage.
    Usage { reply: String, units: u64 },
    /// Block until the invocation is cancelled.
    WaitForCancel,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub handler: String,
    pub phase: PhaseId,
    pub kind: PhaseKind,
    pub instruction: String,
    pub verbosity: Verbosity,
    pub previous: Option<String>,
    pub siblings: usize,
    pub had_lookup: bool,
}

/// Handler invoker driven by scripts.
///
/// Phase-kind scripts win over handler scripts. Without a script the handler
/// replies with a line naming itself and the instruction, so outputs differ
/// from phase to phase.
#[derive(Default)]
pub struct ScriptedHandler {
    by_kind: HashMap<PhaseKind, Script>,
    by_handler: HashMap<String, Script>,
    attempts: Mutex<HashMap<(String, PhaseId), u32>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_kind(mut self, kind: PhaseKind, script: Script) -> Self {
        self.by_kind.insert(kind, script);
        self
    }

    pub fn on_handler(mut self, handler: &str, script: Script) -> Self {
        self.by_handler.insert(handler.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, kind: PhaseKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    fn attempt(&self, handler: &str, phase: PhaseId) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry((handler.to_string(), phase)).or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl HandlerInvoker for ScriptedHandler {
    async fn invoke(&self, invocation: Invocation) -> Result<HandlerOutput, InvocationError> {
        let handler = invocation.handler.to_string();
        self.calls.lock().unwrap().push(Call {
            handler: handler.clone(),
            phase: invocation.phase,
            kind: invocation.kind,
            instruction: invocation.instruction.clone(),
            verbosity: invocation.verbosity,
            previous: invocation.previous.clone(),
            siblings: invocation.siblings.len(),
            had_lookup: invocation.lookup.is_some(),
        });

        if let Some(lookup) = &invocation.lookup {
            let _ = lookup.lookup("handbook", &handler).await;
        }

        let script = self
            .by_kind
            .get(&invocation.kind)
            .or_else(|| self.by_handler.get(&handler))
            .cloned();

        match script {
            Some(Script::Reply(reply)) => Ok(HandlerOutput::new(reply)),
            Some(Script::Fatal(message)) => Err(InvocationError::Fatal(message)),
            Some(Script::Transient { failures, reply }) => {
                if self.attempt(&handler, invocation.phase) <= failures {
                    Err(InvocationError::Transient("rate limited".to_string()))
                } else {
                    Ok(HandlerOutput::new(reply))
                }
            }
            Some(Script::Usage { reply, units }) => Ok(HandlerOutput::new(reply).with_units(units)),
            Some(Script::WaitForCancel) => {
                invocation.cancel.cancelled().await;
                Err(InvocationError::Cancelled)
            }
            None if !invocation.siblings.is_empty() => Ok(HandlerOutput::new(format!(
                "{} merged {} result(s)",
                handler,
                invocation.siblings.len()
            ))),
            None => Ok(HandlerOutput::new(format!(
                "{}: {}",
                handler, invocation.instruction
            ))),
        }
    }
}

/// Lookup service that knows every resource and counts its calls.
#[derive(Default)]
pub struct MockLookup {
    calls: AtomicUsize,
}

impl MockLookup {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextLookup for MockLookup {
    async fn lookup(&self, topic: &str, resource_id: &str) -> maestro::Result<Option<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Document::new(
            topic,
            resource_id,
            format!("{} notes for {}", topic, resource_id),
        )))
    }
}

/// Reasoning service that records every consultation.
#[derive(Default)]
pub struct MockReasoning {
    requests: Mutex<Vec<(String, ReasoningDepth)>>,
}

impl MockReasoning {
    pub fn requests(&self) -> Vec<(String, ReasoningDepth)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningService for MockReasoning {
    async fn analyze(&self, problem: &str, depth: ReasoningDepth) -> maestro::Result<AnalysisResult> {
        self.requests
            .lock()
            .unwrap()
            .push((problem.to_string(), depth));
        Ok(AnalysisResult {
            problem: problem.to_string(),
            depth,
            summary: format!("{} analysis", depth),
            recommendations: vec!["start with the hot path".to_string()],
        })
    }
}

/// An engine with the default configuration and all collaborators mocked.
pub struct Harness {
    pub engine: Engine,
    pub handler: Arc<ScriptedHandler>,
    pub lookup: Arc<MockLookup>,
    pub reasoning: Arc<MockReasoning>,
}

impl Harness {
    pub fn new(handler: ScriptedHandler) -> Self {
        Self::with_config(Config::default(), handler)
    }

    pub fn with_config(config: Config, handler: ScriptedHandler) -> Self {
        let handler = Arc::new(handler);
        let lookup = Arc::new(MockLookup::default());
        let reasoning = Arc::new(MockReasoning::default());
        let services = Services::new(handler.clone())
            .with_lookup(lookup.clone())
            .with_reasoning(reasoning.clone());
        let engine = Engine::new(config, services).expect("default config builds an engine");
        Self {
            engine,
            handler,
            lookup,
            reasoning,
        }
    }
}

/// "implement login screen" over two UI files.
pub fn login_request() -> TaskRequest {
    TaskRequest::new("implement login screen")
        .with_scope(["Sources/UI/LoginScreen.swift", "Sources/UI/LoginView.swift"])
}

/// `n` plain source paths.
pub fn files(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("Sources/App/File{}.swift", i)).collect()
}
