//! Orchestrator: runs an execution plan phase by phase.
//!
//! Phases run in declared order. Before each phase the orchestrator reads the
//! resource level and checks the phase's dependencies:
//! - a failed (or not attempted) dependency makes the phase `NotAttempted`
//! - a deferred or skipped dependency defers the phase
//! - at a critical level, non-essential phases are deferred
//!
//! Independent later phases keep running after a failure, so every phase of
//! the plan always ends up in the report.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestrationConfig;
use crate::core::phase::{ConcurrencyMode, Phase, PhaseId, PhaseKind, PhaseStatus, WorkUnit};
use crate::core::dag::PhaseGraph;
use crate::core::plan::ExecutionPlan;
use crate::error::Result;
use crate::orchestration::cache::CachedLookup;
use crate::orchestration::governor::{ResourceGovernor, ResourceLevel, Verbosity};
use crate::orchestration::handler::{
    AccumulatedContext, HandlerInvoker, HandlerOutput, Invocation, InvocationError, PhaseOutput,
    UnitOutput,
};
use crate::report::PhaseReport;
use crate::util::with_timeout;
use crate::{mlog, mlog_debug, mlog_warn};

/// Events emitted while a plan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    PhaseStarted { phase: PhaseId, name: String },
    PhaseCompleted { phase: PhaseId },
    PhaseFailed { phase: PhaseId, error: String },
    PhaseDeferred { phase: PhaseId, reason: String },
    PhaseSkipped { phase: PhaseId, reason: String },
    PhaseNotAttempted { phase: PhaseId, blocked_by: PhaseId },
    /// The resource level differs from the one seen before the previous phase.
    LevelChanged { level: ResourceLevel },
    /// Every phase has a final status.
    RunFinished,
}

/// Phase reports plus the context accumulated from completed phases.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub phases: Vec<PhaseReport>,
    pub context: AccumulatedContext,
}

impl OrchestrationOutcome {
    /// The work product of the run: the result of the last completed phase
    /// that changes things, falling back to the last completed phase.
    pub fn final_output(&self) -> Option<&str> {
        let is_work = |kind: PhaseKind| {
            matches!(
                kind,
                PhaseKind::Execute | PhaseKind::Change(_) | PhaseKind::ArchitectureDecision
            )
        };
        self.phases
            .iter()
            .rev()
            .filter(|p| p.status.is_completed())
            .find(|p| is_work(p.kind))
            .or_else(|| self.phases.iter().rev().find(|p| p.status.is_completed()))
            .and_then(|p| self.context.output_of(p.phase))
            .and_then(|o| o.result())
    }

    /// Result of the architecture decision phase, if it completed.
    pub fn architecture_decision(&self) -> Option<&str> {
        self.phases
            .iter()
            .find(|p| p.kind == PhaseKind::ArchitectureDecision && p.status.is_completed())
            .and_then(|p| self.context.output_of(p.phase))
            .and_then(|o| o.result())
    }
}

/// Invokes a single unit with timeout and retry. Cheap to clone into tasks.
#[derive(Clone)]
struct UnitRunner {
    invoker: Arc<dyn HandlerInvoker>,
    governor: Arc<ResourceGovernor>,
    config: OrchestrationConfig,
    retries: Arc<AtomicU32>,
}

impl UnitRunner {
    async fn run(&self, invocation: Invocation) -> std::result::Result<UnitOutput, InvocationError> {
        let handler = invocation.handler.clone();
        let mut attempt = 0u32;
        loop {
            if invocation.is_cancelled() {
                return Err(InvocationError::Cancelled);
            }
            let result = match with_timeout(
                self.config.invocation_timeout(),
                self.invoker.invoke(invocation.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(e) => Err(InvocationError::Transient(e.to_string())),
            };

            match result {
                Ok(HandlerOutput { content, units }) => {
                    self.governor.charge(units);
                    return Ok(UnitOutput { handler, content });
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::SeqCst);
                    let delay = self.config.retry_delay(attempt);
                    mlog_warn!(
                        "handler {} failed ({}), retry {}/{} in {:?}",
                        handler,
                        e,
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    tokio::select! {
                        _ = invocation.cancel.cancelled() => return Err(InvocationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Result of running the units of one phase.
enum PhaseRun {
    Completed {
        outputs: Vec<UnitOutput>,
        aggregate: Option<UnitOutput>,
    },
    Failed(InvocationError),
    /// The level became critical mid-phase and the units were cancelled.
    Escalated,
    /// The run was cancelled by the caller.
    Cancelled,
}

pub struct Orchestrator {
    invoker: Arc<dyn HandlerInvoker>,
    governor: Arc<ResourceGovernor>,
    config: OrchestrationConfig,
    lookup: Option<CachedLookup>,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        invoker: Arc<dyn HandlerInvoker>,
        governor: Arc<ResourceGovernor>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            invoker,
            governor,
            config,
            lookup: None,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_lookup(mut self, lookup: CachedLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Use a caller-owned token; cancelling it defers every phase not yet finished.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn run(&self, plan: &ExecutionPlan, context: AccumulatedContext) -> Result<OrchestrationOutcome> {
        let graph = plan.graph()?;
        let mut context = context;
        let mut reports: Vec<PhaseReport> = Vec::with_capacity(plan.len());
        let mut last_level: Option<ResourceLevel> = None;
        let mut last_change: Option<String> = None;
        let mut converged_at: Option<u32> = None;

        mlog!(
            "orchestrator: running {} phase(s), strategy={}",
            plan.len(),
            plan.strategy()
        );

        for phase in plan.phases() {
            let level = self.governor.level();
            if last_level.is_some_and(|l| l != level) {
                self.emit(OrchestratorEvent::LevelChanged { level }).await;
            }
            last_level = Some(level);

            let mut report = PhaseReport {
                phase: phase.id,
                name: phase.name.clone(),
                kind: phase.kind,
                mode: phase.mode,
                essential: phase.essential,
                status: PhaseStatus::Pending,
                outputs: Vec::new(),
                aggregate: None,
                retries: 0,
                level,
                started_at: None,
                finished_at: None,
            };

            if let Some(status) = self.precheck(phase, &graph, level, &reports, converged_at) {
                report.status = status;
                self.emit_status(&report).await;
                reports.push(report);
                continue;
            }

            self.emit(OrchestratorEvent::PhaseStarted {
                phase: phase.id,
                name: phase.name.clone(),
            })
            .await;
            report.started_at = Some(Utc::now());

            let retries = Arc::new(AtomicU32::new(0));
            let run = self
                .run_phase(phase, level, Arc::new(context.clone()), &retries)
                .await;
            report.retries = retries.load(Ordering::SeqCst);
            report.finished_at = Some(Utc::now());

            report.status = match run {
                PhaseRun::Completed { outputs, aggregate } => {
                    let output = PhaseOutput {
                        phase: phase.id,
                        name: phase.name.clone(),
                        outputs: outputs.clone(),
                        aggregate: aggregate.clone(),
                    };
                    if let PhaseKind::Change(n) = phase.kind {
                        let result = output.result().map(str::to_string);
                        if result.is_some() && result == last_change {
                            mlog_debug!("orchestrator: progressive cycle {} converged", n);
                            converged_at = Some(n);
                        }
                        last_change = result;
                    }
                    context.phases.push(output);
                    report.outputs = outputs;
                    report.aggregate = aggregate;
                    PhaseStatus::Completed
                }
                PhaseRun::Failed(e) => PhaseStatus::Failed {
                    error: e.to_string(),
                },
                PhaseRun::Escalated => PhaseStatus::Deferred {
                    reason: "resource level became critical during the phase".to_string(),
                },
                PhaseRun::Cancelled => PhaseStatus::Deferred {
                    reason: "run cancelled".to_string(),
                },
            };

            self.emit_status(&report).await;
            reports.push(report);
        }

        // Dependencies always precede their dependents, so every phase was
        // settled in the single pass above.
        debug_assert!(reports.iter().all(|r| r.status != PhaseStatus::Pending));
        mlog_debug!(
            "orchestrator: finished, {} dependency edge(s)",
            graph.dependency_count()
        );
        self.emit(OrchestratorEvent::RunFinished).await;

        Ok(OrchestrationOutcome {
            phases: reports,
            context,
        })
    }

    /// A final status for a phase that must not run, or `None` to run it.
    fn precheck(
        &self,
        phase: &Phase,
        graph: &PhaseGraph,
        level: ResourceLevel,
        reports: &[PhaseReport],
        converged_at: Option<u32>,
    ) -> Option<PhaseStatus> {
        if let (Some(at), PhaseKind::Change(n) | PhaseKind::CycleValidate(n)) = (converged_at, phase.kind) {
            if n > at {
                return Some(PhaseStatus::Skipped {
                    reason: format!("converged at increment {}", at),
                });
            }
        }

        let dependencies = graph.dependencies(phase.id);
        let dependency_status = |dep: &PhaseId| reports.get(dep.0).map(|r| &r.status);

        if let Some(blocked_by) = dependencies.iter().copied().find(|dep| {
            matches!(
                dependency_status(dep),
                Some(PhaseStatus::Failed { .. } | PhaseStatus::NotAttempted { .. })
            )
        }) {
            return Some(PhaseStatus::NotAttempted { blocked_by });
        }

        if let Some(dep) = dependencies.iter().copied().find(|dep| {
            matches!(
                dependency_status(dep),
                Some(PhaseStatus::Deferred { .. } | PhaseStatus::Skipped { .. })
            )
        }) {
            return Some(PhaseStatus::Deferred {
                reason: format!("dependency {} did not run", dep),
            });
        }

        if self.cancel.is_cancelled() {
            return Some(PhaseStatus::Deferred {
                reason: "run cancelled".to_string(),
            });
        }

        if level.is_critical() && !phase.essential {
            return Some(PhaseStatus::Deferred {
                reason: "resource level critical".to_string(),
            });
        }

        None
    }

    async fn emit_status(&self, report: &PhaseReport) {
        let phase = report.phase;
        let event = match &report.status {
            PhaseStatus::Completed => OrchestratorEvent::PhaseCompleted { phase },
            PhaseStatus::Failed { error } => OrchestratorEvent::PhaseFailed {
                phase,
                error: error.clone(),
            },
            PhaseStatus::Deferred { reason } => OrchestratorEvent::PhaseDeferred {
                phase,
                reason: reason.clone(),
            },
            PhaseStatus::Skipped { reason } => OrchestratorEvent::PhaseSkipped {
                phase,
                reason: reason.clone(),
            },
            PhaseStatus::NotAttempted { blocked_by } => OrchestratorEvent::PhaseNotAttempted {
                phase,
                blocked_by: *blocked_by,
            },
            PhaseStatus::Pending => return,
        };
        match &report.status {
            PhaseStatus::Completed => mlog_debug!("phase {} '{}' completed", phase, report.name),
            status => mlog!("phase {} '{}' {}", phase, report.name, status),
        }
        self.emit(event).await;
    }

    async fn run_phase(
        &self,
        phase: &Phase,
        level: ResourceLevel,
        context: Arc<AccumulatedContext>,
        retries: &Arc<AtomicU32>,
    ) -> PhaseRun {
        let token = self.cancel.child_token();
        let runner = UnitRunner {
            invoker: Arc::clone(&self.invoker),
            governor: Arc::clone(&self.governor),
            config: self.config.clone(),
            retries: Arc::clone(retries),
        };
        let scope = PhaseScope {
            phase,
            verbosity: level.verbosity(),
            parallelism: level.parallelism(self.config.max_parallelism),
            context,
            token: token.clone(),
            lookup: self.lookup.clone(),
            governor: Arc::clone(&self.governor),
        };

        let work = scope.execute(&runner);
        tokio::pin!(work);
        let escalation = wait_for_escalation(self.governor.subscribe(), level);
        tokio::pin!(escalation);

        // Finished work wins over an escalation observed in the same poll.
        let mut escalated = false;
        let result = loop {
            tokio::select! {
                biased;
                result = &mut work => break result,
                _ = &mut escalation, if !escalated => {
                    mlog_warn!("phase {} '{}': resource level critical, cancelling units", phase.id, phase.name);
                    escalated = true;
                    token.cancel();
                }
            }
        };

        // Every unit returned output, so the cancel reached no one.
        match result {
            Ok((outputs, aggregate)) => PhaseRun::Completed { outputs, aggregate },
            Err(_) if escalated => PhaseRun::Escalated,
            Err(_) if self.cancel.is_cancelled() => PhaseRun::Cancelled,
            Err(e) => PhaseRun::Failed(e),
        }
    }
}

/// Resolves once the level turns critical, unless it already was at the start.
async fn wait_for_escalation(mut rx: watch::Receiver<ResourceLevel>, start: ResourceLevel) {
    if !start.is_critical() {
        let closed = rx.wait_for(|level| level.is_critical()).await.is_err();
        if !closed {
            return;
        }
    }
    std::future::pending::<()>().await
}

type UnitsResult = std::result::Result<(Vec<UnitOutput>, Option<UnitOutput>), InvocationError>;

/// Everything needed to build the invocations of one phase.
struct PhaseScope<'p> {
    phase: &'p Phase,
    verbosity: Verbosity,
    parallelism: usize,
    context: Arc<AccumulatedContext>,
    token: CancellationToken,
    lookup: Option<CachedLookup>,
    governor: Arc<ResourceGovernor>,
}

impl PhaseScope<'_> {
    fn invocation(&self, unit: &WorkUnit, instruction: String) -> Invocation {
        Invocation {
            handler: unit.handler.clone(),
            phase: self.phase.id,
            kind: self.phase.kind,
            subtask: unit.subtask.clone(),
            instruction,
            context: Arc::clone(&self.context),
            previous: self.context.latest().map(str::to_string),
            siblings: Vec::new(),
            verbosity: self.verbosity,
            cancel: self.token.clone(),
            lookup: self.lookup.clone(),
            governor: Arc::clone(&self.governor),
        }
    }

    fn worker_invocations(&self) -> Vec<Invocation> {
        self.phase
            .units
            .iter()
            .map(|unit| {
                let instruction = format!("{} {}", self.phase.kind.instruction(), unit.subtask);
                self.invocation(unit, instruction)
            })
            .collect()
    }

    async fn execute(&self, runner: &UnitRunner) -> UnitsResult {
        match self.phase.mode {
            ConcurrencyMode::SequentialDependent => {
                Ok((self.sequential(runner, self.worker_invocations()).await?, None))
            }
            ConcurrencyMode::ParallelIndependent => {
                Ok((self.parallel(runner, self.worker_invocations()).await?, None))
            }
            ConcurrencyMode::HierarchicalCoordinated => {
                let outputs = self.parallel(runner, self.worker_invocations()).await?;
                let Some(unit) = &self.phase.coordinator else {
                    return Ok((outputs, None));
                };
                let instruction = format!(
                    "Coordinate and integrate the {} results for: {}",
                    self.phase.kind, unit.subtask
                );
                let mut invocation = self.invocation(unit, instruction);
                invocation.siblings = outputs.clone();
                let aggregate = runner.run(invocation).await?;
                Ok((outputs, Some(aggregate)))
            }
        }
    }

    /// One unit at a time, each seeing the previous unit's output.
    async fn sequential(
        &self,
        runner: &UnitRunner,
        invocations: Vec<Invocation>,
    ) -> std::result::Result<Vec<UnitOutput>, InvocationError> {
        let mut outputs: Vec<UnitOutput> = Vec::with_capacity(invocations.len());
        for mut invocation in invocations {
            if let Some(previous) = outputs.last() {
                invocation.previous = Some(previous.content.clone());
            }
            outputs.push(runner.run(invocation).await?);
        }
        Ok(outputs)
    }

    /// All units as tokio tasks, bounded by the phase's parallelism. The first
    /// failure cancels the siblings; every task is awaited before returning.
    async fn parallel(
        &self,
        runner: &UnitRunner,
        invocations: Vec<Invocation>,
    ) -> std::result::Result<Vec<UnitOutput>, InvocationError> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism.max(1)));
        let count = invocations.len();
        let mut pending = FuturesUnordered::new();

        for (index, invocation) in invocations.into_iter().enumerate() {
            let runner = runner.clone();
            let semaphore = Arc::clone(&semaphore);
            pending.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, runner.run(invocation).await)
            }));
        }

        let mut outputs: Vec<Option<UnitOutput>> = vec![None; count];
        let mut first_error: Option<InvocationError> = None;

        while let Some(joined) = pending.next().await {
            let failure = match joined {
                Ok((index, Ok(output))) => {
                    outputs[index] = Some(output);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => InvocationError::Fatal(format!("handler task panicked: {}", e)),
            };
            if first_error.is_none() {
                self.token.cancel();
                first_error = Some(failure);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs.into_iter().flatten().collect()),
        }
    }
}
