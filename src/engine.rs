//! Engine: the request/response facade.
//!
//! An [`Engine`] owns the validated configuration, the compiled pattern
//! registry, the handler registry and the gate pipeline for a session. Each
//! call to [`Engine::run`] routes one request, runs its plan under a fresh
//! resource governor and returns a [`RunReport`]. The context cache outlives
//! single runs and is dropped by [`Engine::end_session`].

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::ids::DomainTag;
use crate::core::plan::{ExecutionPlan, ReasoningDepth};
use crate::core::request::TaskRequest;
use crate::error::Result;
use crate::orchestration::cache::{CacheStats, CachedLookup, ContextCache};
use crate::orchestration::gates::{GateCheck, GateInput, GatePipeline};
use crate::orchestration::governor::ResourceGovernor;
use crate::orchestration::handler::{
    AccumulatedContext, AnalysisResult, ContextLookup, HandlerInvoker, ReasoningService,
};
use crate::orchestration::orchestrator::{Orchestrator, OrchestratorEvent};
use crate::orchestration::planner::{ExecutionPlanner, PlanningInput};
use crate::report::{failure_message, Escalation, RunId, RunReport, RunStatus};
use crate::routing::complexity::{ComplexityScore, ComplexityScorer};
use crate::routing::domain::{DomainDetection, DomainDetector};
use crate::routing::registry::CompiledRegistry;
use crate::routing::selector::{
    Assignment, ExternalService, HandlerRegistry, HandlerSelector, Subtask,
};
use crate::{mlog, mlog_debug, mlog_warn};

/// The external collaborators an engine talks to.
#[derive(Clone)]
pub struct Services {
    pub invoker: Arc<dyn HandlerInvoker>,
    pub lookup: Option<Arc<dyn ContextLookup>>,
    pub reasoning: Option<Arc<dyn ReasoningService>>,
}

impl Services {
    pub fn new(invoker: Arc<dyn HandlerInvoker>) -> Self {
        Self {
            invoker,
            lookup: None,
            reasoning: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ContextLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_reasoning(mut self, reasoning: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }
}

/// Classification, assignment and plan for one request, before running.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub score: ComplexityScore,
    pub detection: DomainDetection,
    pub assignment: Assignment,
    pub plan: ExecutionPlan,
}

/// Result of routing a request.
#[derive(Debug, Clone)]
pub enum Routing {
    Planned(Box<RouteDecision>),
    /// No domain reached the suggestion threshold; the caller must pick one.
    DomainSelectionRequired { suggestions: Vec<DomainTag> },
    /// Domains were selected but none of them has an owning handler.
    Unassigned { subtasks: Vec<Subtask> },
}

/// Result of running a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Executed(Box<RunReport>),
    DomainSelectionRequired { suggestions: Vec<DomainTag> },
    Unassigned { subtasks: Vec<Subtask> },
}

impl Outcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Outcome::Executed(report) => Some(report),
            _ => None,
        }
    }

    pub fn into_report(self) -> Option<RunReport> {
        match self {
            Outcome::Executed(report) => Some(*report),
            _ => None,
        }
    }
}

pub struct Engine {
    config: Config,
    registry: CompiledRegistry,
    handlers: HandlerRegistry,
    gates: GatePipeline,
    cache: Arc<ContextCache>,
    services: Services,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

impl Engine {
    /// Validate the configuration and build the session.
    ///
    /// # Errors
    /// Configuration errors, invalid patterns, and handler registry errors
    /// such as `Error::AssignmentConflict` or `Error::DelegationCycle`.
    pub fn new(config: Config, services: Services) -> Result<Self> {
        config.validate()?;
        let registry = config.registry.compile()?;
        let handlers = HandlerRegistry::new(config.handlers.clone())?;
        let gates = GatePipeline::from_config(&config.gates);
        let cache = Arc::new(ContextCache::new(config.orchestration.cache_max_entries));

        mlog!(
            "engine: {} domain(s), {} handler(s), {} gate check(s)",
            registry.domains().len(),
            handlers.handlers().len(),
            gates.check_count()
        );

        Ok(Self {
            config,
            registry,
            handlers,
            gates,
            cache,
            services,
            event_tx: None,
        })
    }

    /// Forward orchestrator events of every run to `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Add a gate check alongside the built-in ones.
    pub fn register_check(&mut self, check: impl GateCheck + 'static) {
        self.gates.register(check);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Drop everything cached during the session.
    pub async fn end_session(&self) {
        let stats = self.cache.stats().await;
        self.cache.clear().await;
        mlog!(
            "engine: session ended, dropped {} cached document(s) ({} hits, {} misses)",
            stats.entries,
            stats.hits,
            stats.misses
        );
    }

    /// Classify, assign and plan a request without running it.
    pub fn route(&self, request: &TaskRequest) -> Result<Routing> {
        let thresholds = &self.config.thresholds;
        let score = ComplexityScorer::new(&self.registry, thresholds).score(request);
        let detection = DomainDetector::new(&self.registry, thresholds).detect(request)?;

        if detection.is_empty() && request.flags().handler.is_none() {
            mlog!("route: no domain matched '{}'", request.text());
            return Ok(Routing::DomainSelectionRequired {
                suggestions: self.registry.domains().iter().map(|d| d.tag.clone()).collect(),
            });
        }

        let assignment = HandlerSelector::new(&self.handlers).select(&detection, request)?;
        if assignment.is_empty() {
            mlog_warn!(
                "route: {} subtask(s) have no owning handler",
                assignment.unassigned.len()
            );
            return Ok(Routing::Unassigned {
                subtasks: assignment.unassigned,
            });
        }

        let input = PlanningInput {
            request,
            score: &score,
            assignment: &assignment,
            multi_handler: detection.multi_handler,
            command: self.registry.detect_command(request.text()),
        };
        let plan = ExecutionPlanner::new(&self.handlers, thresholds, &self.config.orchestration)
            .plan(&input)?;

        mlog_debug!(
            "route: score={:.3} tier={} domains={:?} handlers={:?}",
            score.value(),
            score.tier(),
            detection.tags(),
            assignment.handler_ids()
        );

        Ok(Routing::Planned(Box::new(RouteDecision {
            score,
            detection,
            assignment,
            plan,
        })))
    }

    pub async fn run(&self, request: TaskRequest) -> Result<Outcome> {
        self.run_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Run a request; cancelling `cancel` defers every phase not yet finished.
    pub async fn run_with_cancellation(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> Result<Outcome> {
        let decision = match self.route(&request)? {
            Routing::Planned(decision) => *decision,
            Routing::DomainSelectionRequired { suggestions } => {
                return Ok(Outcome::DomainSelectionRequired { suggestions })
            }
            Routing::Unassigned { subtasks } => return Ok(Outcome::Unassigned { subtasks }),
        };
        let RouteDecision {
            score,
            detection,
            assignment,
            plan,
        } = decision;

        let id = RunId::new();
        let started_at = Utc::now();
        mlog!(
            "run {}: tier={} strategy={} phases={}",
            id.short(),
            score.tier(),
            plan.strategy(),
            plan.len()
        );

        let analysis = match plan.reasoning() {
            Some(depth) => self.consult(request.text(), depth).await,
            None => None,
        };

        let governor = Arc::new(ResourceGovernor::new(request.budget()));
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&self.services.invoker),
            governor,
            self.config.orchestration.clone(),
        )
        .with_cancellation(cancel);
        if let Some(lookup) = self.lookup_for(&assignment) {
            orchestrator = orchestrator.with_lookup(lookup);
        }
        if let Some(tx) = &self.event_tx {
            orchestrator = orchestrator.with_events(tx.clone());
        }

        let outcome = orchestrator
            .run(&plan, AccumulatedContext::new(request.text(), analysis.clone()))
            .await?;

        let output = outcome.final_output().map(str::to_string);
        let domains: Vec<DomainTag> = assignment
            .handlers
            .iter()
            .flat_map(|a| a.subtasks.iter().map(|s| s.domain.clone()))
            .collect();
        let gates = self.gates.run(&GateInput {
            task: request.text(),
            scope: request.scope(),
            domains: &domains,
            output: output.as_deref().unwrap_or_default(),
        });

        let mut escalations = Vec::new();
        for result in gates.escalations() {
            let problem = format!(
                "{} gate finding for '{}': {}",
                result.stage,
                request.text(),
                result.note.as_deref().unwrap_or("no details")
            );
            if let Some(analysis) = self.consult(&problem, ReasoningDepth::Deep).await {
                escalations.push(Escalation {
                    stage: result.stage,
                    analysis,
                });
            }
        }

        let status = RunStatus::from_parts(&outcome.phases, &gates);
        let failure = match status {
            RunStatus::Failed => failure_message(&outcome.phases, &gates),
            _ => None,
        };
        mlog!("run {}: {}", id.short(), status);

        Ok(Outcome::Executed(Box::new(RunReport {
            id,
            task: request.text().to_string(),
            complexity: score,
            domains: detection.matches,
            assignment,
            architecture_decision: outcome.architecture_decision().map(str::to_string),
            plan,
            analysis,
            phases: outcome.phases,
            output,
            gates,
            escalations,
            status,
            failure,
            started_at,
            finished_at: Utc::now(),
        })))
    }

    /// Ask the reasoning service, if configured. Failures are logged and
    /// leave the run without analysis.
    async fn consult(&self, problem: &str, depth: ReasoningDepth) -> Option<AnalysisResult> {
        let reasoning = self.services.reasoning.as_ref()?;
        match reasoning.analyze(problem, depth).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                mlog_warn!("reasoning ({}) failed: {}", depth, e);
                None
            }
        }
    }

    /// The cached lookup, when a service is configured and an assigned
    /// handler declares it needs one.
    fn lookup_for(&self, assignment: &Assignment) -> Option<CachedLookup> {
        let service = self.services.lookup.as_ref()?;
        assignment
            .handler_ids()
            .into_iter()
            .any(|h| self.handlers.requires(h, ExternalService::ContextLookup))
            .then(|| CachedLookup::new(Arc::clone(&self.cache), Arc::clone(service)))
    }
}
