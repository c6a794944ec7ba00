//! Execution planner.
//!
//! Turns a routed request into an [`ExecutionPlan`]. The strategy follows the
//! complexity tier unless the caller forces one:
//!
//! - quick: one sequential phase
//! - standard, or enterprise with a small scope: the five-phase pipeline
//! - enterprise with a scope above the wave threshold: a wave template
//!
//! Phases only ever depend on essential phases, so deferring a non-essential
//! phase never cascades into the work itself.

use crate::config::{OrchestrationConfig, Thresholds};
use crate::core::ids::HandlerId;
use crate::core::phase::{ConcurrencyMode, Phase, PhaseId, PhaseKind, WorkUnit};
use crate::core::plan::{ExecutionPlan, ExecutionStrategy, ReasoningDepth, WaveStrategy};
use crate::core::request::TaskRequest;
use crate::error::{Error, Result};
use crate::mlog;
use crate::routing::complexity::{ComplexityScore, ComplexityTier};
use crate::routing::registry::CommandMapping;
use crate::routing::selector::{Assignment, HandlerRegistry};

/// Routing results the planner works from.
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    pub request: &'a TaskRequest,
    pub score: &'a ComplexityScore,
    pub assignment: &'a Assignment,
    /// Whether domain detection asked for multi-handler coordination.
    pub multi_handler: bool,
    /// The command verb detected in the task text.
    pub command: Option<&'a CommandMapping>,
}

pub struct ExecutionPlanner<'a> {
    handlers: &'a HandlerRegistry,
    thresholds: &'a Thresholds,
    config: &'a OrchestrationConfig,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(
        handlers: &'a HandlerRegistry,
        thresholds: &'a Thresholds,
        config: &'a OrchestrationConfig,
    ) -> Self {
        Self {
            handlers,
            thresholds,
            config,
        }
    }

    /// Pick the strategy for a request. A forced strategy always wins.
    pub fn choose_strategy(&self, input: &PlanningInput<'_>) -> ExecutionStrategy {
        if let Some(forced) = input.request.flags().strategy {
            return forced.into();
        }
        let files = input
            .request
            .scope_file_estimate(self.thresholds.glob_file_estimate);
        match input.score.tier() {
            ComplexityTier::Quick => ExecutionStrategy::Single,
            ComplexityTier::Standard => ExecutionStrategy::Pipeline,
            ComplexityTier::Enterprise if files > self.thresholds.wave_file_threshold => {
                let wave = input.command.and_then(|c| c.wave).unwrap_or(
                    if files > self.thresholds.enterprise_file_threshold {
                        WaveStrategy::Enterprise
                    } else {
                        WaveStrategy::Adaptive
                    },
                );
                ExecutionStrategy::Wave(wave)
            }
            ComplexityTier::Enterprise => ExecutionStrategy::Pipeline,
        }
    }

    pub fn plan(&self, input: &PlanningInput<'_>) -> Result<ExecutionPlan> {
        if input.assignment.is_empty() {
            return Err(Error::Validation(
                "No handler is assigned to any part of the task".to_string(),
            ));
        }

        let strategy = self.choose_strategy(input);
        let reasoning = match strategy {
            ExecutionStrategy::Single => None,
            ExecutionStrategy::Wave(WaveStrategy::Enterprise) => Some(ReasoningDepth::Maximum),
            _ if input.score.tier() == ComplexityTier::Enterprise => Some(ReasoningDepth::Deep),
            _ => Some(ReasoningDepth::Standard),
        };

        let mut builder = PhaseBuilder::new(self, input);
        match strategy {
            ExecutionStrategy::Single => builder.single(),
            ExecutionStrategy::Pipeline => builder.pipeline(),
            ExecutionStrategy::Wave(WaveStrategy::Progressive) => {
                builder.progressive(self.config.progressive_iterations.max(1))
            }
            ExecutionStrategy::Wave(WaveStrategy::Systematic) => builder.systematic(),
            ExecutionStrategy::Wave(WaveStrategy::Adaptive) => {
                builder.adaptive(self.config.adaptive_wave_size.max(1))
            }
            ExecutionStrategy::Wave(WaveStrategy::Enterprise) => builder.enterprise(),
        }

        let plan = ExecutionPlan::new(strategy, builder.phases, reasoning)?;
        mlog!(
            "plan: strategy={} phases={} reasoning={}",
            plan.strategy(),
            plan.len(),
            plan.reasoning()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(plan)
    }

    /// The handler that owns plan-level steps.
    ///
    /// The command's lead if it was assigned work, otherwise the first
    /// assigned coordinator, otherwise the first assigned handler.
    pub fn primary_handler<'i>(&self, input: &PlanningInput<'i>) -> Option<&'i HandlerId> {
        let assigned = input.assignment.handler_ids();
        input
            .command
            .and_then(|c| c.lead.as_ref())
            .and_then(|lead| assigned.iter().copied().find(|h| *h == lead))
            .or_else(|| {
                assigned
                    .iter()
                    .copied()
                    .find(|h| self.handlers.is_coordinator(h))
            })
            .or_else(|| assigned.first().copied())
    }

    /// The handler that aggregates a hierarchical phase.
    pub fn coordinator_handler(&self, input: &PlanningInput<'_>) -> Option<HandlerId> {
        input
            .command
            .and_then(|c| c.lead.as_ref())
            .filter(|lead| self.handlers.contains(lead))
            .cloned()
            .or_else(|| {
                input
                    .assignment
                    .handler_ids()
                    .into_iter()
                    .find(|h| self.handlers.is_coordinator(h))
                    .cloned()
            })
            .or_else(|| self.primary_handler(input).cloned())
    }
}

/// Appends phases with sequential ids.
struct PhaseBuilder<'p> {
    phases: Vec<Phase>,
    text: &'p str,
    /// One unit per assigned handler, in assignment order.
    units: Vec<WorkUnit>,
    primary: HandlerId,
    coordinator: HandlerId,
    multi_handler: bool,
}

impl<'p> PhaseBuilder<'p> {
    fn new(planner: &ExecutionPlanner<'_>, input: &PlanningInput<'p>) -> Self {
        let units: Vec<WorkUnit> = input
            .assignment
            .handlers
            .iter()
            .map(|a| {
                let subtask = a
                    .subtasks
                    .iter()
                    .map(|s| s.description.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                WorkUnit::new(a.handler.clone(), subtask)
            })
            .collect();
        // plan() rejects empty assignments, so both handlers exist.
        let primary = planner
            .primary_handler(input)
            .cloned()
            .unwrap_or_else(|| units[0].handler.clone());
        let coordinator = planner
            .coordinator_handler(input)
            .unwrap_or_else(|| primary.clone());
        Self {
            phases: Vec::new(),
            text: input.request.text(),
            units,
            primary,
            coordinator,
            multi_handler: input.multi_handler,
        }
    }

    fn next_id(&self) -> PhaseId {
        PhaseId(self.phases.len())
    }

    fn push(&mut self, phase: Phase) -> PhaseId {
        let id = phase.id;
        self.phases.push(phase);
        id
    }

    fn primary_unit(&self) -> WorkUnit {
        WorkUnit::new(self.primary.clone(), self.text)
    }

    fn coordinator_unit(&self) -> WorkUnit {
        WorkUnit::new(self.coordinator.clone(), self.text)
    }

    /// A phase every assigned handler works on concurrently.
    fn parallel(&self, kind: PhaseKind, deps: &[PhaseId]) -> Phase {
        let mode = if self.units.len() > 1 {
            ConcurrencyMode::ParallelIndependent
        } else {
            ConcurrencyMode::SequentialDependent
        };
        Phase::new(self.next_id(), kind, mode)
            .with_units(self.units.clone())
            .depends_on(deps.iter().copied())
    }

    /// A phase run by the primary handler alone.
    fn solo(&self, kind: PhaseKind, deps: &[PhaseId]) -> Phase {
        Phase::new(self.next_id(), kind, ConcurrencyMode::SequentialDependent)
            .with_units(vec![self.primary_unit()])
            .depends_on(deps.iter().copied())
    }

    /// An execute-style phase over `units`.
    fn execute(&self, kind: PhaseKind, units: Vec<WorkUnit>, deps: &[PhaseId]) -> Phase {
        let phase = Phase::new(self.next_id(), kind, ConcurrencyMode::SequentialDependent)
            .depends_on(deps.iter().copied());
        if units.len() > 1 && self.multi_handler {
            Phase {
                mode: ConcurrencyMode::HierarchicalCoordinated,
                ..phase
            }
            .with_units(units)
            .with_coordinator(self.coordinator_unit())
        } else {
            phase.with_units(units)
        }
    }

    fn single(&mut self) {
        let phase = Phase::new(self.next_id(), PhaseKind::Execute, ConcurrencyMode::SequentialDependent)
            .with_units(self.units.clone());
        self.push(phase);
    }

    fn pipeline(&mut self) {
        let lookup = self.parallel(PhaseKind::ContextLookup, &[]).non_essential();
        self.push(lookup);
        let analyze = self.parallel(PhaseKind::Analyze, &[]);
        let analyze = self.push(analyze);
        let plan = self.solo(PhaseKind::Plan, &[analyze]);
        let plan = self.push(plan);
        let execute = self.execute(PhaseKind::Execute, self.units.clone(), &[plan]);
        let execute = self.push(execute);
        let validate = self.solo(PhaseKind::Validate, &[execute]).non_essential();
        self.push(validate);
    }

    fn progressive(&mut self, iterations: u32) {
        let analyze = self.parallel(PhaseKind::Analyze, &[]);
        let mut last = self.push(analyze);
        for n in 1..=iterations {
            let change = self.execute(PhaseKind::Change(n), self.units.clone(), &[last]);
            last = self.push(change);
            // Validation feeds back into the next increment but never gates it.
            let validate = self.solo(PhaseKind::CycleValidate(n), &[last]).non_essential();
            self.push(validate);
        }
    }

    fn systematic(&mut self) {
        let enumerate = self.parallel(PhaseKind::Enumerate, &[]);
        let enumerate = self.push(enumerate);
        let categorize = self.solo(PhaseKind::Categorize, &[enumerate]);
        let categorize = self.push(categorize);
        let prioritize = self.solo(PhaseKind::Prioritize, &[categorize]);
        let prioritize = self.push(prioritize);
        let execute = self.execute(PhaseKind::Execute, self.units.clone(), &[prioritize]);
        let execute = self.push(execute);
        let validate = self.solo(PhaseKind::Validate, &[execute]).non_essential();
        self.push(validate);
    }

    fn adaptive(&mut self, wave_size: usize) {
        let assess = self.solo(PhaseKind::Assess, &[]);
        let mut last = self.push(assess);
        let waves: Vec<Vec<WorkUnit>> = self.units.chunks(wave_size).map(|c| c.to_vec()).collect();
        for (index, wave) in waves.into_iter().enumerate() {
            let n = index + 1;
            let execute = self
                .execute(PhaseKind::Execute, wave, &[last])
                .with_name(format!("execute-wave-{}", n));
            last = self.push(execute);
            let reassess = self
                .solo(PhaseKind::Reassess, &[last])
                .with_name(format!("reassess-{}", n))
                .non_essential();
            self.push(reassess);
        }
        let validate = self.solo(PhaseKind::Validate, &[last]).non_essential();
        self.push(validate);
    }

    fn enterprise(&mut self) {
        let analyze = self.parallel(PhaseKind::Analyze, &[]);
        let analyze = self.push(analyze);
        let decision = Phase::new(
            self.next_id(),
            PhaseKind::ArchitectureDecision,
            ConcurrencyMode::SequentialDependent,
        )
        .with_units(vec![self.coordinator_unit()])
        .depends_on([analyze]);
        let decision = self.push(decision);
        let execute = Phase::new(
            self.next_id(),
            PhaseKind::Execute,
            ConcurrencyMode::HierarchicalCoordinated,
        )
        .with_units(self.units.clone())
        .with_coordinator(self.coordinator_unit())
        .depends_on([decision]);
        let execute = self.push(execute);
        let validate = self.solo(PhaseKind::Validate, &[execute]).non_essential();
        self.push(validate);
    }
}
