//! Run report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::phase::{ConcurrencyMode, PhaseId, PhaseKind, PhaseStatus};
use crate::core::plan::ExecutionPlan;
use crate::error::Result;
use crate::orchestration::gates::{GateReport, GateStage, Verdict};
use crate::orchestration::governor::ResourceLevel;
use crate::orchestration::handler::{AnalysisResult, UnitOutput};
use crate::routing::complexity::ComplexityScore;
use crate::routing::domain::DomainMatch;
use crate::routing::selector::Assignment;

/// Unique identifier for one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall outcome of a run.
///
/// Precedence when several apply: failed, deferred, completed with warnings,
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithWarnings,
    Failed,
    Deferred,
}

impl RunStatus {
    pub fn from_parts(phases: &[PhaseReport], gates: &GateReport) -> Self {
        let phase_failed = phases
            .iter()
            .any(|p| matches!(p.status, PhaseStatus::Failed { .. } | PhaseStatus::NotAttempted { .. }));
        if phase_failed || gates.blocking_failure().is_some() {
            RunStatus::Failed
        } else if phases
            .iter()
            .any(|p| matches!(p.status, PhaseStatus::Deferred { .. }))
        {
            RunStatus::Deferred
        } else if gates.overall != Verdict::Pass {
            RunStatus::CompletedWithWarnings
        } else {
            RunStatus::Completed
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::CompletedWithWarnings)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithWarnings => write!(f, "completed_with_warnings"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Deferred => write!(f, "deferred"),
        }
    }
}

/// What happened to one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: PhaseId,
    pub name: String,
    pub kind: PhaseKind,
    pub mode: ConcurrencyMode,
    pub essential: bool,
    pub status: PhaseStatus,
    #[serde(default)]
    pub outputs: Vec<UnitOutput>,
    #[serde(default)]
    pub aggregate: Option<UnitOutput>,
    /// Retries spent across all units of the phase.
    #[serde(default)]
    pub retries: u32,
    /// Resource level read before the phase started.
    pub level: ResourceLevel,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A deep-reasoning consultation triggered by a gate finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub stage: GateStage,
    pub analysis: AnalysisResult,
}

/// Everything the caller gets back from a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: RunId,
    pub task: String,
    pub complexity: ComplexityScore,
    pub domains: Vec<DomainMatch>,
    pub assignment: Assignment,
    pub plan: ExecutionPlan,
    pub analysis: Option<AnalysisResult>,
    pub phases: Vec<PhaseReport>,
    pub architecture_decision: Option<String>,
    /// Output the gates ran against.
    pub output: Option<String>,
    pub gates: GateReport,
    pub escalations: Vec<Escalation>,
    pub status: RunStatus,
    /// Error of the first failed phase, or the note of the first blocking gate failure.
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn phase(&self, id: PhaseId) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == id)
    }

    pub fn phases_with<F>(&self, predicate: F) -> Vec<&PhaseReport>
    where
        F: Fn(&PhaseStatus) -> bool,
    {
        self.phases.iter().filter(|p| predicate(&p.status)).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The failure message for a run, if it failed.
pub fn failure_message(phases: &[PhaseReport], gates: &GateReport) -> Option<String> {
    phases
        .iter()
        .find_map(|p| match &p.status {
            PhaseStatus::Failed { error } => Some(format!("phase '{}' failed: {}", p.name, error)),
            _ => None,
        })
        .or_else(|| {
            gates.blocking_failure().map(|g| {
                format!(
                    "{} gate failed: {}",
                    g.stage,
                    g.note.as_deref().unwrap_or("no remediation note")
                )
            })
        })
}
