//! Quality gate pipeline.
//!
//! Eight stages run in a fixed order over the final output of a run. Checks
//! are registered per stage and scoped to a domain (or to any domain); a stage
//! with no applicable check passes automatically and the worst verdict among
//! a stage's checks is the stage verdict.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::config::GateConfig;
use crate::core::ids::DomainTag;
use crate::mlog_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Syntax,
    /// Type and structure checks.
    Structure,
    /// Lint and style.
    Style,
    Security,
    Tests,
    Performance,
    /// Accessibility and other compliance rules.
    Compliance,
    Integration,
}

impl GateStage {
    pub const ALL: [GateStage; 8] = [
        GateStage::Syntax,
        GateStage::Structure,
        GateStage::Style,
        GateStage::Security,
        GateStage::Tests,
        GateStage::Performance,
        GateStage::Compliance,
        GateStage::Integration,
    ];
}

impl std::fmt::Display for GateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStage::Syntax => write!(f, "syntax"),
            GateStage::Structure => write!(f, "structure"),
            GateStage::Style => write!(f, "style"),
            GateStage::Security => write!(f, "security"),
            GateStage::Tests => write!(f, "tests"),
            GateStage::Performance => write!(f, "performance"),
            GateStage::Compliance => write!(f, "compliance"),
            GateStage::Integration => write!(f, "integration"),
        }
    }
}

/// Ordered from best to worst so the worst verdict is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Warning => write!(f, "warning"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// The result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub stage: GateStage,
    pub verdict: Verdict,
    /// Remediation advice, present for warnings and failures.
    pub note: Option<String>,
    /// Whether a failure of this stage fails the run.
    pub blocking: bool,
    /// Whether the findings should be escalated to deep reasoning.
    pub escalate: bool,
}

/// What a single check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub note: Option<String>,
    pub escalate: bool,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            note: None,
            escalate: false,
        }
    }

    pub fn warning(note: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Warning,
            note: Some(note.into()),
            escalate: false,
        }
    }

    pub fn fail(note: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            note: Some(note.into()),
            escalate: false,
        }
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }
}

/// Which requests a check applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateScope {
    AnyDomain,
    Domain(DomainTag),
}

impl GateScope {
    fn applies_to(&self, domains: &[DomainTag]) -> bool {
        match self {
            GateScope::AnyDomain => true,
            GateScope::Domain(tag) => domains.contains(tag),
        }
    }
}

/// What the checks inspect.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub task: &'a str,
    pub scope: &'a [String],
    pub domains: &'a [DomainTag],
    pub output: &'a str,
}

pub trait GateCheck: Send + Sync {
    fn name(&self) -> &str;
    fn stage(&self) -> GateStage;
    fn scope(&self) -> GateScope {
        GateScope::AnyDomain
    }
    fn check(&self, input: &GateInput<'_>) -> CheckOutcome;
}

/// All eight stage results and the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub results: Vec<GateResult>,
    pub overall: Verdict,
}

impl GateReport {
    pub fn result(&self, stage: GateStage) -> Option<&GateResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Results whose findings ask for escalation.
    pub fn escalations(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| r.escalate)
    }

    /// The first blocking failure, if any.
    pub fn blocking_failure(&self) -> Option<&GateResult> {
        self.results
            .iter()
            .find(|r| r.blocking && r.verdict == Verdict::Fail)
    }
}

pub struct GatePipeline {
    checks: Vec<Box<dyn GateCheck>>,
    non_blocking: HashSet<GateStage>,
}

impl GatePipeline {
    /// A pipeline with no checks; every stage passes.
    pub fn empty() -> Self {
        Self {
            checks: Vec::new(),
            non_blocking: HashSet::new(),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        let mut pipeline = Self::empty();
        pipeline.non_blocking = config.non_blocking_stages.iter().copied().collect();
        if config.builtin_checks {
            pipeline.register(FenceBalanceCheck);
            pipeline.register(SwiftPracticesCheck);
            pipeline.register(SecretLeakCheck);
        }
        pipeline
    }

    pub fn register(&mut self, check: impl GateCheck + 'static) {
        self.checks.push(Box::new(check));
    }

    pub fn set_non_blocking(&mut self, stage: GateStage) {
        self.non_blocking.insert(stage);
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    pub fn run(&self, input: &GateInput<'_>) -> GateReport {
        let results: Vec<GateResult> = GateStage::ALL
            .iter()
            .map(|&stage| self.run_stage(stage, input))
            .collect();

        let overall = results
            .iter()
            .map(|r| match r.verdict {
                Verdict::Fail if !r.blocking => Verdict::Warning,
                verdict => verdict,
            })
            .max()
            .unwrap_or(Verdict::Pass);

        mlog_debug!(
            "gates: overall={} [{}]",
            overall,
            results
                .iter()
                .map(|r| format!("{}={}", r.stage, r.verdict))
                .collect::<Vec<_>>()
                .join(", ")
        );

        GateReport { results, overall }
    }

    fn run_stage(&self, stage: GateStage, input: &GateInput<'_>) -> GateResult {
        let mut verdict = Verdict::Pass;
        let mut notes = Vec::new();
        let mut escalate = false;

        for check in self
            .checks
            .iter()
            .filter(|c| c.stage() == stage && c.scope().applies_to(input.domains))
        {
            let outcome = check.check(input);
            verdict = verdict.max(outcome.verdict);
            escalate |= outcome.escalate;
            if let Some(note) = outcome.note {
                notes.push(format!("{}: {}", check.name(), note));
            }
        }

        GateResult {
            stage,
            verdict,
            note: (!notes.is_empty()).then(|| notes.join("\n")),
            blocking: !self.non_blocking.contains(&stage),
            escalate,
        }
    }
}

/// Fenced code blocks in the output must be closed.
pub struct FenceBalanceCheck;

impl GateCheck for FenceBalanceCheck {
    fn name(&self) -> &str {
        "fence-balance"
    }

    fn stage(&self) -> GateStage {
        GateStage::Syntax
    }

    fn check(&self, input: &GateInput<'_>) -> CheckOutcome {
        let fences = input
            .output
            .lines()
            .filter(|line| line.trim_start().starts_with("```"))
            .count();
        if fences % 2 == 0 {
            CheckOutcome::pass()
        } else {
            CheckOutcome::fail(format!(
                "Unterminated code block ({} fence markers); close the last fence",
                fences
            ))
        }
    }
}

/// Best-practice reminders for Swift output.
pub struct SwiftPracticesCheck;

impl SwiftPracticesCheck {
    fn is_swift(input: &GateInput<'_>) -> bool {
        input.scope.iter().any(|p| p.ends_with(".swift"))
            || input.output.contains("```swift")
            || input.output.contains("import SwiftUI")
    }
}

impl GateCheck for SwiftPracticesCheck {
    fn name(&self) -> &str {
        "swift-practices"
    }

    fn stage(&self) -> GateStage {
        GateStage::Style
    }

    fn scope(&self) -> GateScope {
        GateScope::Domain(DomainTag::new("interface-layer"))
    }

    fn check(&self, input: &GateInput<'_>) -> CheckOutcome {
        if !Self::is_swift(input) {
            return CheckOutcome::pass();
        }
        let content = input.output;
        let mut reminders = Vec::new();

        if content.contains("ObservableObject") && !content.contains("@Observable") {
            reminders.push("Consider using @Observable (iOS 17+) instead of ObservableObject");
        }
        if content.to_lowercase().contains("force unwrap") || content.matches('!').count() > 5 {
            reminders.push("Avoid force unwrapping - use guard let or if let");
        }
        if content.contains("DispatchQueue.main") && content.contains("async") {
            reminders.push("Consider @MainActor instead of DispatchQueue.main in async contexts");
        }
        if content.contains("VStack {") && content.contains("ForEach") && !content.contains("LazyVStack") {
            reminders.push("Consider LazyVStack for better performance with ForEach");
        }

        if reminders.is_empty() {
            CheckOutcome::pass()
        } else {
            CheckOutcome::warning(reminders.join("; "))
        }
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("AWS access key", r"\bAKIA[0-9A-Z]{16}\b"),
        ("private key", r"-----BEGIN (?:RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----"),
        (
            "hard-coded credential",
            r#"(?i)\b(?:api[_-]?key|secret|password|passwd|access[_-]?token)\b\s*[:=]\s*["'][^"'\s]{8,}["']"#,
        ),
        ("GitHub token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

/// Credentials must not appear in the output.
pub struct SecretLeakCheck;

impl GateCheck for SecretLeakCheck {
    fn name(&self) -> &str {
        "secret-leak"
    }

    fn stage(&self) -> GateStage {
        GateStage::Security
    }

    fn check(&self, input: &GateInput<'_>) -> CheckOutcome {
        let found: Vec<&str> = SECRET_PATTERNS
            .iter()
            .filter(|(_, re)| re.is_match(input.output))
            .map(|(name, _)| *name)
            .collect();
        if found.is_empty() {
            CheckOutcome::pass()
        } else {
            CheckOutcome::fail(format!(
                "Possible secret in output ({}); move it to a secure store and rotate it",
                found.join(", ")
            ))
            .escalating()
        }
    }
}
