//! Complexity scoring.
//!
//! The score is a fixed-weight sum of four signals, each normalized to
//! [0, 1] before weighting:
//!
//! | Signal  | Weight | Source |
//! |---------|--------|--------|
//! | keyword | 0.40   | distinct complexity keywords in the text |
//! | breadth | 0.30   | estimated file count of the scope |
//! | command | 0.20   | inherent complexity of the requested verb |
//! | steps   | 0.10   | estimated number of steps in the text |

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::config::Thresholds;
use crate::core::request::TaskRequest;
use crate::mlog_trace;
use crate::routing::registry::CompiledRegistry;
use crate::util::clamp_unit;

pub const KEYWORD_WEIGHT: f64 = 0.40;
pub const BREADTH_WEIGHT: f64 = 0.30;
pub const COMMAND_WEIGHT: f64 = 0.20;
pub const STEP_WEIGHT: f64 = 0.10;

/// Distinct complexity keywords at which the keyword signal saturates.
const KEYWORD_SATURATION: f64 = 3.0;

/// Extra steps (beyond the first) at which the step signal saturates.
const STEP_SATURATION: f64 = 5.0;

/// Connectives that separate steps within a sentence.
static STEP_CONNECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:and\s+then|then|and|after\s+that|afterwards|finally|next|also)\b|;").unwrap()
});

/// Numbered or bulleted list items, one per line.
static STEP_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+\S").unwrap()
});

/// Discrete complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Quick,
    Standard,
    Enterprise,
}

impl ComplexityTier {
    /// Tier for a score: below `quick_max` is quick, above `enterprise_min`
    /// is enterprise, both boundaries themselves are standard.
    pub fn from_score(score: f64, thresholds: &Thresholds) -> Self {
        if score < thresholds.quick_max {
            ComplexityTier::Quick
        } else if score > thresholds.enterprise_min {
            ComplexityTier::Enterprise
        } else {
            ComplexityTier::Standard
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityTier::Quick => write!(f, "quick"),
            ComplexityTier::Standard => write!(f, "standard"),
            ComplexityTier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// The normalized value of each signal before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub keyword: f64,
    pub breadth: f64,
    pub command: f64,
    pub steps: f64,
}

impl SignalBreakdown {
    pub fn weighted_sum(&self) -> f64 {
        self.keyword * KEYWORD_WEIGHT
            + self.breadth * BREADTH_WEIGHT
            + self.command * COMMAND_WEIGHT
            + self.steps * STEP_WEIGHT
    }
}

/// A complexity score in [0, 1] and its tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    value: f64,
    tier: ComplexityTier,
    signals: SignalBreakdown,
}

impl ComplexityScore {
    /// Build a score from a raw value, clamping it into [0, 1].
    pub fn from_value(value: f64, thresholds: &Thresholds) -> Self {
        Self::from_signals(value, SignalBreakdown::default(), thresholds)
    }

    fn from_signals(value: f64, signals: SignalBreakdown, thresholds: &Thresholds) -> Self {
        let value = clamp_unit(value);
        Self {
            value,
            tier: ComplexityTier::from_score(value, thresholds),
            signals,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tier(&self) -> ComplexityTier {
        self.tier
    }

    pub fn signals(&self) -> &SignalBreakdown {
        &self.signals
    }
}

/// Computes `ComplexityScore`s from requests.
pub struct ComplexityScorer<'a> {
    registry: &'a CompiledRegistry,
    thresholds: &'a Thresholds,
}

impl<'a> ComplexityScorer<'a> {
    pub fn new(registry: &'a CompiledRegistry, thresholds: &'a Thresholds) -> Self {
        Self {
            registry,
            thresholds,
        }
    }

    pub fn score(&self, request: &TaskRequest) -> ComplexityScore {
        let text = request.text();
        let signals = SignalBreakdown {
            keyword: self.keyword_signal(text),
            breadth: self.breadth_signal(request),
            command: self.command_signal(text),
            steps: step_signal(text),
        };
        let score = ComplexityScore::from_signals(signals.weighted_sum(), signals, self.thresholds);
        mlog_trace!(
            "complexity: value={:.3} tier={} keyword={:.2} breadth={:.2} command={:.2} steps={:.2}",
            score.value,
            score.tier,
            signals.keyword,
            signals.breadth,
            signals.command,
            signals.steps
        );
        score
    }

    fn keyword_signal(&self, text: &str) -> f64 {
        let hits = self
            .registry
            .complexity_keywords()
            .iter()
            .filter(|k| k.is_match(text))
            .count();
        clamp_unit(hits as f64 / KEYWORD_SATURATION)
    }

    fn breadth_signal(&self, request: &TaskRequest) -> f64 {
        let files = request.scope_file_estimate(self.thresholds.glob_file_estimate);
        if files == 0 || self.thresholds.breadth_saturation == 0 {
            return 0.0;
        }
        clamp_unit(files as f64 / self.thresholds.breadth_saturation as f64)
    }

    fn command_signal(&self, text: &str) -> f64 {
        self.registry
            .detect_command(text)
            .map(|c| clamp_unit(c.complexity))
            .unwrap_or(0.0)
    }
}

/// Estimated number of steps described by the text (at least 1 for non-empty text).
pub fn estimate_steps(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    let list_items = STEP_LIST_RE.find_iter(text).count();
    let connectives = STEP_CONNECTIVE_RE.find_iter(text).count();
    // A list of N items is N steps; the line introducing it is not a step.
    list_items.max(1) + connectives
}

fn step_signal(text: &str) -> f64 {
    let extra = estimate_steps(text).saturating_sub(1);
    clamp_unit(extra as f64 / STEP_SATURATION)
}
