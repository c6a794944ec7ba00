//! The caller's task request.
//!
//! A `TaskRequest` is built once with the consuming `with_*` methods and is
//! read-only afterwards; every later stage of routing borrows it.

use serde::{Deserialize, Serialize};

use crate::core::ids::{DomainTag, HandlerId};
use crate::core::plan::ForcedStrategy;

/// Default resource budget in abstract usage units.
pub const DEFAULT_BUDGET_UNITS: u64 = 100_000;

/// Explicit caller overrides. Each one takes precedence over the value the
/// engine would derive on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFlags {
    /// Route to this domain regardless of detected confidence.
    #[serde(default)]
    pub domain: Option<DomainTag>,
    /// Use this execution strategy regardless of the complexity tier.
    #[serde(default)]
    pub strategy: Option<ForcedStrategy>,
    /// Make this handler the primary owner of all work.
    #[serde(default)]
    pub handler: Option<HandlerId>,
}

impl TaskFlags {
    pub fn with_domain(mut self, domain: impl Into<DomainTag>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ForcedStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_handler(mut self, handler: impl Into<HandlerId>) -> Self {
        self.handler = Some(handler.into());
        self
    }
}

/// Resource budget supplied by the caller for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Total usage units the run may consume before it is considered exhausted.
    pub limit: u64,
}

impl ResourceBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_UNITS)
    }
}

/// A natural-language task plus its routing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    text: String,
    flags: TaskFlags,
    scope: Vec<String>,
    budget: ResourceBudget,
}

impl TaskRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            flags: TaskFlags::default(),
            scope: Vec::new(),
            budget: ResourceBudget::default(),
        }
    }

    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope
            .into_iter()
            .map(Into::into)
            .filter(|entry: &String| !entry.trim().is_empty())
            .collect();
        self
    }

    pub fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn flags(&self) -> &TaskFlags {
        &self.flags
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn budget(&self) -> ResourceBudget {
        self.budget
    }

    /// Estimated number of files the scope covers.
    ///
    /// Plain paths count as one file each; glob entries count as
    /// `glob_file_estimate` files since they are never expanded here.
    pub fn scope_file_estimate(&self, glob_file_estimate: usize) -> usize {
        self.scope
            .iter()
            .map(|entry| {
                if is_glob(entry) {
                    glob_file_estimate
                } else {
                    1
                }
            })
            .sum()
    }
}

/// Whether a scope entry is a glob rather than a literal path.
pub fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '[', '{'])
}
