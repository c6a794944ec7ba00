//! Resource governor.
//!
//! The governor owns the resource level of one run. Usage is charged as
//! handlers report it; the level is derived from the consumed fraction of the
//! caller's budget and published on a `watch` channel so a running phase can
//! react to an escalation without polling.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::core::request::ResourceBudget;
use crate::mlog_warn;

/// Coarse bucket of budget consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Green,
    Yellow,
    Orange,
    Red,
    Critical,
}

impl ResourceLevel {
    /// Level for a usage fraction. A fraction equal to a breakpoint belongs to
    /// the higher level.
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction.is_nan() || fraction < 0.60 {
            ResourceLevel::Green
        } else if fraction < 0.75 {
            ResourceLevel::Yellow
        } else if fraction < 0.85 {
            ResourceLevel::Orange
        } else if fraction < 0.95 {
            ResourceLevel::Red
        } else {
            ResourceLevel::Critical
        }
    }

    pub fn is_critical(&self) -> bool {
        *self == ResourceLevel::Critical
    }

    pub fn verbosity(&self) -> Verbosity {
        match self {
            ResourceLevel::Green => Verbosity::Full,
            ResourceLevel::Yellow | ResourceLevel::Orange => Verbosity::Reduced,
            ResourceLevel::Red | ResourceLevel::Critical => Verbosity::Minimal,
        }
    }

    /// Concurrent units allowed at this level, given the configured maximum.
    pub fn parallelism(&self, max: usize) -> usize {
        let max = max.max(1);
        match self {
            ResourceLevel::Green | ResourceLevel::Yellow => max,
            ResourceLevel::Orange => (max / 2).max(1),
            ResourceLevel::Red | ResourceLevel::Critical => 1,
        }
    }
}

impl std::fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLevel::Green => write!(f, "green"),
            ResourceLevel::Yellow => write!(f, "yellow"),
            ResourceLevel::Orange => write!(f, "orange"),
            ResourceLevel::Red => write!(f, "red"),
            ResourceLevel::Critical => write!(f, "critical"),
        }
    }
}

/// How much output handlers are asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Full,
    Reduced,
    Minimal,
}

/// Tracks usage against a budget for one run.
///
/// Shared as `Arc<ResourceGovernor>`; charging is lock-free.
#[derive(Debug)]
pub struct ResourceGovernor {
    limit: u64,
    used: AtomicU64,
    level_tx: watch::Sender<ResourceLevel>,
}

impl ResourceGovernor {
    pub fn new(budget: ResourceBudget) -> Self {
        let initial = level_for(0, budget.limit);
        let (level_tx, _) = watch::channel(initial);
        Self {
            limit: budget.limit,
            used: AtomicU64::new(0),
            level_tx,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Consumed fraction of the budget. A zero budget counts as exhausted.
    pub fn fraction(&self) -> f64 {
        fraction_of(self.used(), self.limit)
    }

    pub fn level(&self) -> ResourceLevel {
        *self.level_tx.borrow()
    }

    /// Receive every level change from now on.
    pub fn subscribe(&self) -> watch::Receiver<ResourceLevel> {
        self.level_tx.subscribe()
    }

    /// Record consumed units and return the resulting level.
    pub fn charge(&self, units: u64) -> ResourceLevel {
        let used = self
            .used
            .fetch_add(units, Ordering::SeqCst)
            .saturating_add(units);
        self.publish(level_for(used, self.limit))
    }

    /// Overwrite the recorded usage, e.g. with a figure reported by the caller.
    pub fn set_usage(&self, units: u64) -> ResourceLevel {
        self.used.store(units, Ordering::SeqCst);
        self.publish(level_for(units, self.limit))
    }

    fn publish(&self, level: ResourceLevel) -> ResourceLevel {
        let changed = self.level_tx.send_if_modified(|current| {
            if *current != level {
                *current = level;
                true
            } else {
                false
            }
        });
        if changed && level >= ResourceLevel::Red {
            mlog_warn!(
                "resource level {} ({} of {} units used)",
                level,
                self.used(),
                self.limit
            );
        }
        level
    }
}

fn fraction_of(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        1.0
    } else {
        used as f64 / limit as f64
    }
}

fn level_for(used: u64, limit: u64) -> ResourceLevel {
    ResourceLevel::from_fraction(fraction_of(used, limit))
}
