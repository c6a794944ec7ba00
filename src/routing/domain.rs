//! Domain detection.
//!
//! Every registered domain gets a confidence from two signals:
//! - keyword: `1 - 0.5^hits` over the domain's keywords found in the text
//! - file: the fraction of scope entries matching one of the domain's globs
//!
//! combined as `1 - (1 - keyword) * (1 - 0.6 * file)`. A file-only match can
//! therefore reach 0.6, enough to be suggested but never auto-selected.

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::core::ids::DomainTag;
use crate::core::request::TaskRequest;
use crate::error::{Error, Result};
use crate::mlog_debug;
use crate::routing::registry::{CompiledDomain, CompiledRegistry};
use crate::util::clamp_unit;

/// Weight of the file signal in the combined confidence.
const FILE_SIGNAL_WEIGHT: f64 = 0.6;

/// How a domain match was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Above the suggestion threshold; used only if nothing is auto-selected.
    Suggested,
    /// Above the auto-activation threshold.
    AutoSelected,
}

/// Evidence behind a domain match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "signal")]
pub enum MatchedSignal {
    Keyword { keyword: String },
    FilePattern { pattern: String, path: String },
    /// The caller forced this domain.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMatch {
    pub domain: DomainTag,
    pub confidence: f64,
    pub activation: Activation,
    pub signals: Vec<MatchedSignal>,
    /// Registry position, used to break confidence ties.
    #[serde(skip)]
    priority: usize,
}

impl DomainMatch {
    pub fn is_auto_selected(&self) -> bool {
        self.activation == Activation::AutoSelected
    }
}

/// Ranked domain matches for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainDetection {
    /// Matches at or above the suggestion threshold, best first.
    pub matches: Vec<DomainMatch>,
    /// Whether the top confidence enables multi-handler coordination.
    pub multi_handler: bool,
}

impl DomainDetection {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn top(&self) -> Option<&DomainMatch> {
        self.matches.first()
    }

    pub fn auto_selected(&self) -> impl Iterator<Item = &DomainMatch> {
        self.matches.iter().filter(|m| m.is_auto_selected())
    }

    /// Tags of the matches, in rank order.
    pub fn tags(&self) -> Vec<&DomainTag> {
        self.matches.iter().map(|m| &m.domain).collect()
    }
}

pub struct DomainDetector<'a> {
    registry: &'a CompiledRegistry,
    thresholds: &'a Thresholds,
}

impl<'a> DomainDetector<'a> {
    pub fn new(registry: &'a CompiledRegistry, thresholds: &'a Thresholds) -> Self {
        Self {
            registry,
            thresholds,
        }
    }

    /// Rank the registry's domains against a request.
    ///
    /// # Errors
    /// `Error::UnknownDomain` if the request forces a domain the registry
    /// does not declare.
    pub fn detect(&self, request: &TaskRequest) -> Result<DomainDetection> {
        if let Some(forced) = &request.flags().domain {
            let domain = self
                .registry
                .domain(forced)
                .ok_or_else(|| Error::UnknownDomain(forced.to_string()))?;
            mlog_debug!("domain: forced {}", domain.tag);
            return Ok(DomainDetection {
                matches: vec![DomainMatch {
                    domain: domain.tag.clone(),
                    confidence: 1.0,
                    activation: Activation::AutoSelected,
                    signals: vec![MatchedSignal::Forced],
                    priority: domain.priority,
                }],
                multi_handler: 1.0 >= self.thresholds.multi_handler,
            });
        }

        let mut matches: Vec<DomainMatch> = self
            .registry
            .domains()
            .iter()
            .filter_map(|domain| self.score_domain(domain, request))
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.priority.cmp(&b.priority))
        });

        let multi_handler = matches
            .first()
            .is_some_and(|m| m.confidence >= self.thresholds.multi_handler);

        mlog_debug!(
            "domain: {} match(es) [{}] multi_handler={}",
            matches.len(),
            matches
                .iter()
                .map(|m| format!("{}={:.2}", m.domain, m.confidence))
                .collect::<Vec<_>>()
                .join(", "),
            multi_handler
        );

        Ok(DomainDetection {
            matches,
            multi_handler,
        })
    }

    fn score_domain(&self, domain: &CompiledDomain, request: &TaskRequest) -> Option<DomainMatch> {
        let mut signals = Vec::new();

        let hits = domain
            .keywords
            .iter()
            .filter(|k| k.is_match(request.text()))
            .inspect(|k| {
                signals.push(MatchedSignal::Keyword {
                    keyword: k.keyword().to_string(),
                })
            })
            .count();
        let keyword_signal = 1.0 - 0.5f64.powi(hits as i32);

        let scope = request.scope();
        let mut matched_paths = 0usize;
        for path in scope {
            if let Some(glob) = domain.globs.iter().find(|g| g.is_match(path)) {
                matched_paths += 1;
                signals.push(MatchedSignal::FilePattern {
                    pattern: glob.pattern().to_string(),
                    path: path.clone(),
                });
            }
        }
        let file_signal = if scope.is_empty() {
            0.0
        } else {
            matched_paths as f64 / scope.len() as f64
        };

        let confidence =
            clamp_unit(1.0 - (1.0 - keyword_signal) * (1.0 - FILE_SIGNAL_WEIGHT * file_signal));
        if confidence < self.thresholds.suggest {
            return None;
        }

        let activation = if confidence >= self.thresholds.auto_activate {
            Activation::AutoSelected
        } else {
            Activation::Suggested
        };

        Some(DomainMatch {
            domain: domain.tag.clone(),
            confidence,
            activation,
            signals,
            priority: domain.priority,
        })
    }
}
