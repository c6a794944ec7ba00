//! Task classification and handler selection.
//!
//! Routing is pure and deterministic: the same request and configuration
//! always produce the same score, domain ranking and assignment.

pub mod complexity;
pub mod domain;
pub mod registry;
pub mod selector;

pub use complexity::{ComplexityScore, ComplexityScorer, ComplexityTier, SignalBreakdown};
pub use domain::{Activation, DomainDetection, DomainDetector, DomainMatch, MatchedSignal};
pub use registry::{CommandMapping, CompiledRegistry, DomainPattern, PatternRegistry};
pub use selector::{
    default_handlers, Assignment, Delegation, ExternalService, HandlerAssignment,
    HandlerDescriptor, HandlerRegistry, HandlerSelector, Subtask,
};
