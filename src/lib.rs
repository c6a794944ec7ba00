pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod report;
pub mod routing;
pub mod util;

pub use config::Config;
pub use crate::core::{ExecutionPlan, ForcedStrategy, ResourceBudget, TaskFlags, TaskRequest};
pub use engine::{Engine, Outcome, RouteDecision, Routing, Services};
pub use error::{Error, Result};
pub use report::{RunReport, RunStatus};
