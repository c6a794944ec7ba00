use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::gates::GateStage;
use crate::routing::registry::PatternRegistry;
use crate::routing::selector::{default_handlers, HandlerDescriptor};
use crate::{mlog_debug, Error, Result};

/// Scoring thresholds and scope estimates used by routing and planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Scores below this are the quick tier.
    pub quick_max: f64,
    /// Scores above this are the enterprise tier.
    pub enterprise_min: f64,
    /// Minimum domain confidence to be reported at all.
    pub suggest: f64,
    /// Minimum domain confidence to be selected without confirmation.
    pub auto_activate: f64,
    /// Top confidence at which several handlers are coordinated.
    pub multi_handler: f64,
    /// File count at which the breadth signal saturates.
    pub breadth_saturation: usize,
    /// Files assumed for each glob entry in the scope.
    pub glob_file_estimate: usize,
    /// Scope size above which enterprise-tier tasks run in wave mode.
    pub wave_file_threshold: usize,
    /// Scope size above which wave mode uses the enterprise template.
    pub enterprise_file_threshold: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            quick_max: 0.3,
            enterprise_min: 0.7,
            suggest: 0.5,
            auto_activate: 0.7,
            multi_handler: 0.85,
            breadth_saturation: 50,
            glob_file_estimate: 10,
            wave_file_threshold: 20,
            enterprise_file_threshold: 100,
        }
    }
}

/// Retry, timeout and wave sizing for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Retries after the first attempt for transient failures and timeouts.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_backoff_ms: u64,
    /// Upper bound for a single handler invocation.
    pub invocation_timeout_secs: u64,
    /// Concurrent units per parallel phase at a green resource level.
    pub max_parallelism: usize,
    /// Change/validate cycles in a progressive wave plan.
    pub progressive_iterations: u32,
    /// Work units per execute wave in an adaptive plan.
    pub adaptive_wave_size: usize,
    /// Context cache capacity; oldest entries are evicted first.
    pub cache_max_entries: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 50,
            invocation_timeout_secs: 300,
            max_parallelism: 8,
            progressive_iterations: 3,
            adaptive_wave_size: 2,
            cache_max_entries: 256,
        }
    }
}

impl OrchestrationConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Stages whose failures are reported as warnings instead of failing the run.
    pub non_blocking_stages: Vec<GateStage>,
    /// Register the built-in checks when the engine is created.
    pub builtin_checks: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            non_blocking_stages: Vec::new(),
            builtin_checks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub orchestration: OrchestrationConfig,
    pub gates: GateConfig,
    pub registry: PatternRegistry,
    pub handlers: Vec<HandlerDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            orchestration: OrchestrationConfig::default(),
            gates: GateConfig::default(),
            registry: PatternRegistry::default(),
            handlers: default_handlers(),
        }
    }
}

impl Config {
    pub fn maestro_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("maestro.toml"))
    }

    /// Load `~/.maestro/maestro.toml`, or the defaults if it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        mlog_debug!(
            "Config loaded from {}: {} domains, {} commands, {} handlers",
            path.display(),
            config.registry.domains.len(),
            config.registry.commands.len(),
            config.handlers.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to `~/.maestro/maestro.toml`.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                mlog_debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, self.to_toml_string()?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Check thresholds, the pattern registry and command leads.
    ///
    /// Handler ownership is validated separately when the handler registry
    /// is built.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [
            ("quick_max", t.quick_max),
            ("enterprise_min", t.enterprise_min),
            ("suggest", t.suggest),
            ("auto_activate", t.auto_activate),
            ("multi_handler", t.multi_handler),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!(
                    "Threshold {} = {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        if t.quick_max > t.enterprise_min {
            return Err(Error::Validation(
                "quick_max must not exceed enterprise_min".to_string(),
            ));
        }
        if !(t.suggest <= t.auto_activate && t.auto_activate <= t.multi_handler) {
            return Err(Error::Validation(
                "Expected suggest <= auto_activate <= multi_handler".to_string(),
            ));
        }

        let o = &self.orchestration;
        if o.max_parallelism == 0 || o.adaptive_wave_size == 0 || o.progressive_iterations == 0 {
            return Err(Error::Validation(
                "max_parallelism, adaptive_wave_size and progressive_iterations must be positive"
                    .to_string(),
            ));
        }

        self.registry.validate()?;

        for command in &self.registry.commands {
            if let Some(lead) = &command.lead {
                if !self.handlers.iter().any(|h| &h.id == lead) {
                    return Err(Error::UnknownHandler(format!(
                        "{} (lead of command '{}')",
                        lead, command.verb
                    )));
                }
            }
        }
        Ok(())
    }
}
