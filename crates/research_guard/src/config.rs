//! Research Guard Configuration
//!
//! All sections are optional in the TOML file; missing fields fall back to
//! the defaults below. The research time ceiling (10 minutes), the hourly
//! window (1 hour) and the iteration spacing (1 second) are fixed constants
//! in the safety module and intentionally not configurable here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::safety::RESEARCH_TIME_LIMIT;

/// Quota limits enforced by the rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Queries a single client may issue per hourly window
    #[serde(default = "default_max_queries_per_hour")]
    pub max_queries_per_hour: u32,

    /// Queries a single research session may issue in total
    #[serde(default = "default_max_queries_per_research")]
    pub max_queries_per_research: u32,

    /// Reserved: declared for deployments but not enforced yet
    #[serde(default = "default_max_concurrent_researches")]
    pub max_concurrent_researches: u32,

    /// Spend ceiling per research session, in USD
    #[serde(default = "default_cost_limit_usd")]
    pub cost_limit_usd: f64,
}

fn default_max_queries_per_hour() -> u32 {
    100
}

fn default_max_queries_per_research() -> u32 {
    20
}

fn default_max_concurrent_researches() -> u32 {
    5
}

fn default_cost_limit_usd() -> f64 {
    50.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_queries_per_hour: default_max_queries_per_hour(),
            max_queries_per_research: default_max_queries_per_research(),
            max_concurrent_researches: default_max_concurrent_researches(),
            cost_limit_usd: default_cost_limit_usd(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queries_per_hour == 0 {
            return Err(GuardError::Config("max_queries_per_hour must be > 0".to_string()));
        }
        if self.max_queries_per_research == 0 {
            return Err(GuardError::Config(
                "max_queries_per_research must be > 0".to_string(),
            ));
        }
        if !self.cost_limit_usd.is_finite() || self.cost_limit_usd < 0.0 {
            return Err(GuardError::Config(format!(
                "cost_limit_usd must be a non-negative number, got {}",
                self.cost_limit_usd
            )));
        }
        Ok(())
    }
}

/// Iteration circuit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Ceiling used when a caller does not pass one
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    5
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
        }
    }
}

/// Bounds for the tracker and circuit registries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum live entries per registry; least recently used go first
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Number of independently locked shards
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Entries untouched for this long are dropped lazily (0 = never)
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_capacity() -> usize {
    10_000
}

fn default_shards() -> usize {
    16
}

fn default_idle_ttl_secs() -> u64 {
    3600 // longer than the 10 minute research ceiling
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            shards: default_shards(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        if self.idle_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_ttl_secs))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(GuardError::Config("registry capacity must be > 0".to_string()));
        }
        if self.shards == 0 {
            return Err(GuardError::Config("registry shards must be > 0".to_string()));
        }
        // An idle session must still be around when its time ceiling fires
        if self.idle_ttl_secs > 0 && self.idle_ttl_secs <= RESEARCH_TIME_LIMIT.as_secs() {
            return Err(GuardError::Config(format!(
                "idle_ttl_secs must be 0 or greater than {}, got {}",
                RESEARCH_TIME_LIMIT.as_secs(),
                self.idle_ttl_secs
            )));
        }
        Ok(())
    }
}

/// Exception handler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionConfig {
    /// Replace messages of internal faults with a generic notice
    #[serde(default = "default_hide_internal_details")]
    pub hide_internal_details: bool,

    /// Write every handled failure to the audit file (false = opt out)
    #[serde(default = "default_audit")]
    pub audit: bool,

    /// Append-only audit file
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
}

fn default_hide_internal_details() -> bool {
    true
}

fn default_audit() -> bool {
    true
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("security_exceptions.jsonl")
}

impl Default for ExceptionConfig {
    fn default() -> Self {
        Self {
            hide_internal_details: default_hide_internal_details(),
            audit: default_audit(),
            audit_log_path: default_audit_log_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete Research Guard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GuardConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub exceptions: ExceptionConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl GuardConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GuardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.registry.validate()?;
        if self.circuit.default_max_iterations == 0 {
            return Err(GuardError::Config(
                "default_max_iterations must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GuardError::Config(e.to_string()))
    }
}
