//! Error types for Research Guard.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuardError>;

/// Which admission dimension rejected a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    ResearchQueries,
    ResearchTime,
    ResearchCost,
    HourlyQueries,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::ResearchQueries => "research_queries",
            LimitKind::ResearchTime => "research_time",
            LimitKind::ResearchCost => "research_cost",
            LimitKind::HourlyQueries => "hourly_queries",
        }
    }
}

/// A rejected query, with the observed value and the configured limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitViolation {
    ResearchQueries {
        observed: u32,
        limit: u32,
    },
    ResearchTime {
        elapsed_minutes: f64,
        limit_minutes: f64,
    },
    ResearchCost {
        total_cost_usd: f64,
        estimated_cost_usd: f64,
        limit_usd: f64,
    },
    HourlyQueries {
        client_id: String,
        observed: u32,
        limit: u32,
    },
}

impl LimitViolation {
    pub fn kind(&self) -> LimitKind {
        match self {
            LimitViolation::ResearchQueries { .. } => LimitKind::ResearchQueries,
            LimitViolation::ResearchTime { .. } => LimitKind::ResearchTime,
            LimitViolation::ResearchCost { .. } => LimitKind::ResearchCost,
            LimitViolation::HourlyQueries { .. } => LimitKind::HourlyQueries,
        }
    }
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::ResearchQueries { observed, limit } => {
                write!(f, "Research query limit exceeded: {}/{}", observed, limit)
            }
            LimitViolation::ResearchTime {
                elapsed_minutes,
                limit_minutes,
            } => write!(
                f,
                "Research time exceeded: {:.1}/{:.0} minutes",
                elapsed_minutes, limit_minutes
            ),
            LimitViolation::ResearchCost {
                total_cost_usd,
                estimated_cost_usd,
                limit_usd,
            } => write!(
                f,
                "Research cost limit exceeded: ${:.2} spent + ${:.2} requested > ${:.2}",
                total_cost_usd, estimated_cost_usd, limit_usd
            ),
            LimitViolation::HourlyQueries {
                client_id,
                observed,
                limit,
            } => write!(
                f,
                "Hourly query limit exceeded for client '{}': {}/{}",
                client_id, observed, limit
            ),
        }
    }
}

/// Why a circuit refused another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IterationBlock {
    /// `iteration_count` already reached `max_iterations`
    CeilingReached,
    /// Previous iteration was registered less than the minimum interval ago
    TooSoon { elapsed_ms: u64 },
}

impl fmt::Display for IterationBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationBlock::CeilingReached => write!(f, "ceiling reached"),
            IterationBlock::TooSoon { elapsed_ms } => {
                write!(f, "next iteration requested {}ms after the previous one", elapsed_ms)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("{0}")]
    ResourceLimitExceeded(LimitViolation),

    #[error("Iteration limit exceeded: {iterations}/{max_iterations} ({reason})")]
    IterationLimitExceeded {
        circuit_id: String,
        iterations: u32,
        max_iterations: u32,
        reason: IterationBlock,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Whether the message is safe to show to an end user verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            GuardError::ResourceLimitExceeded(_)
                | GuardError::IterationLimitExceeded { .. }
                | GuardError::InvalidInput(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::ResourceLimitExceeded(_) => "resource_limit_exceeded",
            GuardError::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            GuardError::InvalidInput(_) => "invalid_input",
            GuardError::Config(_) => "config",
            GuardError::Io(_) => "io",
            GuardError::Toml(_) => "toml",
            GuardError::Json(_) => "json",
            GuardError::Internal(_) => "internal",
        }
    }

    /// The violated dimension, for rate-limit rejections.
    pub fn limit_kind(&self) -> Option<LimitKind> {
        match self {
            GuardError::ResourceLimitExceeded(v) => Some(v.kind()),
            _ => None,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        GuardError::Internal(format!("{} lock poisoned", what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_messages() {
        let err = GuardError::ResourceLimitExceeded(LimitViolation::ResearchQueries {
            observed: 20,
            limit: 20,
        });
        assert_eq!(err.to_string(), "Research query limit exceeded: 20/20");
        assert_eq!(err.limit_kind(), Some(LimitKind::ResearchQueries));

        let err = GuardError::ResourceLimitExceeded(LimitViolation::ResearchCost {
            total_cost_usd: 0.9,
            estimated_cost_usd: 0.3,
            limit_usd: 1.0,
        });
        assert_eq!(
            err.to_string(),
            "Research cost limit exceeded: $0.90 spent + $0.30 requested > $1.00"
        );
    }

    #[test]
    fn test_iteration_message() {
        let err = GuardError::IterationLimitExceeded {
            circuit_id: "abc".to_string(),
            iterations: 2,
            max_iterations: 2,
            reason: IterationBlock::CeilingReached,
        };
        assert_eq!(err.to_string(), "Iteration limit exceeded: 2/2 (ceiling reached)");
    }

    #[test]
    fn test_user_facing_split() {
        assert!(GuardError::InvalidInput("x".into()).is_user_facing());
        assert!(!GuardError::Config("x".into()).is_user_facing());
        assert!(!GuardError::Internal("x".into()).is_user_facing());
        assert_eq!(GuardError::poisoned("tracker").kind(), "internal");
    }

    #[test]
    fn test_violation_serialization() {
        let v = LimitViolation::HourlyQueries {
            client_id: "default".to_string(),
            observed: 101,
            limit: 100,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "hourly_queries");
        assert_eq!(json["observed"], 101);
    }
}
