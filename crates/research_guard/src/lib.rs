//! Research Guard - Admission control for multi-step research pipelines
//!
//! Keeps a research task from running away with queries, wall-clock time,
//! money, or refinement loops. Two independent gates:
//! - `RateLimiter`: per-session query/time/cost budgets plus a per-client hourly quota
//! - `CircuitBreaker`: per-(topic, section) iteration ceilings with minimum spacing
//!
//! Both are plain values owned by an `AdmissionControl` service that callers
//! construct once and pass around explicitly.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod exception_handler;
pub mod identity;
pub mod logging;
pub mod registry;
pub mod safety;

pub use audit::{AuditLog, AuditRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CircuitConfig, ExceptionConfig, GuardConfig, LogConfig, RateLimitConfig, RegistryConfig,
};
pub use error::{GuardError, IterationBlock, LimitKind, LimitViolation, Result};
pub use exception_handler::SafeExceptionHandler;
pub use identity::{derive_circuit_id, derive_session_id, DEFAULT_CLIENT_ID};
pub use safety::*;
